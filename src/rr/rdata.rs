// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the [`Rdata`] type.

use std::borrow::Cow;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::name::Name;

/// The data of a single resource record.
///
/// Only the types that make up a delegation (NS, and A and AAAA for
/// glue) are interpreted. The data of any other type is kept verbatim
/// as its presentation text: such records are never valid in a change
/// request, but parsing them lets validation report the offending type
/// instead of a syntax error.
///
/// Equality follows DNS semantics, so NS targets compare
/// case-insensitively.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Rdata {
    Ns(Name),
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Uninterpreted(String),
}

impl Rdata {
    /// Returns the nameserver target if this is NS data.
    pub fn ns_target(&self) -> Option<&Name> {
        match self {
            Self::Ns(target) => Some(target),
            _ => None,
        }
    }

    /// Returns the on-the-wire form of the data, or [`None`] for
    /// uninterpreted data (which cannot be serialized). Domain names
    /// are never compressed.
    pub fn wire_repr(&self) -> Option<Cow<[u8]>> {
        match self {
            Self::Ns(target) => Some(Cow::Borrowed(target.wire_repr())),
            Self::A(address) => Some(Cow::Owned(address.octets().to_vec())),
            Self::Aaaa(address) => Some(Cow::Owned(address.octets().to_vec())),
            Self::Uninterpreted(_) => None,
        }
    }
}

impl fmt::Display for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ns(target) => target.fmt(f),
            Self::A(address) => address.fmt(f),
            Self::Aaaa(address) => address.fmt(f),
            Self::Uninterpreted(text) => f.write_str(text),
        }
    }
}
