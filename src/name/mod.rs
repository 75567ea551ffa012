// Copyright 2021 Matthew Ingwersen.
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

//! Implementation of the [`Name`] type for domain names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::str::FromStr;

use lazy_static::lazy_static;

mod builder;
mod error;
mod label;
pub use builder::NameBuilder;
pub use error::Error;
pub use label::Label;

/// The maximum number of labels in a domain name.
pub const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
pub const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// An owned, absolute domain name.
///
/// A `Name` stores the uncompressed on-the-wire representation of the
/// name ([RFC 1035 § 3.1]) together with the offset of each label in
/// it, so that labels can be visited from either end without
/// re-scanning. The last label is always the null label.
///
/// `Name`s are constructed through the [`FromStr`] implementation or
/// through a [`NameBuilder`]. Comparison and hashing are
/// ASCII-case-insensitive, while case is preserved for display and on
/// the wire.
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire_repr: Box<[u8]>,
    label_offsets: Box<[u8]>,
}

lazy_static! {
    static ref ROOT: Name = Name {
        wire_repr: Box::new([0]),
        label_offsets: Box::new([0]),
    };
}

#[allow(clippy::len_without_is_empty)] // A domain name is never empty!
impl Name {
    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        self.len() >= other.len()
            && self
                .labels()
                .rev()
                .zip(other.labels().rev())
                .all(|(a, b)| a == b)
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.len() == 1
    }

    /// Returns the label at index `n`, counting from the leftmost
    /// label, or `None` if there is no such label.
    pub fn label(&self, n: usize) -> Option<Label> {
        let start = *self.label_offsets.get(n)? as usize;
        let len = self.wire_repr[start] as usize;
        Some(Label::from_unchecked(
            &self.wire_repr[start + 1..start + 1 + len],
        ))
    }

    /// Returns an iterator over labels in this `Name`.
    pub fn labels(&self) -> Labels {
        Labels {
            name: self,
            front: 0,
            back: self.len(),
        }
    }

    /// Returns the number of labels in this `Name`, including the
    /// terminal null label.
    pub fn len(&self) -> usize {
        self.label_offsets.len()
    }

    /// Returns a reference to a `Name` representing the DNS root, `.`.
    pub fn root() -> &'static Name {
        &ROOT
    }

    /// Returns a copy of this `Name` with all ASCII letters made
    /// lowercase. TSIG requires key and algorithm names in this
    /// canonical form when computing MACs.
    pub fn to_ascii_lowercase(&self) -> Name {
        Name {
            wire_repr: self.wire_repr.to_ascii_lowercase().into_boxed_slice(),
            label_offsets: self.label_offsets.clone(),
        }
    }

    /// Returns the uncompressed on-the-wire representation of this
    /// `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire_repr
    }
}

/// `Name`s are displayed as absolute names, with a trailing period.
impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            let mut labels = self.labels();
            if let Some(first) = labels.next() {
                first.fmt(f)?;
            }
            for label in labels {
                write!(f, ".{}", label)?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.labels().zip(other.labels()).all(|(a, b)| a == b)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in self.labels() {
            label.hash(state);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATION OVER A NAME'S LABELS                                     //
////////////////////////////////////////////////////////////////////////

/// An iterator over the [`Label`]s in a [`Name`].
///
/// To use this iterator, construct one from a [`Name`] using
/// [`Name::labels`].
#[derive(Clone, Debug)]
pub struct Labels<'a> {
    name: &'a Name,
    front: usize,
    back: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = Label<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front < self.back {
            let this_one = self.front;
            self.front += 1;
            self.name.label(this_one)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Labels<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.back > self.front {
            self.back -= 1;
            self.name.label(self.back)
        } else {
            None
        }
    }
}

impl ExactSizeIterator for Labels<'_> {}

impl FusedIterator for Labels<'_> {}

////////////////////////////////////////////////////////////////////////
// PARSING OF NAMES FROM RUST STRINGS                                 //
////////////////////////////////////////////////////////////////////////

/// Allows for conversion of a Rust [`str`] into a [`Name`]. The passed
/// string must be strictly ASCII. Escape sequences as defined by
/// [RFC 4343 § 2.1] are supported.
///
/// Change requests and configuration files name things without a
/// trailing period (`ns1.example.com`), so a name that is not fully
/// qualified is taken to be relative to the root.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Name::root().clone());
        }

        let mut remaining_octets: &[u8] = s.as_ref();
        let mut builder = NameBuilder::new();

        // NOTE: to check that the string is ASCII, it suffices to check
        // that each octet is ASCII as we go. This is because all
        // multi-byte characters start with an octet that is not ASCII.
        while let Some(&octet) = remaining_octets.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining_octets[1..])?;
                builder.try_push(value)?;
                remaining_octets = &remaining_octets[consumed + 1..];
            } else if octet == b'.' {
                builder.next_label()?;
                remaining_octets = &remaining_octets[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                builder.try_push(octet)?;
                remaining_octets = &remaining_octets[1..];
            }
        }
        if !builder.is_fully_qualified() {
            builder.next_label()?;
        }
        builder.finish()
    }
}

/// Parses an escape sequence. We expect `remaining_octets` to start
/// with the octet immediately *after* the backslash that introduces the
/// escape sequence.
fn parse_escape(remaining_octets: &[u8]) -> Result<(u8, usize), Error> {
    match remaining_octets {
        [] => Err(Error::InvalidEscape),
        [first, ..] if first.is_ascii_digit() => {
            let digits = remaining_octets
                .get(0..3)
                .filter(|digits| digits.iter().all(u8::is_ascii_digit))
                .ok_or(Error::InvalidEscape)?;
            let value = digits
                .iter()
                .fold(0usize, |value, digit| 10 * value + (digit - b'0') as usize);
            u8::try_from(value)
                .map(|value| (value, 3))
                .map_err(|_| Error::InvalidEscape)
        }
        [first, ..] => Ok((*first, 1)),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
