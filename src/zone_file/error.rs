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

//! Error types for record parsing.
//!
//! All syntax errors are recorded with an [`ErrorKind`] value, which
//! calling code can use to get an appropriate error message, and the
//! column at which the offending field starts.

use std::fmt;
use std::net::AddrParseError;

use crate::name;

////////////////////////////////////////////////////////////////////////
// ERROR STRUCTURE                                                    //
////////////////////////////////////////////////////////////////////////

/// A syntax error encountered while parsing a record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    column: usize,
    kind: ErrorKind,
}

impl Error {
    /// Constructs a new [`Error`]. The column is given as a zero-based
    /// byte offset into the line.
    pub(super) fn new(offset: usize, kind: ErrorKind) -> Self {
        Self {
            column: offset + 1,
            kind,
        }
    }

    /// Returns the (one-based) column at which the error occurred.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Returns the kind of syntax error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at column {}", self.kind, self.column)
    }
}

impl std::error::Error for Error {}

/// A result type for record parsing.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// SYNTAX ERROR KINDS                                                 //
////////////////////////////////////////////////////////////////////////

/// Kinds of record syntax errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    ExpectedEol,
    ExpectedIpv4,
    ExpectedIpv6,
    ExpectedName,
    ExpectedOwner,
    ExpectedRdata,
    ExpectedType,
    InvalidIpv4(AddrParseError),
    InvalidIpv6(AddrParseError),
    InvalidName(name::Error),
    InvalidTtl,
    InvalidType(&'static str),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ExpectedEol => f.write_str("expected end of line"),
            Self::ExpectedIpv4 => f.write_str("expected an IPv4 address"),
            Self::ExpectedIpv6 => f.write_str("expected an IPv6 address"),
            Self::ExpectedName => f.write_str("expected a domain name"),
            Self::ExpectedOwner => f.write_str("expected an owner name"),
            Self::ExpectedRdata => f.write_str("expected RDATA"),
            Self::ExpectedType => f.write_str("expected an RR type"),
            Self::InvalidIpv4(err) => write!(f, "invalid IPv4 address: {}", err),
            Self::InvalidIpv6(err) => write!(f, "invalid IPv6 address: {}", err),
            Self::InvalidName(err) => write!(f, "invalid domain name: {}", err),
            Self::InvalidTtl => f.write_str("TTL is out of range"),
            Self::InvalidType(reason) => write!(f, "invalid RR type: {}", reason),
        }
    }
}
