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

//! Parsing of single records in the [RFC 1035 § 5] zone file format.
//!
//! Change requests and update scripts describe each record on one line,
//! using master-file syntax:
//!
//! ```text
//! <owner> [<TTL>] [<class>] <type> <RDATA>
//! ```
//!
//! As in a zone file, the TTL and class may each be omitted and may
//! appear in either order. There is no `$ORIGIN` or `$TTL`, and no
//! previous record to inherit from, so omitted fields take fixed
//! defaults instead: a TTL of zero and the class IN. Names that are
//! not fully qualified are relative to the root. A `;` outside of
//! double quotes starts a comment.
//!
//! ```
//! use ddnsmulti::class::Class;
//! use ddnsmulti::rr::{Rdata, Ttl, Type};
//! use ddnsmulti::zone_file::parse_record;
//!
//! let record = parse_record("a.example.com. NS ns1.a.example.com").unwrap();
//! assert_eq!(record.ttl, Ttl::from(0));
//! assert_eq!(record.class, Class::IN);
//! assert_eq!(record.rr_type, Type::NS);
//! assert_eq!(record.rdata, Rdata::Ns("ns1.a.example.com.".parse().unwrap()));
//! ```
//!
//! RDATA is interpreted for NS records and for Internet-class A and
//! AAAA records. For any other type, the rest of the line is kept as
//! [`Rdata::Uninterpreted`](crate::rr::Rdata::Uninterpreted) text.
//!
//! [RFC 1035 § 5]: https://datatracker.ietf.org/doc/html/rfc1035#section-5

use crate::class::Class;
use crate::rr::{Record, Ttl};

pub mod error;
mod reader;
mod record;

pub use error::{Error, ErrorKind, Result};
use reader::Reader;

/// The TTL given to records that do not state one.
pub const DEFAULT_TTL: Ttl = Ttl::MIN;

/// The class given to records that do not state one.
pub const DEFAULT_CLASS: Class = Class::IN;

/// Parses a single record from `line`.
pub fn parse_record(line: &str) -> Result<Record> {
    Parser::new(line).parse_record()
}

/// A parser for one line of master-file text.
struct Parser<'a> {
    reader: Reader<'a>,
}

impl<'a> Parser<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            reader: Reader::new(line),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;
    use crate::rr::{Rdata, Type};

    #[test]
    fn parses_record_with_all_fields() {
        let record = parse_record("ns1.a.example.com. 3600 IN A 10.0.0.1").unwrap();
        assert_eq!(record.owner, "ns1.a.example.com.".parse().unwrap());
        assert_eq!(record.ttl, Ttl::from(3600));
        assert_eq!(record.class, Class::IN);
        assert_eq!(record.rr_type, Type::A);
        assert_eq!(record.rdata, Rdata::A(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn accepts_class_before_ttl() {
        let record = parse_record("ns1.a.example.com IN 60 AAAA 2001:db8::1").unwrap();
        assert_eq!(record.ttl, Ttl::from(60));
        assert_eq!(
            record.rdata,
            Rdata::Aaaa("2001:db8::1".parse::<Ipv6Addr>().unwrap())
        );
    }

    #[test]
    fn omitted_ttl_and_class_take_defaults() {
        let record = parse_record("a.example.com NS ns4.a.example.com").unwrap();
        assert_eq!(record.ttl, DEFAULT_TTL);
        assert_eq!(record.class, DEFAULT_CLASS);
        let record = parse_record("a.example.com 300 NS ns4.a.example.com").unwrap();
        assert_eq!(record.ttl, Ttl::from(300));
        assert_eq!(record.class, DEFAULT_CLASS);
        let record = parse_record("a.example.com CH NS ns4.a.example.com").unwrap();
        assert_eq!(record.ttl, DEFAULT_TTL);
        assert_eq!(record.class, Class::CH);
    }

    #[test]
    fn other_types_are_kept_verbatim() {
        let record = parse_record("a.example.com. MX 10  mail.example.com. ; comment").unwrap();
        assert_eq!(record.rr_type, Type::MX);
        assert_eq!(record.rdata, Rdata::Uninterpreted("10  mail.example.com.".into()));
        let record = parse_record("a.example.com. TXT \"a ; b\"").unwrap();
        assert_eq!(record.rdata, Rdata::Uninterpreted("\"a ; b\"".into()));
    }

    #[test]
    fn a_rdata_outside_internet_class_is_uninterpreted() {
        let record = parse_record("x.example.com. CH A example.com. 0177").unwrap();
        assert_eq!(record.rdata, Rdata::Uninterpreted("example.com. 0177".into()));
    }

    #[test]
    fn reports_error_positions() {
        let err = parse_record("a.example.com. NS").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ExpectedName);
        assert_eq!(err.column(), 18);

        let err = parse_record("a.example.com. A 10.0.0.300").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidIpv4(_)));
        assert_eq!(err.column(), 18);

        let err = parse_record("a.example.com. A 10.0.0.1 10.0.0.2").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ExpectedEol);
        assert_eq!(err.column(), 27);
    }

    #[test]
    fn rejects_incomplete_records() {
        assert_eq!(
            parse_record("").unwrap_err().kind(),
            &ErrorKind::ExpectedOwner
        );
        assert_eq!(
            parse_record("a.example.com. 3600 IN").unwrap_err().kind(),
            &ErrorKind::ExpectedType
        );
        assert_eq!(
            parse_record("a.example.com. BOGUS x").unwrap_err().kind(),
            &ErrorKind::InvalidType("unknown type")
        );
        assert_eq!(
            parse_record("a.example.com. TXT ; nothing").unwrap_err().kind(),
            &ErrorKind::ExpectedRdata
        );
    }

    #[test]
    fn rejects_out_of_range_ttls() {
        let err = parse_record("a.example.com. 2147483648 NS ns1.example.com.").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidTtl);
        assert_eq!(err.column(), 16);
        let err = parse_record("a.example.com. IN 99999999999999999999 NS ns1").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidTtl);
        assert_eq!(err.column(), 19);
        let record = parse_record("a.example.com. 2147483647 NS ns1.example.com.").unwrap();
        assert_eq!(record.ttl, Ttl::MAX);
    }

    #[test]
    fn rejects_invalid_owner() {
        let err = parse_record("a..example.com. NS ns1.example.com.").unwrap_err();
        assert_eq!(err.column(), 1);
        assert!(matches!(err.kind(), ErrorKind::InvalidName(_)));
    }
}
