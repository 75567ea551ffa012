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

//! Parsing of resource records.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::{Error, ErrorKind, Parser, Result, DEFAULT_CLASS, DEFAULT_TTL};
use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, Record, Ttl, Type};

impl<'a> Parser<'a> {
    ////////////////////////////////////////////////////////////////////
    // PARSING OF RESOURCE RECORDS                                    //
    ////////////////////////////////////////////////////////////////////

    /// Parses a complete resource record, consuming the whole line.
    pub(super) fn parse_record(&mut self) -> Result<Record> {
        let owner = self.parse_name(ErrorKind::ExpectedOwner)?;
        let (ttl, class) = self.parse_ttl_and_class()?;
        let rr_type = self.parse_type()?;
        let rdata = self.parse_rdata(class, rr_type)?;
        Ok(Record {
            owner,
            ttl,
            class,
            rr_type,
            rdata,
        })
    }

    ////////////////////////////////////////////////////////////////////
    // RESOURCE RECORD PARSING HELPERS                                //
    ////////////////////////////////////////////////////////////////////

    /// Parses the optional TTL and CLASS fields of a record, which may
    /// appear in either order. As noted in RFC 1035 § 5.1, the possible
    /// TTL, class, and subsequent type fields are disjoint, so we just
    /// try the possibilities. Fields that are not consumed here are
    /// left for the type parser. A numeric TTL outside the range of
    /// RFC 2181 § 8 is an error.
    fn parse_ttl_and_class(&mut self) -> Result<(Ttl, Class)> {
        let mut ttl = None;
        let mut class = None;
        for _ in 0..2 {
            let Some((offset, field)) = self.reader.peek_field() else {
                break;
            };
            if ttl.is_none() && field.bytes().all(|b| b.is_ascii_digit()) {
                let value = field
                    .parse()
                    .ok()
                    .and_then(Ttl::checked_from)
                    .ok_or_else(|| Error::new(offset, ErrorKind::InvalidTtl))?;
                ttl = Some(value);
                self.reader.next_field();
                continue;
            }
            if class.is_none() {
                if let Ok(value) = field.parse::<Class>() {
                    class = Some(value);
                    self.reader.next_field();
                    continue;
                }
            }
            break;
        }
        Ok((ttl.unwrap_or(DEFAULT_TTL), class.unwrap_or(DEFAULT_CLASS)))
    }

    /// Parses the TYPE field of a record.
    fn parse_type(&mut self) -> Result<Type> {
        let (offset, field) = self.next_field_or(ErrorKind::ExpectedType)?;
        field
            .parse()
            .map_err(|e| Error::new(offset, ErrorKind::InvalidType(e)))
    }

    /// Parses a domain name field.
    fn parse_name(&mut self, missing: ErrorKind) -> Result<Name> {
        let (offset, field) = self.next_field_or(missing)?;
        field
            .parse()
            .map_err(|e| Error::new(offset, ErrorKind::InvalidName(e)))
    }

    /// Parses the RDATA of a record of the given class and type.
    fn parse_rdata(&mut self, class: Class, rr_type: Type) -> Result<Rdata> {
        let rdata = match (class, rr_type) {
            (_, Type::NS) => Rdata::Ns(self.parse_name(ErrorKind::ExpectedName)?),
            (Class::IN, Type::A) => {
                let (offset, field) = self.next_field_or(ErrorKind::ExpectedIpv4)?;
                let address: Ipv4Addr = field
                    .parse()
                    .map_err(|e| Error::new(offset, ErrorKind::InvalidIpv4(e)))?;
                Rdata::A(address)
            }
            (Class::IN, Type::AAAA) => {
                let (offset, field) = self.next_field_or(ErrorKind::ExpectedIpv6)?;
                let address: Ipv6Addr = field
                    .parse()
                    .map_err(|e| Error::new(offset, ErrorKind::InvalidIpv6(e)))?;
                Rdata::Aaaa(address)
            }
            _ => match self.reader.rest() {
                Some((_, text)) => Rdata::Uninterpreted(text.to_owned()),
                None => {
                    return Err(Error::new(self.reader.offset(), ErrorKind::ExpectedRdata));
                }
            },
        };

        if self.reader.at_eol() {
            Ok(rdata)
        } else {
            Err(Error::new(self.reader.offset(), ErrorKind::ExpectedEol))
        }
    }

    /// Consumes the next field, failing with `kind` if the line has
    /// ended.
    fn next_field_or(&mut self, kind: ErrorKind) -> Result<(usize, &'a str)> {
        match self.reader.next_field() {
            Some(field) => Ok(field),
            None => Err(Error::new(self.reader.offset(), kind)),
        }
    }
}
