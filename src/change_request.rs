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

//! Delegation change requests and their validation.
//!
//! A [`ChangeRequest`] describes an edit to the delegation of one name
//! (the *change*) within a parent zone. It carries two snapshots of the
//! delegation, `from` (as it currently is) and `to` (as it should be),
//! each a list of NS [`Rrset`]s plus the A and AAAA glue they need.
//!
//! Change requests are written as YAML documents:
//!
//! ```yaml
//! zone: example.com
//! change: a.example.com
//! ttl: 3600
//! from:
//!   - a.example.com NS ns1.a.example.com
//!   - ns1.a.example.com A 10.0.0.1
//! to:
//!   - a.example.com NS ns1.a.example.com
//!   - ns1.a.example.com A 10.0.0.3
//! ```
//!
//! Each record is one line of master-file text, parsed with
//! [`zone_file::parse_record`]. The `ttl` key is optional and defaults
//! to [`DEFAULT_TTL`]. A change request is validated as soon as it is
//! constructed, so every `ChangeRequest` value in existence is valid.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

use crate::class::Class;
use crate::name::{self, Name};
use crate::rr::{Rrset, Ttl, Type};
use crate::zone_file;

////////////////////////////////////////////////////////////////////////
// CONSTANTS                                                          //
////////////////////////////////////////////////////////////////////////

/// The TTL given to added records when a change request does not
/// specify one.
pub const DEFAULT_TTL: u32 = 86_400;

/// The record types that may appear in a change request.
pub const ALLOWED_TYPES: [Type; 3] = [Type::NS, Type::A, Type::AAAA];

////////////////////////////////////////////////////////////////////////
// CHANGE REQUESTS                                                    //
////////////////////////////////////////////////////////////////////////

/// A validated delegation change request.
#[derive(Clone, Debug)]
pub struct ChangeRequest {
    zone: Name,
    change: Name,
    ttl: Ttl,
    from: Vec<Rrset>,
    to: Vec<Rrset>,
}

impl ChangeRequest {
    /// Constructs and validates a new `ChangeRequest`.
    ///
    /// This fails if `change` is not `zone` or a subdomain of it, or
    /// if either snapshot does not pass [`validate`].
    pub fn new(
        zone: Name,
        change: Name,
        ttl: Option<Ttl>,
        from: Vec<Rrset>,
        to: Vec<Rrset>,
    ) -> Result<Self, Error> {
        if !change.eq_or_subdomain_of(&zone) {
            return Err(Error::ChangeOutsideZone { zone, change });
        }
        validate(&change, &from)?;
        validate(&change, &to)?;
        Ok(Self {
            zone,
            change,
            ttl: ttl.unwrap_or_else(|| Ttl::from(DEFAULT_TTL)),
            from,
            to,
        })
    }

    /// Parses and validates a change request from its YAML source text.
    pub fn from_text(text: &str) -> Result<Self, Error> {
        let document: Document = serde_yaml::from_str(text).map_err(Error::Document)?;
        let zone = parse_name("zone", &document.zone)?;
        let change = parse_name("change", &document.change)?;
        let ttl = document
            .ttl
            .map(|ttl| Ttl::checked_from(ttl).ok_or(Error::InvalidTtl(ttl)))
            .transpose()?;
        let from = parse_records("from", &document.from)?;
        let to = parse_records("to", &document.to)?;
        Self::new(zone, change, ttl, from, to)
    }

    /// Returns the zone in which the delegation lives.
    pub fn zone(&self) -> &Name {
        &self.zone
    }

    /// Returns the delegated name.
    pub fn change(&self) -> &Name {
        &self.change
    }

    /// Returns the TTL to use for added records.
    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    /// Returns the current state of the delegation.
    pub fn from(&self) -> &[Rrset] {
        &self.from
    }

    /// Returns the desired state of the delegation.
    pub fn to(&self) -> &[Rrset] {
        &self.to
    }
}

/// The raw structure of a change request document.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    zone: String,
    change: String,
    ttl: Option<i64>,
    from: Vec<String>,
    to: Vec<String>,
}

fn parse_name(field: &'static str, text: &str) -> Result<Name, Error> {
    text.parse().map_err(|error| Error::InvalidName {
        field,
        text: text.to_owned(),
        error,
    })
}

fn parse_records(field: &'static str, lines: &[String]) -> Result<Vec<Rrset>, Error> {
    let records = lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            zone_file::parse_record(line).map_err(|error| Error::InvalidRecord {
                field,
                index,
                error,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Rrset::group(records))
}

////////////////////////////////////////////////////////////////////////
// VALIDATION                                                         //
////////////////////////////////////////////////////////////////////////

/// Validates one snapshot of the delegation of `change`.
///
/// The checks run in order, and the first violation found is returned:
///
/// 1. Every [`Rrset`] must be of class IN and of one of the
///    [`ALLOWED_TYPES`].
/// 2. NS records may only be owned by `change` itself.
/// 3. Every A and AAAA [`Rrset`] must be owned by a target of the NS
///    records (anything else is superfluous glue).
/// 4. Every NS target at or below `change` must have A or AAAA glue.
pub fn validate(change: &Name, rrsets: &[Rrset]) -> Result<(), Error> {
    for rrset in rrsets {
        if rrset.class != Class::IN {
            return Err(Error::Class {
                owner: rrset.owner.clone(),
                class: rrset.class,
            });
        } else if !ALLOWED_TYPES.contains(&rrset.rr_type) {
            return Err(Error::Type {
                owner: rrset.owner.clone(),
                rr_type: rrset.rr_type,
            });
        }
    }

    let mut nameservers = HashSet::new();
    for rrset in rrsets.iter().filter(|r| r.rr_type == Type::NS) {
        if rrset.owner != *change {
            return Err(Error::NsOutsideChange {
                owner: rrset.owner.clone(),
                change: change.clone(),
            });
        }
        nameservers.extend(rrset.rdatas().iter().filter_map(|r| r.ns_target()));
    }

    let mut glue = HashSet::new();
    for rrset in rrsets.iter().filter(|r| is_address_type(r.rr_type)) {
        if !nameservers.contains(&rrset.owner) {
            return Err(Error::SuperfluousGlue {
                owner: rrset.owner.clone(),
            });
        }
        glue.insert(&rrset.owner);
    }

    for rrset in rrsets.iter().filter(|r| r.rr_type == Type::NS) {
        for target in rrset.rdatas().iter().filter_map(|r| r.ns_target()) {
            if target.eq_or_subdomain_of(change) && !glue.contains(target) {
                return Err(Error::MissingGlue {
                    target: target.clone(),
                    change: change.clone(),
                });
            }
        }
    }

    Ok(())
}

fn is_address_type(rr_type: Type) -> bool {
    rr_type == Type::A || rr_type == Type::AAAA
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a change request is malformed or invalid.
#[derive(Debug)]
pub enum Error {
    /// The document is not valid YAML, or has missing, unknown, or
    /// mistyped keys.
    Document(serde_yaml::Error),

    /// The `zone` or `change` key is not a valid domain name.
    InvalidName {
        field: &'static str,
        text: String,
        error: name::Error,
    },

    /// The TTL is negative or greater than 2³¹ - 1.
    InvalidTtl(i64),

    /// A record in `from` or `to` could not be parsed. The index is
    /// zero-based.
    InvalidRecord {
        field: &'static str,
        index: usize,
        error: zone_file::Error,
    },

    /// A record is not of class IN.
    Class { owner: Name, class: Class },

    /// A record is not of an allowed type.
    Type { owner: Name, rr_type: Type },

    /// The delegated name is not within the zone. This and
    /// [`Error::NsOutsideChange`] are the two kinds of invalid change.
    ChangeOutsideZone { zone: Name, change: Name },

    /// NS records are owned by a name other than the delegated name.
    NsOutsideChange { owner: Name, change: Name },

    /// Address records are owned by a name that is not a nameserver of
    /// the delegation.
    SuperfluousGlue { owner: Name },

    /// A nameserver within the delegation has no address records.
    MissingGlue { target: Name, change: Name },
}

impl Error {
    /// Returns whether this is an invalid change, that is, the change
    /// request touches names it has no business touching.
    pub fn is_invalid_change(&self) -> bool {
        matches!(
            self,
            Self::ChangeOutsideZone { .. } | Self::NsOutsideChange { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Document(err) => write!(f, "malformed change request: {}", err),
            Self::InvalidName { field, text, error } => {
                write!(f, "invalid {} {:?}: {}", field, text, error)
            }
            Self::InvalidTtl(ttl) => write!(f, "TTL {} is out of range", ttl),
            Self::InvalidRecord {
                field,
                index,
                error,
            } => write!(f, "invalid record {}[{}]: {}", field, index, error),
            Self::Class { owner, class } => {
                write!(f, "{}: class {} is not allowed", owner, class)
            }
            Self::Type { owner, rr_type } => {
                write!(f, "{}: type {} is not allowed", owner, rr_type)
            }
            Self::ChangeOutsideZone { zone, change } => {
                write!(f, "invalid change: {} is not within zone {}", change, zone)
            }
            Self::NsOutsideChange { owner, change } => write!(
                f,
                "invalid change: NS records at {} are outside of {}",
                owner, change
            ),
            Self::SuperfluousGlue { owner } => write!(
                f,
                "superfluous glue: {} is not a nameserver of the delegation",
                owner
            ),
            Self::MissingGlue { target, change } => write!(
                f,
                "missing glue for {}, which is within {}",
                target, change
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Document(err) => Some(err),
            Self::InvalidName { error, .. } => Some(error),
            Self::InvalidRecord { error, .. } => Some(error),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;

    use super::*;

    const CHANGE_REQUEST: &str = "
zone: example.com
change: a.example.com
from:
  - \"a.example.com. NS ns1.a.example.com\"
  - \"a.example.com. NS ns2.a.example.com\"
  - \"a.example.com. NS ns2.b.example.com\"
  - \"ns1.a.example.com A 10.0.0.1\"
  - \"ns2.a.example.com A 10.0.0.2\"
to:
  - \"a.example.com. NS ns1.a.example.com\"
  - \"a.example.com. NS ns4.a.example.com\"
  - \"a.example.com. NS ns2.b.example.com\"
  - \"ns1.a.example.com A 10.0.0.1\"
  - \"ns4.a.example.com A 10.0.0.2\"
  - \"ns4.a.example.com AAAA 2001:67c:394:15::4\"
";

    lazy_static! {
        static ref CHANGE: Name = "a.example.com.".parse().unwrap();
    }

    fn snapshot(lines: &[&str]) -> Vec<Rrset> {
        Rrset::group(lines.iter().map(|l| zone_file::parse_record(l).unwrap()))
    }

    #[test]
    fn parses_valid_change_request() {
        let cr = ChangeRequest::from_text(CHANGE_REQUEST).unwrap();
        assert_eq!(cr.zone(), &"example.com.".parse::<Name>().unwrap());
        assert_eq!(cr.change(), &*CHANGE);
        assert_eq!(cr.ttl(), Ttl::from(DEFAULT_TTL));
        assert_eq!(cr.from().len(), 3);
        assert_eq!(cr.from()[0].len(), 3);
        assert_eq!(cr.to().len(), 4);
    }

    #[test]
    fn ttl_is_read_and_range_checked() {
        let text = "zone: example.com\nchange: a.example.com\nttl: 3600\nfrom: []\nto: []\n";
        assert_eq!(ChangeRequest::from_text(text).unwrap().ttl(), Ttl::from(3600));

        let text = "zone: example.com\nchange: a.example.com\nttl: -1\nfrom: []\nto: []\n";
        assert!(matches!(
            ChangeRequest::from_text(text),
            Err(Error::InvalidTtl(-1))
        ));
        let text = "zone: example.com\nchange: a.example.com\nttl: 2147483648\nfrom: []\nto: []\n";
        assert!(matches!(
            ChangeRequest::from_text(text),
            Err(Error::InvalidTtl(_))
        ));
    }

    #[test]
    fn rejects_malformed_documents() {
        let missing = "zone: example.com\nchange: a.example.com\nfrom: []\n";
        assert!(matches!(
            ChangeRequest::from_text(missing),
            Err(Error::Document(_))
        ));
        let unknown = "zone: example.com\nchange: a.example.com\nfrom: []\nto: []\nextra: 1\n";
        assert!(matches!(
            ChangeRequest::from_text(unknown),
            Err(Error::Document(_))
        ));
        let bad_name = "zone: example..com\nchange: a.example.com\nfrom: []\nto: []\n";
        assert!(matches!(
            ChangeRequest::from_text(bad_name),
            Err(Error::InvalidName { field: "zone", .. })
        ));
        let bad_record =
            "zone: example.com\nchange: a.example.com\nfrom: []\nto:\n  - a.example.com NS\n";
        assert!(matches!(
            ChangeRequest::from_text(bad_record),
            Err(Error::InvalidRecord {
                field: "to",
                index: 0,
                ..
            })
        ));
    }

    #[test]
    fn change_outside_zone_is_invalid() {
        let text = CHANGE_REQUEST.replace("zone: example.com", "zone: example.net");
        let err = ChangeRequest::from_text(&text).unwrap_err();
        assert!(matches!(err, Error::ChangeOutsideZone { .. }));
        assert!(err.is_invalid_change());
    }

    #[test]
    fn ns_records_outside_change_are_invalid() {
        let text = CHANGE_REQUEST.replace("change: a.example.com", "change: b.example.com");
        let err = ChangeRequest::from_text(&text).unwrap_err();
        match err {
            Error::NsOutsideChange { ref owner, .. } => assert_eq!(owner, &*CHANGE),
            _ => panic!("unexpected error: {}", err),
        }
        assert!(err.is_invalid_change());
    }

    #[test]
    fn unreferenced_glue_is_superfluous() {
        let rrsets = snapshot(&[
            "a.example.com. NS ns1.a.example.com",
            "ns1.a.example.com A 10.0.0.1",
            "ns2.a.example.com A 10.0.0.2",
        ]);
        match validate(&CHANGE, &rrsets) {
            Err(Error::SuperfluousGlue { owner }) => {
                assert_eq!(owner, "ns2.a.example.com.".parse().unwrap())
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn in_bailiwick_nameserver_needs_glue() {
        let rrsets = snapshot(&[
            "a.example.com. NS ns1.a.example.com",
            "a.example.com. NS ns4.a.example.com",
            "a.example.com. NS ns.other.example.",
            "ns1.a.example.com A 10.0.0.1",
        ]);
        match validate(&CHANGE, &rrsets) {
            Err(Error::MissingGlue { target, .. }) => {
                assert_eq!(target, "ns4.a.example.com.".parse().unwrap())
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn out_of_bailiwick_nameserver_needs_no_glue() {
        let rrsets = snapshot(&["a.example.com. NS ns2.b.example.com"]);
        assert!(validate(&CHANGE, &rrsets).is_ok());
    }

    #[test]
    fn only_delegation_records_are_allowed() {
        let rrsets = snapshot(&["a.example.com. MX 10 mail.example.com."]);
        assert!(matches!(
            validate(&CHANGE, &rrsets),
            Err(Error::Type { rr_type: Type::MX, .. })
        ));
        let rrsets = snapshot(&["a.example.com. CH NS ns1.example.net."]);
        assert!(matches!(
            validate(&CHANGE, &rrsets),
            Err(Error::Class { class: Class::CH, .. })
        ));
    }

    #[test]
    fn type_errors_take_precedence() {
        let rrsets = snapshot(&[
            "b.example.com. NS ns1.b.example.com",
            "a.example.com. TXT \"hello\"",
        ]);
        assert!(matches!(
            validate(&CHANGE, &rrsets),
            Err(Error::Type { .. })
        ));
    }

    #[test]
    fn missing_glue_is_found_through_parsing() {
        let text = "
zone: example.com
change: a.example.com
from:
  - a.example.com. NS ns1.a.example.com
  - a.example.com. NS ns2.a.example.com
to:
  - a.example.com. NS ns1.a.example.com
  - a.example.com. NS ns4.a.example.com
";
        assert!(matches!(
            ChangeRequest::from_text(text),
            Err(Error::MissingGlue { .. })
        ));
    }
}
