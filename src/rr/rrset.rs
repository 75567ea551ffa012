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

//! Implementation of the [`Record`] and [`Rrset`] types.

use std::fmt;

use super::{Rdata, Ttl, Type};
use crate::class::Class;
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// SINGLE RECORDS                                                     //
////////////////////////////////////////////////////////////////////////

/// A single resource record, as parsed from one line of master-file
/// text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub owner: Name,
    pub ttl: Ttl,
    pub class: Class,
    pub rr_type: Type,
    pub rdata: Rdata,
}

/// Records are displayed in master-file format, with every field
/// present.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.owner, self.ttl, self.class, self.rr_type, self.rdata
        )
    }
}

////////////////////////////////////////////////////////////////////////
// RRSETS                                                             //
////////////////////////////////////////////////////////////////////////

/// A resource record set.
///
/// [RFC 2181 § 5] defines an RRset as a group of records with the same
/// owner, class, and type, all with the same TTL. Records are added
/// with [`Rrset::push_rdata`], which silently discards data already
/// present, so an `Rrset` never holds duplicates. The order in which
/// data were added is kept for output.
///
/// Two `Rrset`s are equal when they have the same owner, class, and
/// type and the same set of data. The TTL and the order of the data are
/// not considered. This is the comparison used to decide whether an
/// RRset changes between two snapshots of a delegation.
///
/// [RFC 2181 § 5]: https://datatracker.ietf.org/doc/html/rfc2181#section-5
#[derive(Clone, Debug)]
pub struct Rrset {
    pub owner: Name,
    pub class: Class,
    pub rr_type: Type,
    pub ttl: Ttl,
    rdatas: Vec<Rdata>,
}

impl Rrset {
    /// Creates a new `Rrset` with the given owner, class, RR type, and
    /// TTL. It will initially contain no record data.
    pub fn new(owner: Name, class: Class, rr_type: Type, ttl: Ttl) -> Self {
        Self {
            owner,
            class,
            rr_type,
            ttl,
            rdatas: Vec::new(),
        }
    }

    /// Groups records into `Rrset`s by owner, class, and type. The
    /// `Rrset`s are returned in the order in which their first record
    /// appears; each takes the TTL of that first record.
    pub fn group(records: impl IntoIterator<Item = Record>) -> Vec<Rrset> {
        let mut rrsets: Vec<Rrset> = Vec::new();
        for record in records {
            match rrsets
                .iter_mut()
                .find(|r| r.is_for(&record.owner, record.class, record.rr_type))
            {
                Some(rrset) => rrset.push_rdata(record.rdata),
                None => {
                    let mut rrset =
                        Rrset::new(record.owner, record.class, record.rr_type, record.ttl);
                    rrset.push_rdata(record.rdata);
                    rrsets.push(rrset);
                }
            }
        }
        rrsets
    }

    /// Returns whether this `Rrset` holds records of the given owner,
    /// class, and type.
    pub fn is_for(&self, owner: &Name, class: Class, rr_type: Type) -> bool {
        self.rr_type == rr_type && self.class == class && self.owner == *owner
    }

    /// Adds an [`Rdata`] to this `Rrset`, discarding it if it is
    /// already present.
    pub fn push_rdata(&mut self, rdata: Rdata) {
        if !self.rdatas.contains(&rdata) {
            self.rdatas.push(rdata);
        }
    }

    /// Returns the data of this `Rrset`, in the order they were added.
    pub fn rdatas(&self) -> &[Rdata] {
        &self.rdatas
    }

    /// Returns an iterator over the individual records of this `Rrset`.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rdatas.iter().map(|rdata| Record {
            owner: self.owner.clone(),
            ttl: self.ttl,
            class: self.class,
            rr_type: self.rr_type,
            rdata: rdata.clone(),
        })
    }

    /// Returns a copy of this `Rrset` with its TTL replaced.
    pub fn with_ttl(&self, ttl: Ttl) -> Rrset {
        Rrset {
            ttl,
            ..self.clone()
        }
    }

    /// Returns the number of records in this `Rrset`.
    pub fn len(&self) -> usize {
        self.rdatas.len()
    }

    /// Returns whether this `Rrset` has no records.
    pub fn is_empty(&self) -> bool {
        self.rdatas.is_empty()
    }
}

impl PartialEq for Rrset {
    fn eq(&self, other: &Self) -> bool {
        // Neither side holds duplicates, so equal lengths plus
        // containment one way means the sets are equal.
        self.is_for(&other.owner, other.class, other.rr_type)
            && self.rdatas.len() == other.rdatas.len()
            && self.rdatas.iter().all(|rdata| other.rdatas.contains(rdata))
    }
}

impl Eq for Rrset {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use lazy_static::lazy_static;

    use super::*;

    lazy_static! {
        static ref OWNER: Name = "a.example.com.".parse().unwrap();
        static ref NS1: Rdata = Rdata::Ns("ns1.a.example.com.".parse().unwrap());
        static ref NS2: Rdata = Rdata::Ns("ns2.a.example.com.".parse().unwrap());
    }

    fn ns_rrset(ttl: u32, rdatas: &[&Rdata]) -> Rrset {
        let mut rrset = Rrset::new(OWNER.clone(), Class::IN, Type::NS, Ttl::from(ttl));
        for rdata in rdatas {
            rrset.push_rdata((*rdata).clone());
        }
        rrset
    }

    #[test]
    fn rrset_ignores_duplicates() {
        let upper = Rdata::Ns("NS1.A.EXAMPLE.COM.".parse().unwrap());
        let rrset = ns_rrset(3600, &[&*NS1, &*NS2, &upper]);
        assert_eq!(rrset.rdatas(), [NS1.clone(), NS2.clone()]);
    }

    #[test]
    fn equality_ignores_ttl_and_order() {
        assert_eq!(ns_rrset(3600, &[&*NS1, &*NS2]), ns_rrset(60, &[&*NS2, &*NS1]));
    }

    #[test]
    fn equality_considers_data_owner_class_and_type() {
        let base = ns_rrset(3600, &[&*NS1, &*NS2]);
        assert_ne!(base, ns_rrset(3600, &[&*NS1]));

        let mut other_owner = base.clone();
        other_owner.owner = "b.example.com.".parse().unwrap();
        assert_ne!(base, other_owner);

        let mut other_class = base.clone();
        other_class.class = Class::CH;
        assert_ne!(base, other_class);
    }

    #[test]
    fn group_merges_records_in_order_of_appearance() {
        let glue_owner: Name = "ns1.a.example.com.".parse().unwrap();
        let record = |owner: &Name, ttl: u32, rr_type: Type, rdata: &Rdata| Record {
            owner: owner.clone(),
            ttl: Ttl::from(ttl),
            class: Class::IN,
            rr_type,
            rdata: rdata.clone(),
        };
        let glue = Rdata::A(Ipv4Addr::new(10, 0, 0, 1));
        let rrsets = Rrset::group([
            record(&*OWNER, 300, Type::NS, &*NS1),
            record(&glue_owner, 0, Type::A, &glue),
            record(&*OWNER, 600, Type::NS, &*NS2),
        ]);
        assert_eq!(rrsets.len(), 2);
        assert_eq!(rrsets[0].rr_type, Type::NS);
        assert_eq!(rrsets[0].ttl, Ttl::from(300));
        assert_eq!(rrsets[0].rdatas(), [NS1.clone(), NS2.clone()]);
        assert_eq!(rrsets[1].owner, glue_owner);
        assert_eq!(rrsets[1].records().count(), 1);
    }

    #[test]
    fn record_displays_all_fields() {
        let record = ns_rrset(3600, &[&*NS1]).records().next().unwrap();
        assert_eq!(
            record.to_string(),
            "a.example.com. 3600 IN NS ns1.a.example.com."
        );
    }
}
