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

//! Conversion of change requests into DNS UPDATE transactions.
//!
//! An [`Update`] is computed from a [`ChangeRequest`] by diffing its
//! two snapshots, [`Rrset`] by [`Rrset`]:
//!
//! * every `from` RRset becomes an "RRset exists (value dependent)"
//!   prerequisite ([RFC 2136 § 2.4.2]), so the update only applies if
//!   the delegation is still in the state the change request expects;
//! * every `from` RRset with no equal counterpart in `to` is deleted,
//!   record by record; and
//! * every `to` RRset with no equal counterpart in `from` is added,
//!   with the TTL of the change request.
//!
//! RRsets that do not change are neither deleted nor re-added. A
//! changed RRset is replaced as a whole, so its unchanged records are
//! deleted and added back within the same transaction.
//!
//! An `Update` can be encoded as an UPDATE message with
//! [`Update::to_message`], or rendered as a script for `nsupdate(1)`
//! with [`Update::to_script`]. [`Update::from_script`] reads such a
//! script back.
//!
//! [RFC 2136 § 2.4.2]: https://datatracker.ietf.org/doc/html/rfc2136#section-2.4.2

use std::fmt;

use crate::change_request::ChangeRequest;
use crate::class::Class;
use crate::message::tsig::{self, TimeSigned, TsigKey, DEFAULT_FUDGE};
use crate::message::writer::{self, Writer};
use crate::name::{self, Name};
use crate::rr::{Record, Rrset, Ttl};
use crate::zone_file;

/// The largest possible DNS message over TCP.
const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

////////////////////////////////////////////////////////////////////////
// UPDATES                                                            //
////////////////////////////////////////////////////////////////////////

/// A DNS UPDATE transaction against one zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Update {
    zone: Name,
    prerequisites: Vec<Rrset>,
    deletions: Vec<Rrset>,
    additions: Vec<Rrset>,
}

/// A single operation of an [`Update`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// The record must exist.
    Prerequisite(Record),

    /// The record is deleted.
    Delete(Record),

    /// The record is added.
    Add(Record),
}

impl Update {
    /// Computes the update that carries out a change request.
    ///
    /// Prerequisites and deletions carry a TTL of zero, which is how
    /// they are sent on the wire.
    pub fn from_change_request(cr: &ChangeRequest) -> Self {
        let deletions = cr
            .from()
            .iter()
            .filter(|rrset| !cr.to().contains(rrset))
            .map(|rrset| rrset.with_ttl(Ttl::MIN))
            .collect();
        let additions = cr
            .to()
            .iter()
            .filter(|rrset| !cr.from().contains(rrset))
            .map(|rrset| rrset.with_ttl(cr.ttl()))
            .collect();
        Self {
            zone: cr.zone().clone(),
            prerequisites: cr
                .from()
                .iter()
                .map(|rrset| rrset.with_ttl(Ttl::MIN))
                .collect(),
            deletions,
            additions,
        }
    }

    /// Returns the zone to update.
    pub fn zone(&self) -> &Name {
        &self.zone
    }

    /// Returns the RRsets that must exist for the update to apply.
    pub fn prerequisites(&self) -> &[Rrset] {
        &self.prerequisites
    }

    /// Returns the RRsets to delete.
    pub fn deletions(&self) -> &[Rrset] {
        &self.deletions
    }

    /// Returns the RRsets to add.
    pub fn additions(&self) -> &[Rrset] {
        &self.additions
    }

    /// Returns whether the update changes nothing (it may still have
    /// prerequisites).
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.additions.is_empty()
    }

    /// Returns every operation of the update, one per record:
    /// prerequisites first, then deletions, then additions.
    pub fn operations(&self) -> Vec<Operation> {
        let prerequisites = self.prerequisites.iter().flat_map(Rrset::records);
        let deletions = self.deletions.iter().flat_map(Rrset::records);
        let additions = self.additions.iter().flat_map(Rrset::records);
        prerequisites
            .map(Operation::Prerequisite)
            .chain(deletions.map(Operation::Delete))
            .chain(additions.map(Operation::Add))
            .collect()
    }

    ////////////////////////////////////////////////////////////////////
    // WIRE FORMAT                                                    //
    ////////////////////////////////////////////////////////////////////

    /// Encodes the update as an [RFC 2136] UPDATE message with the
    /// given ID, signing it if a TSIG key and signing time are given.
    ///
    /// Prerequisites are written with class IN and a TTL of zero, and
    /// deletions with class NONE and a TTL of zero. Additions keep
    /// their own class and TTL.
    ///
    /// [RFC 2136]: https://datatracker.ietf.org/doc/html/rfc2136
    pub fn to_message(
        &self,
        id: u16,
        tsig: Option<(&TsigKey, TimeSigned)>,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![0; MAX_MESSAGE_SIZE];
        let mut writer = Writer::try_from(buf.as_mut_slice())?;
        writer.set_id(id);
        writer.add_zone(&self.zone, Class::IN)?;
        for record in self.prerequisites.iter().flat_map(Rrset::records) {
            writer.add_prerequisite_rr(
                &record.owner,
                record.rr_type,
                Class::IN,
                Ttl::MIN,
                &record.rdata,
            )?;
        }
        for record in self.deletions.iter().flat_map(Rrset::records) {
            writer.add_update_rr(
                &record.owner,
                record.rr_type,
                Class::NONE,
                Ttl::MIN,
                &record.rdata,
            )?;
        }
        for record in self.additions.iter().flat_map(Rrset::records) {
            writer.add_update_rr(
                &record.owner,
                record.rr_type,
                record.class,
                record.ttl,
                &record.rdata,
            )?;
        }
        let len = writer.finish();
        buf.truncate(len);

        if let Some((key, time_signed)) = tsig {
            tsig::sign_request(&mut buf, key, time_signed, DEFAULT_FUDGE)?;
        }
        Ok(buf)
    }

    ////////////////////////////////////////////////////////////////////
    // UPDATE SCRIPTS                                                 //
    ////////////////////////////////////////////////////////////////////

    /// Renders the update as an `nsupdate(1)` script, one line per
    /// record, terminated by `send`.
    pub fn to_script(&self) -> String {
        let mut script = format!("zone {}\n", self.zone);
        for operation in self.operations() {
            match operation {
                Operation::Prerequisite(r) => script.push_str(&format!(
                    "prereq yxrrset {} {} {} {}\n",
                    r.owner, r.class, r.rr_type, r.rdata
                )),
                Operation::Delete(r) => script.push_str(&format!(
                    "update delete {} {} {} {}\n",
                    r.owner, r.class, r.rr_type, r.rdata
                )),
                Operation::Add(r) => script.push_str(&format!("update add {}\n", r)),
            }
        }
        script.push_str("send\n");
        script
    }

    /// Parses an update script as written by [`Update::to_script`].
    ///
    /// Blank lines and lines starting with `;` are ignored. The script
    /// must set the zone exactly once, before any operation, and must
    /// end with `send`.
    pub fn from_script(script: &str) -> Result<Self, ScriptError> {
        let mut zone = None;
        let mut prerequisites = Vec::new();
        let mut deletions = Vec::new();
        let mut additions = Vec::new();
        let mut sent = false;

        for (index, line) in script.lines().enumerate() {
            let line_number = index + 1;
            let error = |kind: ScriptErrorKind| ScriptError {
                line: line_number,
                kind,
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            } else if sent {
                return Err(error(ScriptErrorKind::AfterSend));
            }

            let parse = |text: &str| zone_file::parse_record(text).map_err(|e| error(e.into()));
            if let Some(text) = strip_command(line, &["zone"]) {
                if zone.is_some() {
                    return Err(error(ScriptErrorKind::MisplacedZone));
                }
                zone = Some(
                    text.parse::<Name>()
                        .map_err(|e| error(ScriptErrorKind::InvalidZone(e)))?,
                );
            } else if line == "send" {
                sent = true;
            } else if zone.is_none() {
                return Err(error(ScriptErrorKind::MissingZone));
            } else if let Some(text) = strip_command(line, &["prereq", "yxrrset"]) {
                if !deletions.is_empty() || !additions.is_empty() {
                    return Err(error(ScriptErrorKind::MisplacedPrerequisite));
                }
                prerequisites.push(parse(text)?);
            } else if let Some(text) = strip_command(line, &["update", "delete"]) {
                deletions.push(parse(text)?);
            } else if let Some(text) = strip_command(line, &["update", "add"]) {
                additions.push(parse(text)?);
            } else {
                return Err(error(ScriptErrorKind::UnknownCommand));
            }
        }

        match zone {
            Some(zone) if sent => Ok(Self {
                zone,
                prerequisites: Rrset::group(prerequisites),
                deletions: Rrset::group(deletions),
                additions: Rrset::group(additions),
            }),
            Some(_) => Err(ScriptError {
                line: script.lines().count(),
                kind: ScriptErrorKind::MissingSend,
            }),
            None => Err(ScriptError {
                line: script.lines().count(),
                kind: ScriptErrorKind::MissingZone,
            }),
        }
    }
}

/// Strips a command made of `words` from the start of `line`, returning
/// the remaining text. Words are separated by whitespace, and the whole
/// command must be followed by whitespace.
fn strip_command<'a>(line: &'a str, words: &[&str]) -> Option<&'a str> {
    let mut rest = line;
    for word in words {
        let (head, tail) = rest.split_once(char::is_whitespace)?;
        if !head.eq_ignore_ascii_case(word) {
            return None;
        }
        rest = tail.trim_start();
    }
    Some(rest)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that an [`Update`] could not be encoded as a
/// message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncodeError {
    Write(writer::Error),
    Sign(tsig::SignError),
}

impl From<writer::Error> for EncodeError {
    fn from(err: writer::Error) -> Self {
        Self::Write(err)
    }
}

impl From<tsig::SignError> for EncodeError {
    fn from(err: tsig::SignError) -> Self {
        Self::Sign(err)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Write(err) => write!(f, "failed to encode UPDATE message: {}", err),
            Self::Sign(err) => write!(f, "failed to sign UPDATE message: {}", err),
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write(err) => Some(err),
            Self::Sign(err) => Some(err),
        }
    }
}

/// An error signaling that an update script could not be parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptError {
    line: usize,
    kind: ScriptErrorKind,
}

impl ScriptError {
    /// Returns the (one-based) line at which the error occurred.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ScriptErrorKind {
        &self.kind
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at line {}", self.kind, self.line)
    }
}

impl std::error::Error for ScriptError {}

/// Kinds of update script errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ScriptErrorKind {
    AfterSend,
    InvalidRecord(zone_file::Error),
    InvalidZone(name::Error),
    MisplacedPrerequisite,
    MisplacedZone,
    MissingSend,
    MissingZone,
    UnknownCommand,
}

impl From<zone_file::Error> for ScriptErrorKind {
    fn from(err: zone_file::Error) -> Self {
        Self::InvalidRecord(err)
    }
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::AfterSend => f.write_str("command after send"),
            Self::InvalidRecord(err) => write!(f, "invalid record: {}", err),
            Self::InvalidZone(err) => write!(f, "invalid zone: {}", err),
            Self::MisplacedPrerequisite => f.write_str("prerequisite after update"),
            Self::MisplacedZone => f.write_str("zone must be set once, before any command"),
            Self::MissingSend => f.write_str("script does not end with send"),
            Self::MissingZone => f.write_str("no zone set"),
            Self::UnknownCommand => f.write_str("unknown command"),
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
    use crate::message::tsig::Algorithm;
    use crate::message::{Opcode, Reader};
    use crate::rr::{Rdata, Type};

    const SCENARIO: &str = "
zone: example.com
change: a.example.com
ttl: 3600
from:
  - a.example.com. NS ns1.a.example.com
  - a.example.com. NS ns2.a.example.com
  - ns1.a.example.com A 10.0.0.1
  - ns2.a.example.com A 10.0.0.2
to:
  - a.example.com. NS ns1.a.example.com
  - a.example.com. NS ns4.a.example.com
  - ns1.a.example.com A 10.0.0.1
  - ns4.a.example.com A 10.0.0.2
";

    const GLUE_ONLY: &str = "
zone: example.com
change: a.example.com
from:
  - a.example.com. NS ns1.a.example.com
  - a.example.com. NS ns2.a.example.com
  - ns1.a.example.com A 10.0.0.1
  - ns2.a.example.com A 10.0.0.2
to:
  - a.example.com. NS ns1.a.example.com
  - a.example.com. NS ns2.a.example.com
  - ns1.a.example.com A 10.0.0.3
  - ns2.a.example.com A 10.0.0.4
";

    lazy_static! {
        static ref UPDATE: Update =
            Update::from_change_request(&ChangeRequest::from_text(SCENARIO).unwrap());
    }

    fn record(line: &str) -> Record {
        zone_file::parse_record(line).unwrap()
    }

    /// Records deleted and not added back, and records added that were
    /// not there before.
    fn net_changes(update: &Update) -> (Vec<Record>, Vec<Record>) {
        let deleted: Vec<Record> = update.deletions.iter().flat_map(Rrset::records).collect();
        let added: Vec<Record> = update.additions.iter().flat_map(Rrset::records).collect();
        (
            records_not_in(&deleted, &added),
            records_not_in(&added, &deleted),
        )
    }

    fn records_not_in(records: &[Record], others: &[Record]) -> Vec<Record> {
        records
            .iter()
            .filter(|r| {
                !others
                    .iter()
                    .any(|o| o.owner == r.owner && o.rr_type == r.rr_type && o.rdata == r.rdata)
            })
            .cloned()
            .collect()
    }

    #[test]
    fn diff_replaces_changed_rrsets() {
        assert_eq!(UPDATE.prerequisites().len(), 3);
        assert_eq!(UPDATE.deletions().len(), 2);
        assert_eq!(UPDATE.additions().len(), 2);

        let (deleted, added) = net_changes(&UPDATE);
        assert_eq!(
            deleted,
            [
                record("a.example.com. NS ns2.a.example.com."),
                record("ns2.a.example.com. A 10.0.0.2"),
            ]
        );
        assert_eq!(
            added,
            [
                record("a.example.com. 3600 NS ns4.a.example.com."),
                record("ns4.a.example.com. 3600 A 10.0.0.2"),
            ]
        );
        assert!(UPDATE.additions().iter().all(|r| r.ttl == Ttl::from(3600)));
    }

    #[test]
    fn unchanged_rrsets_are_left_alone() {
        let ns1_glue = zone_file::parse_record("ns1.a.example.com. A 10.0.0.1").unwrap();
        let touches_ns1_glue = |rrsets: &[Rrset]| {
            rrsets
                .iter()
                .any(|r| r.is_for(&ns1_glue.owner, Class::IN, Type::A))
        };
        assert!(!touches_ns1_glue(UPDATE.deletions()));
        assert!(!touches_ns1_glue(UPDATE.additions()));
        assert!(touches_ns1_glue(UPDATE.prerequisites()));
    }

    #[test]
    fn glue_only_change_keeps_ns_rrset() {
        let update = Update::from_change_request(&ChangeRequest::from_text(GLUE_ONLY).unwrap());
        assert!(update.deletions().iter().all(|r| r.rr_type == Type::A));
        assert!(update.additions().iter().all(|r| r.rr_type == Type::A));
        assert_eq!(update.deletions().len(), 2);
        assert_eq!(update.additions().len(), 2);
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let text = SCENARIO.replace("ns4", "ns2");
        let text = text.replace(
            "  - ns1.a.example.com A 10.0.0.1\n  - ns2.a.example.com A 10.0.0.2\nto:",
            "  - ns2.a.example.com A 10.0.0.2\n  - ns1.a.example.com A 10.0.0.1\nto:",
        );
        let update = Update::from_change_request(&ChangeRequest::from_text(&text).unwrap());
        assert!(update.is_empty());
        assert_eq!(update.prerequisites().len(), 3);
        assert!(update
            .operations()
            .iter()
            .all(|op| matches!(op, Operation::Prerequisite(_))));
    }

    #[test]
    fn script_has_expected_form() {
        let script = UPDATE.to_script();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "zone example.com.");
        assert_eq!(
            lines[1],
            "prereq yxrrset a.example.com. IN NS ns1.a.example.com."
        );
        assert!(lines.contains(&"update delete ns2.a.example.com. IN A 10.0.0.2"));
        assert!(lines.contains(&"update add ns4.a.example.com. 3600 IN A 10.0.0.2"));
        assert_eq!(lines.last(), Some(&"send"));
        assert_eq!(lines.len(), 1 + 4 + 3 + 3 + 1);
    }

    #[test]
    fn script_round_trips() {
        let parsed = Update::from_script(&UPDATE.to_script()).unwrap();
        assert_eq!(parsed.zone(), UPDATE.zone());
        assert_eq!(parsed.operations(), UPDATE.operations());
    }

    #[test]
    fn script_round_trips_with_source_ttls() {
        let text = SCENARIO
            .replace("  - a.example.com. NS ns", "  - a.example.com. 3600 NS ns")
            .replace("  - ns1.a.example.com A", "  - ns1.a.example.com 7200 IN A")
            .replace("  - ns2.a.example.com A", "  - ns2.a.example.com IN 300 A");
        let update = Update::from_change_request(&ChangeRequest::from_text(&text).unwrap());
        assert!(update.prerequisites().iter().all(|r| r.ttl == Ttl::MIN));
        assert!(update.deletions().iter().all(|r| r.ttl == Ttl::MIN));

        let parsed = Update::from_script(&update.to_script()).unwrap();
        assert_eq!(parsed.operations(), update.operations());
    }

    #[test]
    fn script_parsing_ignores_comments_and_blank_lines() {
        let script = "; generated\n\nzone example.com\n  update add a.example.com. 60 IN NS ns.example.net.\nsend\n\n";
        let update = Update::from_script(script).unwrap();
        assert_eq!(
            update.operations(),
            [Operation::Add(record("a.example.com. 60 NS ns.example.net."))]
        );
    }

    #[test]
    fn script_parsing_rejects_bad_scripts() {
        let kind = |script: &str| Update::from_script(script).unwrap_err().kind().clone();
        assert_eq!(
            kind("update add a.test. 60 IN NS ns.test.\nsend\n"),
            ScriptErrorKind::MissingZone
        );
        assert_eq!(kind("zone test.\n"), ScriptErrorKind::MissingSend);
        assert_eq!(
            kind("zone test.\nsend\nupdate add a.test. 60 IN NS ns.test.\n"),
            ScriptErrorKind::AfterSend
        );
        assert_eq!(
            kind("zone test.\nzone test.\nsend\n"),
            ScriptErrorKind::MisplacedZone
        );
        assert_eq!(
            kind("zone test.\nupdate add a.test. 60 IN NS ns.test.\nprereq yxrrset a.test. IN NS ns.test.\nsend\n"),
            ScriptErrorKind::MisplacedPrerequisite
        );
        assert_eq!(kind("zone test.\nshow\nsend\n"), ScriptErrorKind::UnknownCommand);

        let err = Update::from_script("zone test.\nupdate add a.test. 60 IN NS\nsend\n").unwrap_err();
        assert_eq!(err.line(), 2);
        assert!(matches!(err.kind(), ScriptErrorKind::InvalidRecord(_)));
    }

    #[test]
    fn message_has_expected_layout() {
        let message = UPDATE.to_message(0xbeef, None).unwrap();
        let reader = Reader::try_from(message.as_slice()).unwrap();
        assert_eq!(reader.id(), 0xbeef);
        assert!(!reader.qr());
        assert_eq!(reader.opcode(), Opcode::Update);
        assert_eq!(&message[4..12], &[0, 1, 0, 4, 0, 6, 0, 0]);
        assert_eq!(
            &message[12..29],
            b"\x07example\x03com\x00\x00\x06\x00\x01"
        );

        // The first prerequisite: a.example.com. NS with class IN and
        // TTL 0.
        let owner = b"\x01a\x07example\x03com\x00";
        let prerequisite = &message[29..];
        assert_eq!(&prerequisite[..15], owner);
        assert_eq!(&prerequisite[15..25], b"\x00\x02\x00\x01\x00\x00\x00\x00\x00\x13");
    }

    #[test]
    fn deletions_use_class_none() {
        let update = Update {
            zone: "test.".parse().unwrap(),
            prerequisites: Vec::new(),
            deletions: Rrset::group([record("a.test. 60 A 10.0.0.1")]),
            additions: Rrset::group([record("a.test. 60 A 10.0.0.2")]),
        };
        let message = update.to_message(1, None).unwrap();
        let deletion = &message[12 + 10..];
        assert_eq!(
            &deletion[..22],
            b"\x01a\x04test\x00\x00\x01\x00\xfe\x00\x00\x00\x00\x00\x04\x0a\x00\x00\x01"
        );
        let addition = &deletion[22..];
        assert_eq!(
            addition,
            b"\x01a\x04test\x00\x00\x01\x00\x01\x00\x00\x00\x3c\x00\x04\x0a\x00\x00\x02"
        );
    }

    #[test]
    fn message_can_be_signed() {
        let key = TsigKey::new(
            &"key.test.".parse().unwrap(),
            Algorithm::HmacSha256,
            b"secret".as_slice(),
        );
        let time_signed = TimeSigned::try_from_unix_time(1_700_000_000).unwrap();
        let unsigned = UPDATE.to_message(7, None).unwrap();
        let signed = UPDATE.to_message(7, Some((&key, time_signed))).unwrap();
        let reader = Reader::try_from(signed.as_slice()).unwrap();
        assert_eq!(reader.arcount(), 1);
        assert_eq!(&signed[12..unsigned.len()], &unsigned[12..]);
    }

    #[test]
    fn uninterpreted_data_cannot_be_encoded() {
        let update = Update {
            zone: "test.".parse().unwrap(),
            prerequisites: Vec::new(),
            deletions: Vec::new(),
            additions: vec![{
                let mut rrset = Rrset::new(
                    "a.test.".parse().unwrap(),
                    Class::IN,
                    Type::MX,
                    Ttl::from(60),
                );
                rrset.push_rdata(Rdata::Uninterpreted("10 mx.test.".into()));
                rrset
            }],
        };
        assert_eq!(
            update.to_message(1, None),
            Err(EncodeError::Write(writer::Error::InvalidRdata))
        );
    }
}
