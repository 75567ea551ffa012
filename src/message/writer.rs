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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! UPDATE messages.

use std::fmt;

use super::constants::*;
use super::Opcode;
use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer that serializes a DNS UPDATE message into
/// it.
///
/// A `Writer` is constructed using [`Writer::new`] (to set a message
/// size limit different from the underlying buffer size) or with its
/// [`TryFrom`] implementation (which sets the limit equal to the buffer
/// length). The underlying buffer and limit must be long enough to
/// accommodate a full DNS message header of 12 octets. The message
/// header is initially zeroed, except for the opcode, which is set to
/// UPDATE.
///
/// [RFC 2136 § 2] renames the four sections of a DNS message for
/// UPDATE: the zone, prerequisite, update, and additional data
/// sections. This writer fills the first three; the additional section
/// is left empty for [`sign_request`](super::tsig::sign_request).
/// Records are written sequentially, so the methods
///
/// * [`Writer::add_zone`];
/// * [`Writer::add_prerequisite_rr`]; and
/// * [`Writer::add_update_rr`]
///
/// must be used in that order. Attempts to use them out of order will
/// fail with [`Error::OutOfOrder`]. Domain names are never compressed.
///
/// [RFC 2136 § 2]: https://datatracker.ietf.org/doc/html/rfc2136#section-2
pub struct Writer<'a> {
    octets: &'a mut [u8],
    cursor: usize,
    limit: usize,
    section: Section,
    zocount: u16,
    prcount: u16,
    upcount: u16,
}

/// A type for recording which section of an UPDATE message a
/// [`Writer`] is currently serializing.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    Zone,
    Prerequisite,
    Update,
}

impl<'a> Writer<'a> {
    /// Creates a new `Writer` from the underlying buffer `octets`. The
    /// message size is limited to `limit` or `octets.len()` (whichever
    /// is smaller). If the smaller limit is too small to hold a full
    /// DNS message header of 12 octets, then this will fail.
    pub fn new(octets: &'a mut [u8], limit: usize) -> Result<Self> {
        let limit = limit.min(octets.len());
        if limit < HEADER_SIZE {
            Err(Error::Truncation)
        } else {
            octets[0..HEADER_SIZE].fill(0);
            let mut writer = Self {
                octets,
                cursor: HEADER_SIZE,
                limit,
                section: Section::Zone,
                zocount: 0,
                prcount: 0,
                upcount: 0,
            };
            writer.set_opcode(Opcode::Update);
            Ok(writer)
        }
    }

    /// Returns the current 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.octets[ID_START], self.octets[ID_START + 1]])
    }

    /// Sets the 16-bit ID of the message.
    pub fn set_id(&mut self, id: u16) {
        self.write_u16(ID_START, id);
    }

    /// Returns the message's current opcode.
    pub fn opcode(&self) -> Opcode {
        let raw = (self.octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT;
        Opcode::try_from(raw).unwrap_or(Opcode::Unassigned(raw))
    }

    /// Sets the message's opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.octets[OPCODE_BYTE] &= !OPCODE_MASK;
        self.octets[OPCODE_BYTE] |= u8::from(opcode) << OPCODE_SHIFT;
    }

    /// Returns the current number of zone records in the message.
    pub fn zocount(&self) -> u16 {
        self.zocount
    }

    /// Returns the current number of prerequisite RRs in the message.
    pub fn prcount(&self) -> u16 {
        self.prcount
    }

    /// Returns the current number of update RRs in the message.
    pub fn upcount(&self) -> u16 {
        self.upcount
    }

    /// Adds the zone record (`<zone> SOA <class>`) to the message.
    /// [RFC 2136 § 2.3] requires exactly one, and this must be used
    /// before any resource records are added.
    ///
    /// [RFC 2136 § 2.3]: https://datatracker.ietf.org/doc/html/rfc2136#section-2.3
    pub fn add_zone(&mut self, zone: &Name, class: Class) -> Result<()> {
        if self.section != Section::Zone {
            Err(Error::OutOfOrder)
        } else if let Some(new_zocount) = self.zocount.checked_add(1) {
            self.with_rollback(|this| {
                this.try_push(zone.wire_repr())?;
                this.try_push_u16(Type::SOA.into())?;
                this.try_push_u16(class.into())
            })?;
            self.zocount = new_zocount;
            Ok(())
        } else {
            Err(Error::CountOverflow)
        }
    }

    /// Adds a resource record to the prerequisite section.
    pub fn add_prerequisite_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &Rdata,
    ) -> Result<()> {
        self.add_rr_to(Section::Prerequisite, owner, rr_type, class, ttl, rdata)
    }

    /// Adds a resource record to the update section.
    pub fn add_update_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &Rdata,
    ) -> Result<()> {
        self.add_rr_to(Section::Update, owner, rr_type, class, ttl, rdata)
    }

    /// Adds a resource record to `section` atomically, checking the
    /// section order and the section's counter.
    fn add_rr_to(
        &mut self,
        section: Section,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &Rdata,
    ) -> Result<()> {
        if self.section > section {
            return Err(Error::OutOfOrder);
        }
        let new_count = self
            .count_mut(section)
            .checked_add(1)
            .ok_or(Error::CountOverflow)?;
        self.with_rollback(|this| {
            this.section = section;
            this.add_rr(owner, rr_type, class, ttl, rdata)
        })?;
        *self.count_mut(section) = new_count;
        Ok(())
    }

    fn count_mut(&mut self, section: Section) -> &mut u16 {
        match section {
            Section::Zone => &mut self.zocount,
            Section::Prerequisite => &mut self.prcount,
            Section::Update => &mut self.upcount,
        }
    }

    /// Writes out an RR at the current cursor. This is for internal
    /// use: the write is not done atomically and may change the cursor
    /// even when an error is returned. This is intended to be used with
    /// [`Writer::with_rollback`].
    fn add_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &Rdata,
    ) -> Result<()> {
        let rdata = rdata.wire_repr().ok_or(Error::InvalidRdata)?;
        self.try_push(owner.wire_repr())?;
        self.try_push_u16(rr_type.into())?;
        self.try_push_u16(class.into())?;
        self.try_push_u32(ttl.into())?;
        self.try_push_u16(rdata.len() as u16)?;
        self.try_push(&rdata)
    }

    /// Finishes writing the message, filling in the section counts. The
    /// final length of the message is returned.
    pub fn finish(mut self) -> usize {
        self.write_u16(QDCOUNT_START, self.zocount);
        self.write_u16(ANCOUNT_START, self.prcount);
        self.write_u16(NSCOUNT_START, self.upcount);
        self.cursor
    }

    /// Executes `f(self)`, returning the result and rolling back the
    /// section and cursor to the current values first if the result is
    /// an error.
    fn with_rollback<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_section = self.section;
        let saved_cursor = self.cursor;
        let result = f(self);
        if result.is_err() {
            self.section = saved_section;
            self.cursor = saved_cursor;
        }
        result
    }

    /// Tries to write `data` to the underlying buffer at the current
    /// cursor, failing if there is not sufficient space.
    fn try_push(&mut self, data: &[u8]) -> Result<()> {
        if self.limit - self.cursor >= data.len() {
            self.write(self.cursor, data);
            self.cursor += data.len();
            Ok(())
        } else {
            Err(Error::Truncation)
        }
    }

    fn try_push_u16(&mut self, data: u16) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    fn try_push_u32(&mut self, data: u32) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Writes `data` to the underlying buffer at `position`. Note that
    /// this performs no bounds checking.
    fn write(&mut self, position: usize, data: &[u8]) {
        self.octets[position..position + data.len()].copy_from_slice(data);
    }

    fn write_u16(&mut self, position: usize, data: u16) {
        self.write(position, &data.to_be_bytes());
    }
}

impl<'a> TryFrom<&'a mut [u8]> for Writer<'a> {
    type Error = Error;

    fn try_from(octets: &'a mut [u8]) -> Result<Self> {
        let limit = octets.len();
        Self::new(octets, limit)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a [`Writer`] operation could not be
/// performed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Adding the resource record would overflow the corresponding
    /// 16-bit counter in the DNS header.
    CountOverflow,

    /// There is not enough room left in the buffer.
    Truncation,

    /// An attempt was made to serialize a record in the wrong place in
    /// the message (e.g., adding a prerequisite after an update).
    OutOfOrder,

    /// The RDATA cannot be put on the wire.
    InvalidRdata,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::CountOverflow => f.write_str("record count would overflow"),
            Self::Truncation => f.write_str("message would be truncated"),
            Self::OutOfOrder => f.write_str("record serialized out of order"),
            Self::InvalidRdata => f.write_str("RDATA cannot be serialized"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use lazy_static::lazy_static;

    use super::*;

    lazy_static! {
        static ref ZONE: Name = "test.".parse().unwrap();
        static ref OWNER: Name = "a.test.".parse().unwrap();
        static ref RDATA: Rdata = Rdata::A(Ipv4Addr::new(127, 0, 0, 1));
    }

    #[test]
    fn writer_works() {
        // This is not meant to be exhaustive by any means. Rather, it's
        // just a check that the Writer works in a basic scenario.
        let mut buf = vec![0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(0x0703);
        writer.add_zone(&ZONE, Class::IN).unwrap();
        writer
            .add_prerequisite_rr(&OWNER, Type::A, Class::IN, Ttl::from(0), &RDATA)
            .unwrap();
        writer
            .add_update_rr(&OWNER, Type::A, Class::NONE, Ttl::from(0), &RDATA)
            .unwrap();
        assert_eq!(writer.opcode(), Opcode::Update);
        let len = writer.finish();
        assert_eq!(
            &buf[0..len],
            b"\x07\x03\x28\x00\x00\x01\x00\x01\x00\x01\x00\x00\
              \x04test\x00\x00\x06\x00\x01\
              \x01a\x04test\x00\x00\x01\x00\x01\x00\x00\x00\x00\x00\x04\x7f\x00\x00\x01\
              \x01a\x04test\x00\x00\x01\x00\xfe\x00\x00\x00\x00\x00\x04\x7f\x00\x00\x01"
        );
    }

    #[test]
    fn writer_enforces_section_order() {
        let mut buf = [0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_zone(&ZONE, Class::IN).unwrap();
        writer
            .add_update_rr(&OWNER, Type::A, Class::IN, Ttl::from(60), &RDATA)
            .unwrap();
        assert_eq!(
            writer.add_prerequisite_rr(&OWNER, Type::A, Class::IN, Ttl::from(0), &RDATA),
            Err(Error::OutOfOrder)
        );
        assert_eq!(writer.add_zone(&ZONE, Class::IN), Err(Error::OutOfOrder));
        assert_eq!(writer.prcount(), 0);
        assert_eq!(writer.upcount(), 1);
    }

    #[test]
    fn writer_rolls_back_on_truncation() {
        let mut buf = [0; 40];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_zone(&ZONE, Class::IN).unwrap();
        assert_eq!(
            writer.add_update_rr(&OWNER, Type::A, Class::IN, Ttl::from(60), &RDATA),
            Err(Error::Truncation)
        );
        assert_eq!(writer.upcount(), 0);
        assert_eq!(writer.finish(), HEADER_SIZE + 10);
    }

    #[test]
    fn writer_leaves_additional_section_empty() {
        let mut buf = [0xff; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_zone(&ZONE, Class::IN).unwrap();
        writer
            .add_update_rr(&OWNER, Type::A, Class::IN, Ttl::from(60), &RDATA)
            .unwrap();
        writer.finish();
        assert_eq!(&buf[ARCOUNT_START..ARCOUNT_END], &[0, 0]);
    }

    #[test]
    fn writer_rejects_uninterpreted_rdata() {
        let mut buf = [0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_zone(&ZONE, Class::IN).unwrap();
        let rdata = Rdata::Uninterpreted("10 mx.test.".into());
        assert_eq!(
            writer.add_update_rr(&OWNER, Type::MX, Class::IN, Ttl::from(60), &rdata),
            Err(Error::InvalidRdata)
        );
    }

    #[test]
    fn writer_constructor_rejects_short_buffer() {
        let mut buf = [0; HEADER_SIZE - 1];
        assert!(matches!(
            Writer::try_from(buf.as_mut_slice()),
            Err(Error::Truncation)
        ));
    }
}
