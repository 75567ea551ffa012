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

//! Implementation of the [`NameBuilder`] structure.

use arrayvec::ArrayVec;

use super::{Error, Name, MAX_LABEL_LEN, MAX_N_LABELS, MAX_WIRE_LEN};

/// A facility to build [`Name`]s one octet or label at a time.
///
/// The `NameBuilder` constructs the on-the-wire representation and
/// label offset array for a [`Name`] using fixed-size internal buffers
/// that are long enough to accomodate any valid name, so that the only
/// heap allocations happen when the name is finished.
///
/// A new `NameBuilder` starts with a single null label. If the build is
/// finished at this point, the name of the DNS root is constructed:
///
/// ```
/// use ddnsmulti::name::{Name, NameBuilder};
/// assert_eq!(&NameBuilder::new().finish().unwrap(), Name::root());
/// ```
///
/// Single octets can be added to the most recent label using
/// [`NameBuilder::try_push`]. Multiple octets can be added at a time
/// using [`NameBuilder::try_push_slice`]. A new label is started using
/// [`NameBuilder::next_label`]. If any call to these methods would
/// result in an invalid domain name, an error is returned.
pub struct NameBuilder {
    wire_repr: ArrayVec<u8, MAX_WIRE_LEN>,
    label_offsets: ArrayVec<u8, MAX_N_LABELS>,
    label_start: usize,
    label_len: u8,
}

impl NameBuilder {
    /// Constructs a new `NameBuilder`, which initially contains a
    /// single null label.
    pub fn new() -> Self {
        let mut wire_repr = ArrayVec::new();
        wire_repr.push(0);
        let mut label_offsets = ArrayVec::new();
        label_offsets.push(0);
        Self {
            wire_repr,
            label_offsets,
            label_start: 0,
            label_len: 0,
        }
    }

    /// Determines whether the name currently stored in the
    /// `NameBuilder` is a fully qualified domain name, that is, whether
    /// it ends with the null label.
    pub fn is_fully_qualified(&self) -> bool {
        self.label_len == 0
    }

    /// Tries to add the given octet to the current label. This will
    /// fail if doing so would make the label or name too long. In the
    /// error case, the `NameBuilder`'s state remains unchanged.
    pub fn try_push(&mut self, octet: u8) -> Result<(), Error> {
        if self.label_len >= (MAX_LABEL_LEN as u8) {
            Err(Error::LabelTooLong)
        } else if self.wire_repr.try_push(octet).is_ok() {
            self.label_len += 1;
            Ok(())
        } else {
            Err(Error::NameTooLong)
        }
    }

    /// Tries to add the given slice to the current label. This will
    /// fail if doing so would make the label or name too long. In the
    /// error case, the `NameBuilder`'s state remains unchanged.
    pub fn try_push_slice(&mut self, octets: &[u8]) -> Result<(), Error> {
        if (self.label_len as usize) + octets.len() > MAX_LABEL_LEN {
            Err(Error::LabelTooLong)
        } else if self.wire_repr.try_extend_from_slice(octets).is_ok() {
            self.label_len += octets.len() as u8;
            Ok(())
        } else {
            Err(Error::NameTooLong)
        }
    }

    /// Finishes the current label and starts a new one. If the current
    /// label is null, this fails, since only the last label in a domain
    /// name may be null. Likewise, if this makes the domain name too
    /// long, this fails. In the error case, the `NameBuilder`'s state
    /// remains unchanged.
    pub fn next_label(&mut self) -> Result<(), Error> {
        if self.is_fully_qualified() {
            Err(Error::NullNonTerminal)
        } else if self.wire_repr.is_full() || self.label_offsets.is_full() {
            Err(Error::NameTooLong)
        } else {
            self.wire_repr[self.label_start] = self.label_len;
            self.label_start = self.wire_repr.len();
            self.label_len = 0;
            self.wire_repr.push(0);
            self.label_offsets.push(self.label_start as u8);
            Ok(())
        }
    }

    /// Finishes the construction of the domain name, returning the
    /// final [`Name`] and consuming the `NameBuilder`. Since the last
    /// label of a domain name must be null, this fails if that is not
    /// the case.
    pub fn finish(self) -> Result<Name, Error> {
        if !self.is_fully_qualified() {
            Err(Error::NonNullTerminal)
        } else {
            Ok(Name {
                wire_repr: self.wire_repr.as_slice().into(),
                label_offsets: self.label_offsets.as_slice().into(),
            })
        }
    }
}

impl Default for NameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
