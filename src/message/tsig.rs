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

//! Signing of requests with Secret Key Authentication for DNS (TSIG),
//! as specified by [RFC 8945].
//!
//! A request is signed by appending a TSIG pseudo-RR to the additional
//! section of an otherwise complete message with [`sign_request`]. The
//! key is described by a [`TsigKey`], which pairs the key name and
//! secret with one of the supported [`Algorithm`]s.
//!
//! Responses are not verified. The response code of an UPDATE response
//! is all that is needed to decide whether a server accepted it, and a
//! server that rejects the signature says so through that code.
//!
//! [RFC 8945]: https://datatracker.ietf.org/doc/html/rfc8945

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hmac::digest::{InvalidLength, OutputSizeUser};
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use super::constants::*;
use crate::class::Class;
use crate::name::Name;
use crate::rr::Type;

/// The fudge value recommended by [RFC 8945 § 10].
///
/// [RFC 8945 § 10]: https://datatracker.ietf.org/doc/html/rfc8945#section-10
pub const DEFAULT_FUDGE: u16 = 300;

////////////////////////////////////////////////////////////////////////
// TSIG ALGORITHMS                                                    //
////////////////////////////////////////////////////////////////////////

/// A supported TSIG algorithm.
///
/// These are the HMAC algorithms listed in [RFC 8945 § 6]. The
/// truncated variants compute the full HMAC and keep its leftmost
/// octets.
///
/// [RFC 8945 § 6]: https://datatracker.ietf.org/doc/html/rfc8945#section-6
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Algorithm {
    HmacSha1,
    HmacSha224,
    HmacSha256,
    HmacSha256_128,
    HmacSha384,
    HmacSha384_192,
    HmacSha512,
    HmacSha512_256,
}

/// Every supported algorithm, paired with its mnemonic.
const ALGORITHMS: [(Algorithm, &str); 8] = [
    (Algorithm::HmacSha1, "hmac-sha1"),
    (Algorithm::HmacSha224, "hmac-sha224"),
    (Algorithm::HmacSha256, "hmac-sha256"),
    (Algorithm::HmacSha256_128, "hmac-sha256-128"),
    (Algorithm::HmacSha384, "hmac-sha384"),
    (Algorithm::HmacSha384_192, "hmac-sha384-192"),
    (Algorithm::HmacSha512, "hmac-sha512"),
    (Algorithm::HmacSha512_256, "hmac-sha512-256"),
];

lazy_static! {
    static ref ALGORITHM_NAMES: HashMap<Algorithm, Name> = ALGORITHMS
        .iter()
        .filter_map(|(algorithm, mnemonic)| Some((*algorithm, mnemonic.parse().ok()?)))
        .collect();
    static ref ALGORITHMS_BY_NAME: HashMap<&'static Name, Algorithm> = ALGORITHM_NAMES
        .iter()
        .map(|(algorithm, name)| (name, *algorithm))
        .collect();
}

impl Algorithm {
    /// Returns the name assigned (by [RFC 8945 § 6]) to identify this
    /// algorithm.
    ///
    /// [RFC 8945 § 6]: https://datatracker.ietf.org/doc/html/rfc8945#section-6
    pub fn name(&self) -> &'static Name {
        ALGORITHM_NAMES.get(self).unwrap_or_else(|| Name::root())
    }

    /// Returns the mnemonic of this algorithm (its name without the
    /// trailing dot).
    pub fn mnemonic(&self) -> &'static str {
        ALGORITHMS
            .iter()
            .find(|(algorithm, _)| algorithm == self)
            .map_or("", |(_, mnemonic)| mnemonic)
    }

    /// Returns the size of the MAC produced by this algorithm, after
    /// any truncation.
    pub fn mac_size(&self) -> usize {
        match self {
            Self::HmacSha1 => Hmac::<Sha1>::output_size(),
            Self::HmacSha224 => Hmac::<Sha224>::output_size(),
            Self::HmacSha256 => Hmac::<Sha256>::output_size(),
            Self::HmacSha256_128 => 16,
            Self::HmacSha384 => Hmac::<Sha384>::output_size(),
            Self::HmacSha384_192 => 24,
            Self::HmacSha512 => Hmac::<Sha512>::output_size(),
            Self::HmacSha512_256 => 32,
        }
    }

    /// Finds an algorithm by its name. This returns `None` if the
    /// algorithm is not defined or not supported by this
    /// implementation.
    pub fn from_name(name: &Name) -> Option<Self> {
        ALGORITHMS_BY_NAME.get(name).copied()
    }

    /// Creates a MAC authenticator to compute a MAC with this algorithm
    /// and the given key.
    fn make_authenticator(&self, key: &[u8]) -> Result<Box<dyn Authenticator>, InvalidLength> {
        Ok(match self {
            Self::HmacSha1 => Box::new(Hmac::<Sha1>::new_from_slice(key)?),
            Self::HmacSha224 => Box::new(Hmac::<Sha224>::new_from_slice(key)?),
            Self::HmacSha256 | Self::HmacSha256_128 => {
                Box::new(Hmac::<Sha256>::new_from_slice(key)?)
            }
            Self::HmacSha384 | Self::HmacSha384_192 => {
                Box::new(Hmac::<Sha384>::new_from_slice(key)?)
            }
            Self::HmacSha512 | Self::HmacSha512_256 => {
                Box::new(Hmac::<Sha512>::new_from_slice(key)?)
            }
        })
    }
}

/// Algorithms are parsed from their names, with or without a trailing
/// dot, ignoring case.
impl FromStr for Algorithm {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let name: Name = text.parse().or(Err("not a valid algorithm name"))?;
        Self::from_name(&name).ok_or("unknown or unsupported TSIG algorithm")
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// An abstraction over different MAC implementations. This wraps the
/// `digest` crate's [`Mac`] trait to give us an object-safe trait (so
/// that we can use `Box<dyn Authenticator>`).
trait Authenticator {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

impl<M> Authenticator for M
where
    M: Mac,
{
    fn update(&mut self, data: &[u8]) {
        <Self as Mac>::update(self, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        <Self as Mac>::finalize(*self).into_bytes().to_vec()
    }
}

////////////////////////////////////////////////////////////////////////
// KEYS                                                               //
////////////////////////////////////////////////////////////////////////

/// A TSIG key shared with a nameserver.
#[derive(Clone, Eq, PartialEq)]
pub struct TsigKey {
    name: Name,
    algorithm: Algorithm,
    secret: Box<[u8]>,
}

impl TsigKey {
    /// Creates a new `TsigKey`. Key names are compared in lowercase
    /// ([RFC 8945 § 4.3.3]), so the name is stored that way.
    ///
    /// [RFC 8945 § 4.3.3]: https://datatracker.ietf.org/doc/html/rfc8945#section-4.3.3
    pub fn new(name: &Name, algorithm: Algorithm, secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            algorithm,
            secret: secret.into(),
        }
    }

    /// Returns the (lowercase) key name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the algorithm used with this key.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<redacted>")
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// TSIG TIME-SIGNED FIELD                                             //
////////////////////////////////////////////////////////////////////////

/// A convenience type for working with the TSIG "time signed" field.
///
/// The "time signed" field is represented on the wire as an unsigned
/// 48-bit big-endian integer giving the number of seconds since the
/// Unix epoch, not counting leap seconds. This type converts between
/// that on-the-wire format (the internal representation), Unix time
/// expressed with a [`u64`], and [`DateTime<Utc>`].
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct TimeSigned([u8; 6]);

impl TimeSigned {
    /// Converts Unix time expressed as a [`u64`] into a `TimeSigned`.
    /// This fails if the conversion would truncate the time.
    pub fn try_from_unix_time(seconds: u64) -> Result<Self, UnrepresentableTimeError> {
        match seconds.to_be_bytes() {
            [0, 0, rest @ ..] => Ok(Self(rest)),
            _ => Err(UnrepresentableTimeError),
        }
    }

    /// Returns the current time as a `TimeSigned`.
    pub fn now() -> Result<Self, UnrepresentableTimeError> {
        Self::try_from(Utc::now())
    }

    /// Converts a `TimeSigned` into Unix time expressed as a [`u64`].
    pub fn to_unix_time(self) -> u64 {
        let mut octets = [0; 8];
        octets[2..8].copy_from_slice(self.0.as_slice());
        u64::from_be_bytes(octets)
    }

    /// Borrows the internal representation (an unsigned 48-bit
    /// big-endian integer) as a slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl TryFrom<DateTime<Utc>> for TimeSigned {
    type Error = UnrepresentableTimeError;

    fn try_from(time: DateTime<Utc>) -> Result<Self, Self::Error> {
        let seconds = u64::try_from(time.timestamp()).or(Err(UnrepresentableTimeError))?;
        Self::try_from_unix_time(seconds)
    }
}

impl fmt::Debug for TimeSigned {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_unix_time())
    }
}

/// An error signifying that a time cannot be represented in the TSIG
/// "time signed" field.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct UnrepresentableTimeError;

impl fmt::Display for UnrepresentableTimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("time is not representable as a TSIG time")
    }
}

impl std::error::Error for UnrepresentableTimeError {}

////////////////////////////////////////////////////////////////////////
// SIGNING                                                            //
////////////////////////////////////////////////////////////////////////

/// Signs a complete request message with `key`, appending the TSIG RR
/// to its additional section and incrementing ARCOUNT. The TSIG
/// original ID is the message's current ID. The computed MAC is
/// returned.
///
/// The message must not grow beyond 65,535 octets.
pub fn sign_request(
    message: &mut Vec<u8>,
    key: &TsigKey,
    time_signed: TimeSigned,
    fudge: u16,
) -> Result<Vec<u8>, SignError> {
    if message.len() < HEADER_SIZE {
        return Err(SignError::HeaderTooShort);
    }
    let original_id = read_u16(message, ID_START);
    let arcount = read_u16(message, ARCOUNT_START)
        .checked_add(1)
        .ok_or(SignError::CountOverflow)?;
    let algorithm = key.algorithm.name();

    // RFC 8945 § 4.3: the MAC covers the message as it was before the
    // TSIG RR was added, then the TSIG variables.
    let mut authenticator = key
        .algorithm
        .make_authenticator(&key.secret)
        .or(Err(SignError::InvalidKey))?;
    authenticator.update(message);
    authenticator.update(key.name.wire_repr());
    authenticator.update(&u16::from(Class::ANY).to_be_bytes());
    authenticator.update(&0u32.to_be_bytes());
    authenticator.update(algorithm.wire_repr());
    authenticator.update(time_signed.as_slice());
    authenticator.update(&fudge.to_be_bytes());
    authenticator.update(&0u16.to_be_bytes());
    authenticator.update(&0u16.to_be_bytes());
    let mut mac = authenticator.finalize();
    mac.truncate(key.algorithm.mac_size());

    let rdlength = algorithm.wire_repr().len() + mac.len() + 16;
    let rr_len = key.name.wire_repr().len() + 10 + rdlength;
    if message.len() + rr_len > u16::MAX as usize {
        return Err(SignError::Truncation);
    }

    message.reserve(rr_len);
    message.extend_from_slice(key.name.wire_repr());
    message.extend_from_slice(&u16::from(Type::TSIG).to_be_bytes());
    message.extend_from_slice(&u16::from(Class::ANY).to_be_bytes());
    message.extend_from_slice(&0u32.to_be_bytes());
    message.extend_from_slice(&(rdlength as u16).to_be_bytes());
    message.extend_from_slice(algorithm.wire_repr());
    message.extend_from_slice(time_signed.as_slice());
    message.extend_from_slice(&fudge.to_be_bytes());
    message.extend_from_slice(&(mac.len() as u16).to_be_bytes());
    message.extend_from_slice(&mac);
    message.extend_from_slice(&original_id.to_be_bytes());
    message.extend_from_slice(&0u16.to_be_bytes());
    message.extend_from_slice(&0u16.to_be_bytes());
    message[ARCOUNT_START..ARCOUNT_END].copy_from_slice(&arcount.to_be_bytes());
    Ok(mac)
}

fn read_u16(message: &[u8], position: usize) -> u16 {
    u16::from_be_bytes([message[position], message[position + 1]])
}

/// An error signaling that a message could not be signed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignError {
    /// The message is shorter than a DNS header.
    HeaderTooShort,

    /// The message already has 65,535 additional records.
    CountOverflow,

    /// The signed message would be longer than 65,535 octets.
    Truncation,

    /// The key cannot be used with the algorithm.
    InvalidKey,
}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HeaderTooShort => f.write_str("message header too short"),
            Self::CountOverflow => f.write_str("additional record count would overflow"),
            Self::Truncation => f.write_str("signed message would be too long"),
            Self::InvalidKey => f.write_str("invalid TSIG key"),
        }
    }
}

impl std::error::Error for SignError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
