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

//! Delivery of queued change requests to nameservers.
//!
//! [`dispatch_entry`] sends the UPDATE for one [`QueueEntry`] to every
//! configured [`Nameserver`] that has not yet accepted it, recording the
//! outcome of each attempt in the entry. Nameservers whose last attempt
//! failed are tried again; nameservers that accepted the change are
//! skipped. A failure for one nameserver never stops delivery to the
//! others.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::Utc;
use log::{debug, info, warn};

use crate::message::reader::{self, Reader};
use crate::message::tsig::{TimeSigned, TsigKey, UnrepresentableTimeError};
use crate::message::{Opcode, Rcode};
use crate::queue::QueueEntry;
use crate::transport::{self, Transport};
use crate::update::{EncodeError, Update};

/// The port nameservers listen on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 53;

////////////////////////////////////////////////////////////////////////
// NAMESERVERS                                                        //
////////////////////////////////////////////////////////////////////////

/// A nameserver that change requests are sent to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Nameserver {
    pub address: IpAddr,
    pub port: u16,
    pub tsig: Option<TsigKey>,
}

impl Nameserver {
    /// Creates a `Nameserver` on the default port, without TSIG.
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            port: DEFAULT_PORT,
            tsig: None,
        }
    }

    /// Returns the socket address to send updates to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Returns the key under which delivery to this nameserver is
    /// recorded in a [`QueueEntry`]. This is the textual address; the
    /// port is not part of it.
    pub fn delivery_key(&self) -> String {
        self.address.to_string()
    }
}

////////////////////////////////////////////////////////////////////////
// SENDING UPDATES                                                    //
////////////////////////////////////////////////////////////////////////

/// Sends `update` to `nameserver`, signed with the nameserver's TSIG key
/// if it has one, and returns the RCODE of the response.
///
/// The response must be an UPDATE response with the ID of the request.
/// Its TSIG record, if any, is not verified.
pub fn send_update(
    update: &Update,
    nameserver: &Nameserver,
    transport: &mut impl Transport,
) -> Result<Rcode, Error> {
    let id = rand::random();
    let tsig = match nameserver.tsig {
        Some(ref key) => Some((key, TimeSigned::now()?)),
        None => None,
    };
    let request = update.to_message(id, tsig)?;
    let response = transport.exchange(nameserver.socket_addr(), &request)?;

    let reader = Reader::try_from(response.as_slice())?;
    if reader.id() != id {
        Err(Error::IdMismatch {
            expected: id,
            received: reader.id(),
        })
    } else if !reader.qr() {
        Err(Error::NotAResponse)
    } else if reader.opcode() != Opcode::Update {
        Err(Error::UnexpectedOpcode(reader.opcode()))
    } else {
        debug!(
            "Received {}-octet response from {}",
            response.len(),
            nameserver.socket_addr()
        );
        Ok(reader.rcode())
    }
}

/// The outcome of delivering a change request to one nameserver.
#[derive(Debug)]
pub enum Outcome {
    /// The nameserver accepted the update.
    Accepted,

    /// The nameserver answered with a non-zero RCODE.
    Rejected(Rcode),

    /// The nameserver refused the connection.
    ConnectionRefused,

    /// Any other failure.
    Failed(Error),

    /// The nameserver had already accepted the change.
    Skipped,
}

impl Outcome {
    /// Returns whether the change is now known to be accepted by the
    /// nameserver.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Accepted | Self::Skipped)
    }
}

/// Delivers `entry` to each of `nameservers` that still needs it,
/// recording the results in `entry`. Returns the outcome for each
/// nameserver, in order.
pub fn dispatch_entry(
    entry: &mut QueueEntry,
    nameservers: &[Nameserver],
    transport: &mut impl Transport,
) -> Vec<Outcome> {
    let update = Update::from_change_request(entry.change_request());
    let change = entry.change_request().change().clone();

    let mut outcomes = Vec::with_capacity(nameservers.len());
    for nameserver in nameservers {
        let address = nameserver.delivery_key();
        if !entry.needs_delivery(&address) {
            info!("{} already processed, skipped", address);
            outcomes.push(Outcome::Skipped);
            continue;
        }

        info!(
            "{} ({}) scheduled for update via {}",
            entry.identity(),
            change,
            address
        );
        let outcome = match send_update(&update, nameserver, transport) {
            Ok(rcode) if rcode.is_success() => Outcome::Accepted,
            Ok(rcode) => Outcome::Rejected(rcode),
            Err(Error::Transport(transport::Error::ConnectionRefused)) => Outcome::ConnectionRefused,
            Err(err) => Outcome::Failed(err),
        };

        match outcome {
            Outcome::Accepted => {
                entry.mark_succeeded(&address, Utc::now());
                info!("{} ({}) accepted by {}", entry.identity(), change, address);
            }
            Outcome::Rejected(rcode) => {
                entry.mark_failed(&address);
                warn!(
                    "{} ({}) not accepted by {} ({})",
                    entry.identity(),
                    change,
                    address,
                    rcode
                );
            }
            Outcome::ConnectionRefused => {
                entry.mark_failed(&address);
                warn!(
                    "{} ({}) connection refused by {}",
                    entry.identity(),
                    change,
                    address
                );
            }
            Outcome::Failed(ref err) => {
                entry.mark_failed(&address);
                warn!(
                    "{} ({}) not delivered to {}: {}",
                    entry.identity(),
                    change,
                    address,
                    err
                );
            }
            Outcome::Skipped => (),
        }
        outcomes.push(outcome);
    }
    outcomes
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that an update could not be delivered.
#[derive(Debug)]
pub enum Error {
    /// The update could not be encoded.
    Encode(EncodeError),

    /// The current time cannot be used for TSIG.
    Time(UnrepresentableTimeError),

    /// The exchange with the nameserver failed.
    Transport(transport::Error),

    /// The response is too short to be a DNS message.
    MalformedResponse(reader::Error),

    /// The response ID does not match the request ID.
    IdMismatch { expected: u16, received: u16 },

    /// The QR bit of the response is not set.
    NotAResponse,

    /// The response opcode is not UPDATE.
    UnexpectedOpcode(Opcode),
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<UnrepresentableTimeError> for Error {
    fn from(err: UnrepresentableTimeError) -> Self {
        Self::Time(err)
    }
}

impl From<transport::Error> for Error {
    fn from(err: transport::Error) -> Self {
        Self::Transport(err)
    }
}

impl From<reader::Error> for Error {
    fn from(err: reader::Error) -> Self {
        Self::MalformedResponse(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Encode(err) => write!(f, "failed to encode update: {}", err),
            Self::Time(err) => err.fmt(f),
            Self::Transport(err) => err.fmt(f),
            Self::MalformedResponse(err) => write!(f, "malformed response: {}", err),
            Self::IdMismatch { expected, received } => write!(
                f,
                "response ID {} does not match request ID {}",
                received, expected
            ),
            Self::NotAResponse => f.write_str("reply is not a response"),
            Self::UnexpectedOpcode(opcode) => write!(f, "response has opcode {}", opcode),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(err) => Some(err),
            Self::Time(err) => Some(err),
            Self::Transport(err) => Some(err),
            Self::MalformedResponse(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
