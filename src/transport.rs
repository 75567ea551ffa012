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

//! Blocking DNS-over-TCP exchanges.
//!
//! The dispatcher talks to nameservers only through the [`Transport`]
//! trait, so that tests can substitute an in-memory implementation.
//! [`TcpTransport`] is the real one: it sends a request over a new TCP
//! connection, framed with the two-octet length prefix of
//! [RFC 1035 § 4.2.2], and waits for a single response. The whole
//! exchange must finish within the configured timeout. There are no
//! retries.
//!
//! [RFC 1035 § 4.2.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// How long an exchange may take by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

////////////////////////////////////////////////////////////////////////
// TRANSPORT TRAIT                                                    //
////////////////////////////////////////////////////////////////////////

/// A way of sending a DNS request to a server and receiving its
/// response.
pub trait Transport {
    /// Sends `request` to `server`, returning the response message.
    fn exchange(&mut self, server: SocketAddr, request: &[u8]) -> Result<Vec<u8>, Error>;
}

////////////////////////////////////////////////////////////////////////
// TCP TRANSPORT                                                      //
////////////////////////////////////////////////////////////////////////

/// A [`Transport`] that uses one blocking TCP connection per exchange.
#[derive(Clone, Copy, Debug)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    /// Creates a new `TcpTransport` whose exchanges time out after
    /// `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, server: SocketAddr, request: &[u8]) -> Result<Vec<u8>, Error> {
        let request_len = u16::try_from(request.len()).or(Err(Error::RequestTooLong))?;
        let deadline = Instant::now() + self.timeout;

        let mut socket = TcpStream::connect_timeout(&server, self.timeout).map_err(Error::from_io)?;
        socket
            .set_write_timeout(Some(remaining(deadline)?))
            .map_err(Error::from_io)?;
        let mut framed = Vec::with_capacity(2 + request.len());
        framed.extend_from_slice(&request_len.to_be_bytes());
        framed.extend_from_slice(request);
        socket.write_all(&framed).map_err(Error::from_io)?;

        let mut len_buf = [0; 2];
        read_exact_by(&mut socket, &mut len_buf, deadline)?;
        let mut response = vec![0; u16::from_be_bytes(len_buf) as usize];
        read_exact_by(&mut socket, &mut response, deadline)?;
        Ok(response)
    }
}

/// Fills `buf` from `socket`, failing if `deadline` passes first.
fn read_exact_by(socket: &mut TcpStream, buf: &mut [u8], deadline: Instant) -> Result<(), Error> {
    let mut n_read = 0;
    while n_read < buf.len() {
        socket
            .set_read_timeout(Some(remaining(deadline)?))
            .map_err(Error::from_io)?;
        match socket.read(&mut buf[n_read..]) {
            Ok(0) => return Err(Error::Closed),
            Ok(n) => n_read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from_io(e)),
        }
    }
    Ok(())
}

/// Computes the time until the deadline, failing with
/// [`Error::Timeout`] if it is in the past.
fn remaining(deadline: Instant) -> Result<Duration, Error> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
        .ok_or(Error::Timeout)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that an exchange failed.
#[derive(Debug)]
pub enum Error {
    /// The server refused the connection.
    ConnectionRefused,

    /// The exchange did not finish in time.
    Timeout,

    /// The server closed the connection before sending a complete
    /// response.
    Closed,

    /// The request does not fit in a TCP DNS message.
    RequestTooLong,

    /// Any other I/O error.
    Io(io::Error),
}

impl Error {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ConnectionRefused => f.write_str("connection refused"),
            Self::Timeout => f.write_str("timed out"),
            Self::Closed => f.write_str("connection closed before a response was received"),
            Self::RequestTooLong => f.write_str("request is too long"),
            Self::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
