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

//! Distribution of DNS delegation changes to a set of authoritative
//! nameservers with DNS UPDATE ([RFC 2136]).
//!
//! A delegation change is described by a [`ChangeRequest`]: the NS
//! records (and glue) of a delegated name as they currently are, and as
//! they should be. Change requests are validated when they are parsed
//! (see [`change_request`]), turned into UPDATE transactions or update
//! scripts by the [`update`] module, and tracked per target nameserver
//! in a durable [`Queue`](queue::Queue). The [`dispatch`] module ties
//! these together, sending each queued change to every configured
//! nameserver that has not yet accepted it.
//!
//! [RFC 2136]: https://datatracker.ietf.org/doc/html/rfc2136
//! [`ChangeRequest`]: change_request::ChangeRequest

pub mod change_request;
pub mod class;
pub mod dispatch;
pub mod message;
pub mod name;
pub mod queue;
pub mod rr;
pub mod transport;
pub mod update;
mod util;
pub mod zone_file;
