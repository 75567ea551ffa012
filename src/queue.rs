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

//! The durable queue of change requests.
//!
//! Change requests arrive as `.yaml` files in a queue directory. A
//! [`Queue`] ingests each file once, keyed by its file name (the entry's
//! *identity*), and tracks for each [`QueueEntry`] which nameservers
//! have accepted it. The queue can be persisted to a JSON index file, so
//! that an interrupted distribution run can be resumed without sending a
//! change to a nameserver that already accepted it.
//!
//! Once an identity is in the queue, its entry is never replaced: a file
//! that is modified after it was ingested is not picked up again.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::change_request::{self, ChangeRequest};
use crate::util;

/// The extension that marks a file in the queue directory as a change
/// request.
pub const CHANGE_REQUEST_EXTENSION: &str = "yaml";

////////////////////////////////////////////////////////////////////////
// QUEUE ENTRIES                                                      //
////////////////////////////////////////////////////////////////////////

/// Delivery state per nameserver address. An address that is absent has
/// not been attempted; `None` means the last attempt failed; a time
/// means the nameserver accepted the change at that time.
pub type DeliveryState = BTreeMap<String, Option<DateTime<Utc>>>;

/// A change request in the queue, together with its delivery state.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    identity: String,
    fingerprint: String,
    created: DateTime<Utc>,
    payload: String,
    change_request: ChangeRequest,
    nameservers: DeliveryState,
}

impl QueueEntry {
    /// Creates a new `QueueEntry` from the raw contents of a source
    /// file. The contents must be UTF-8 and hold a valid change
    /// request.
    pub fn from_source(identity: impl Into<String>, raw: &[u8]) -> Result<Self, Error> {
        let identity = identity.into();
        let fingerprint = fingerprint(raw);
        let payload = match String::from_utf8(raw.to_vec()) {
            Ok(payload) => payload,
            Err(_) => return Err(Error::InvalidEncoding { identity }),
        };
        let change_request = parse_payload(&identity, &payload)?;
        Ok(Self {
            identity,
            fingerprint,
            created: Utc::now(),
            payload,
            change_request,
            nameservers: DeliveryState::new(),
        })
    }

    /// Rebuilds a `QueueEntry` from its persisted form. The embedded
    /// payload is parsed and validated again. A fingerprint that does
    /// not match the payload is only logged.
    pub fn from_persisted(persisted: PersistedEntry) -> Result<Self, Error> {
        let change_request = parse_payload(&persisted.filename, &persisted.payload)?;
        if fingerprint(persisted.payload.as_bytes()) != persisted.fingerprint {
            warn!(
                "Fingerprint of {} does not match its payload",
                persisted.filename
            );
        }
        Ok(Self {
            identity: persisted.filename,
            fingerprint: persisted.fingerprint,
            created: persisted.created,
            payload: persisted.payload,
            change_request,
            nameservers: persisted.nameservers,
        })
    }

    /// Returns the persisted form of this entry.
    pub fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            filename: self.identity.clone(),
            fingerprint: self.fingerprint.clone(),
            payload: self.payload.clone(),
            created: self.created,
            nameservers: self.nameservers.clone(),
        }
    }

    /// Records that delivery to `address` failed.
    pub fn mark_failed(&mut self, address: &str) {
        self.nameservers.insert(address.to_owned(), None);
    }

    /// Records that `address` accepted the change at `when`.
    pub fn mark_succeeded(&mut self, address: &str, when: DateTime<Utc>) {
        self.nameservers.insert(address.to_owned(), Some(when));
    }

    /// Returns whether every nameserver that has been attempted has
    /// accepted the change. Nameservers never attempted are not
    /// considered.
    pub fn is_complete(&self) -> bool {
        self.nameservers.values().all(Option::is_some)
    }

    /// Returns whether the change still has to be sent to `address`,
    /// i.e. whether `address` has not accepted it yet.
    pub fn needs_delivery(&self, address: &str) -> bool {
        !matches!(self.nameservers.get(address), Some(Some(_)))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The lower-case hex SHA-256 digest of the source file.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn change_request(&self) -> &ChangeRequest {
        &self.change_request
    }

    pub fn nameservers(&self) -> &DeliveryState {
        &self.nameservers
    }
}

fn fingerprint(raw: &[u8]) -> String {
    util::to_hex_string(&Sha256::digest(raw))
}

fn parse_payload(identity: &str, payload: &str) -> Result<ChangeRequest, Error> {
    ChangeRequest::from_text(payload).map_err(|error| Error::InvalidChangeRequest {
        identity: identity.to_owned(),
        error,
    })
}

////////////////////////////////////////////////////////////////////////
// PERSISTED FORM                                                     //
////////////////////////////////////////////////////////////////////////

/// The form in which a [`QueueEntry`] is stored in the index.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedEntry {
    pub filename: String,
    pub fingerprint: String,
    pub payload: String,
    pub created: DateTime<Utc>,
    pub nameservers: DeliveryState,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct PersistedIndex {
    queue: Vec<PersistedEntry>,
}

////////////////////////////////////////////////////////////////////////
// THE QUEUE                                                          //
////////////////////////////////////////////////////////////////////////

/// An ordered collection of [`QueueEntry`]s, at most one per identity,
/// backed by a queue directory and an optional index file.
///
/// A `Queue` starts out unloaded. It becomes loaded when the index is
/// read with [`Queue::load_index`] or the directory is scanned with
/// [`Queue::scan_and_merge`]. Entries are kept in the order in which
/// they were added.
#[derive(Debug)]
pub struct Queue {
    directory: PathBuf,
    index: Option<PathBuf>,
    entries: Option<Vec<QueueEntry>>,
}

impl Queue {
    /// Creates a new, unloaded `Queue` for the given directory and
    /// index file.
    pub fn new(directory: impl Into<PathBuf>, index: Option<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            index,
            entries: None,
        }
    }

    /// Loads the queue from the index file, replacing any entries
    /// already loaded. A missing index file yields an empty queue.
    pub fn load_index(&mut self) -> Result<(), Error> {
        let path = self.index.as_ref().ok_or(Error::NoIndex)?;
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Index {} not found, starting with an empty queue", path.display());
                self.entries = Some(Vec::new());
                return Ok(());
            }
            Err(e) => return Err(Error::Io(path.clone(), e)),
        };
        let index: PersistedIndex =
            serde_json::from_str(&text).map_err(|e| Error::IndexFormat(path.clone(), e))?;

        let mut entries: Vec<QueueEntry> = Vec::with_capacity(index.queue.len());
        for persisted in index.queue {
            if entries.iter().any(|e| e.identity == persisted.filename) {
                return Err(Error::DuplicateIdentity(persisted.filename));
            }
            entries.push(QueueEntry::from_persisted(persisted)?);
        }
        info!("Loaded {} entries from index {}", entries.len(), path.display());
        self.entries = Some(entries);
        Ok(())
    }

    /// Scans the queue directory for change-request files and adds those
    /// whose identity is not in the queue yet, in file-name order. An
    /// unloaded queue is initialized as empty first.
    ///
    /// A file that cannot be read, or that does not hold a valid change
    /// request, aborts the scan. Entries added before the failure are
    /// kept.
    pub fn scan_and_merge(&mut self) -> Result<(), Error> {
        let mut filenames = Vec::new();
        let dir = fs::read_dir(&self.directory).map_err(|e| Error::Io(self.directory.clone(), e))?;
        for dir_entry in dir {
            let dir_entry = dir_entry.map_err(|e| Error::Io(self.directory.clone(), e))?;
            let path = dir_entry.path();
            let is_change_request = path.extension().map_or(false, |e| e == CHANGE_REQUEST_EXTENSION);
            // fs::metadata follows symbolic links.
            if !is_change_request || !fs::metadata(&path).map_or(false, |m| m.is_file()) {
                continue;
            }
            match dir_entry.file_name().into_string() {
                Ok(filename) => filenames.push(filename),
                Err(filename) => warn!("Skip {:?}, file name is not valid UTF-8", filename),
            }
        }
        filenames.sort();

        let entries = self.entries.get_or_insert_with(Vec::new);
        for filename in filenames {
            if entries.iter().any(|e| e.identity == filename) {
                debug!("Skip {}, already in index", filename);
                continue;
            }
            info!("Adding {} to index", filename);
            let path = self.directory.join(&filename);
            let raw = fs::read(&path).map_err(|e| Error::Io(path, e))?;
            entries.push(QueueEntry::from_source(filename, &raw)?);
        }
        Ok(())
    }

    /// Writes the queue to the index file. The new index is written to a
    /// temporary file next to it first and then renamed over it, so the
    /// index is replaced atomically.
    pub fn save_index(&self) -> Result<(), Error> {
        let entries = self.entries.as_ref().ok_or(Error::NotLoaded)?;
        let path = self.index.as_ref().ok_or(Error::NoIndex)?;

        let index = PersistedIndex {
            queue: entries.iter().map(QueueEntry::to_persisted).collect(),
        };
        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        index
            .serialize(&mut serializer)
            .map_err(|e| Error::IndexFormat(path.clone(), e))?;
        json.push(b'\n');

        let temp_path = temp_path_for(path);
        fs::write(&temp_path, &json).map_err(|e| Error::Io(temp_path.clone(), e))?;
        fs::rename(&temp_path, path).map_err(|e| Error::Io(path.clone(), e))?;
        info!("Saved {} entries to index {}", entries.len(), path.display());
        Ok(())
    }

    /// Returns whether the queue has been loaded or scanned.
    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn index(&self) -> Option<&Path> {
        self.index.as_deref()
    }

    /// Returns the entries of the queue in order. An unloaded queue has
    /// no entries.
    pub fn entries(&self) -> &[QueueEntry] {
        self.entries.as_deref().unwrap_or_default()
    }

    pub fn entries_mut(&mut self) -> &mut [QueueEntry] {
        self.entries.as_deref_mut().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Looks up an entry by identity.
    pub fn get(&self, identity: &str) -> Option<&QueueEntry> {
        self.entries().iter().find(|e| e.identity == identity)
    }
}

/// Returns the path of the temporary file used while saving the index
/// at `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut filename = path.file_name().unwrap_or_default().to_os_string();
    filename.push(".tmp");
    path.with_file_name(filename)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a queue operation failed.
#[derive(Debug)]
pub enum Error {
    /// Reading or writing a file failed.
    Io(PathBuf, io::Error),

    /// The index file is not valid.
    IndexFormat(PathBuf, serde_json::Error),

    /// The index holds more than one entry with the same identity.
    DuplicateIdentity(String),

    /// A source file is not UTF-8.
    InvalidEncoding { identity: String },

    /// A source file does not hold a valid change request.
    InvalidChangeRequest {
        identity: String,
        error: change_request::Error,
    },

    /// The queue was saved before it was loaded.
    NotLoaded,

    /// No index file is configured.
    NoIndex,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(path, _) => write!(f, "I/O error on {}", path.display()),
            Self::IndexFormat(path, _) => write!(f, "index {} is not valid", path.display()),
            Self::DuplicateIdentity(identity) => {
                write!(f, "{} appears more than once in the index", identity)
            }
            Self::InvalidEncoding { identity } => write!(f, "{} is not valid UTF-8", identity),
            Self::InvalidChangeRequest { identity, .. } => {
                write!(f, "{} is not a valid change request", identity)
            }
            Self::NotLoaded => f.write_str("the queue has not been loaded"),
            Self::NoIndex => f.write_str("no index is configured"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_, err) => Some(err),
            Self::IndexFormat(_, err) => Some(err),
            Self::InvalidChangeRequest { error, .. } => Some(error),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    const CHANGE_A: &str = "\
zone: example.com
change: a.example.com
from:
  - a.example.com NS ns1.a.example.com
  - a.example.com NS ns2.a.example.com
  - ns1.a.example.com A 10.0.0.1
  - ns2.a.example.com A 10.0.0.2
to:
  - a.example.com NS ns1.a.example.com
  - a.example.com NS ns4.a.example.com
  - ns1.a.example.com A 10.0.0.1
  - ns4.a.example.com A 10.0.0.2
";

    const CHANGE_B: &str = "\
zone: example.com
change: b.example.com
from:
  - b.example.com NS ns.example.net
to:
  - b.example.com NS ns.example.org
";

    fn queue_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), CHANGE_B).unwrap();
        fs::write(dir.path().join("a.yaml"), CHANGE_A).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a change request").unwrap();
        fs::create_dir(dir.path().join("sub.yaml")).unwrap();
        dir
    }

    #[test]
    fn entry_from_source_works() {
        let entry = QueueEntry::from_source("a.yaml", CHANGE_A.as_bytes()).unwrap();
        assert_eq!(entry.identity(), "a.yaml");
        assert_eq!(entry.payload(), CHANGE_A);
        assert_eq!(entry.fingerprint().len(), 64);
        assert_eq!(entry.fingerprint(), fingerprint(CHANGE_A.as_bytes()));
        assert!(entry.nameservers().is_empty());
        assert_eq!(
            entry.change_request().change(),
            &"a.example.com.".parse().unwrap()
        );
    }

    #[test]
    fn fingerprint_is_lowercase_sha256() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn entry_from_source_rejects_bad_sources() {
        assert!(matches!(
            QueueEntry::from_source("x.yaml", b"\xff\xfe"),
            Err(Error::InvalidEncoding { .. })
        ));
        let invalid = CHANGE_A.replace("change: a.example.com", "change: b.example.com");
        assert!(matches!(
            QueueEntry::from_source("x.yaml", invalid.as_bytes()),
            Err(Error::InvalidChangeRequest { .. })
        ));
    }

    #[test]
    fn delivery_state_works() {
        let mut entry = QueueEntry::from_source("a.yaml", CHANGE_A.as_bytes()).unwrap();
        let when = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(entry.is_complete());
        assert!(entry.needs_delivery("10.0.0.1"));

        entry.mark_succeeded("10.0.0.1", when);
        entry.mark_failed("10.0.0.2");
        assert!(!entry.is_complete());
        assert!(!entry.needs_delivery("10.0.0.1"));
        assert!(entry.needs_delivery("10.0.0.2"));
        assert!(entry.needs_delivery("10.0.0.3"));

        entry.mark_failed("10.0.0.2");
        assert_eq!(entry.nameservers().len(), 2);
        entry.mark_succeeded("10.0.0.2", when);
        assert!(entry.is_complete());
    }

    #[test]
    fn persisted_form_round_trips() {
        let mut entry = QueueEntry::from_source("a.yaml", CHANGE_A.as_bytes()).unwrap();
        entry.mark_succeeded("10.0.0.1", Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        entry.mark_failed("10.0.0.2");
        let persisted = entry.to_persisted();
        let rebuilt = QueueEntry::from_persisted(persisted.clone()).unwrap();
        assert_eq!(rebuilt.to_persisted(), persisted);
    }

    #[test]
    fn persisted_payload_is_revalidated() {
        let mut persisted = QueueEntry::from_source("a.yaml", CHANGE_A.as_bytes())
            .unwrap()
            .to_persisted();
        persisted.payload = persisted.payload.replace("zone: example.com", "zone: example.net");
        assert!(matches!(
            QueueEntry::from_persisted(persisted),
            Err(Error::InvalidChangeRequest { .. })
        ));
    }

    #[test]
    fn scan_adds_change_requests_in_order() {
        let dir = queue_dir();
        let mut queue = Queue::new(dir.path(), None);
        assert!(!queue.is_loaded());
        queue.scan_and_merge().unwrap();
        let identities: Vec<_> = queue.entries().iter().map(QueueEntry::identity).collect();
        assert_eq!(identities, ["a.yaml", "b.yaml"]);
        assert!(queue.get("b.yaml").is_some());
        assert!(queue.get("notes.txt").is_none());
    }

    #[test]
    fn rescanning_keeps_existing_entries() {
        let dir = queue_dir();
        let mut queue = Queue::new(dir.path(), None);
        queue.scan_and_merge().unwrap();
        let fingerprint = queue.get("a.yaml").unwrap().fingerprint().to_owned();

        fs::write(dir.path().join("a.yaml"), CHANGE_B).unwrap();
        queue.scan_and_merge().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get("a.yaml").unwrap().fingerprint(), fingerprint);
    }

    #[test]
    fn scan_fails_on_invalid_change_request() {
        let dir = queue_dir();
        fs::write(dir.path().join("c.yaml"), "zone: example.com\n").unwrap();
        let mut queue = Queue::new(dir.path(), None);
        match queue.scan_and_merge() {
            Err(Error::InvalidChangeRequest { identity, .. }) => assert_eq!(identity, "c.yaml"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn index_round_trips() {
        let dir = queue_dir();
        let index = dir.path().join("index.json");
        let mut queue = Queue::new(dir.path(), Some(index.clone()));
        queue.load_index().unwrap();
        assert!(queue.is_loaded());
        assert!(queue.is_empty());

        queue.scan_and_merge().unwrap();
        queue.entries_mut()[0].mark_succeeded("10.0.0.1", Utc.timestamp_opt(0, 0).unwrap());
        queue.entries_mut()[0].mark_failed("10.0.0.2");
        queue.save_index().unwrap();
        assert!(!temp_path_for(&index).exists());

        let mut reloaded = Queue::new(dir.path(), Some(index.clone()));
        reloaded.load_index().unwrap();
        assert_eq!(reloaded.len(), 2);
        let entry = reloaded.get("a.yaml").unwrap();
        assert!(!entry.is_complete());
        assert_eq!(
            entry.nameservers().get("10.0.0.1"),
            Some(&Some(Utc.timestamp_opt(0, 0).unwrap()))
        );
        assert_eq!(entry.nameservers().get("10.0.0.2"), Some(&None));
    }

    #[test]
    fn index_uses_expected_format() {
        let dir = queue_dir();
        let index = dir.path().join("index.json");
        let mut queue = Queue::new(dir.path(), Some(index.clone()));
        queue.scan_and_merge().unwrap();
        queue.entries_mut()[0].mark_succeeded("10.0.0.1", Utc.timestamp_opt(0, 0).unwrap());
        queue.save_index().unwrap();

        let text = fs::read_to_string(&index).unwrap();
        assert!(text.starts_with("{\n    \"queue\": [\n        {\n"));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let first = &json["queue"][0];
        assert_eq!(first["filename"], "a.yaml");
        assert_eq!(first["payload"], CHANGE_A);
        assert_eq!(first["nameservers"]["10.0.0.1"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn save_requires_loaded_queue_and_index() {
        let dir = queue_dir();
        let queue = Queue::new(dir.path(), Some(dir.path().join("index.json")));
        assert!(matches!(queue.save_index(), Err(Error::NotLoaded)));

        let mut queue = Queue::new(dir.path(), None);
        queue.scan_and_merge().unwrap();
        assert!(matches!(queue.save_index(), Err(Error::NoIndex)));
        assert!(matches!(queue.load_index(), Err(Error::NoIndex)));
    }

    #[test]
    fn malformed_index_is_an_error() {
        let dir = queue_dir();
        let index = dir.path().join("index.json");
        fs::write(&index, "{\"queue\": 5}").unwrap();
        let mut queue = Queue::new(dir.path(), Some(index));
        assert!(matches!(queue.load_index(), Err(Error::IndexFormat(..))));
    }

    #[test]
    fn duplicate_identities_in_index_are_an_error() {
        let dir = queue_dir();
        let index = dir.path().join("index.json");
        let persisted = QueueEntry::from_source("a.yaml", CHANGE_A.as_bytes())
            .unwrap()
            .to_persisted();
        let json = serde_json::to_string(&PersistedIndex {
            queue: vec![persisted.clone(), persisted],
        })
        .unwrap();
        fs::write(&index, json).unwrap();
        let mut queue = Queue::new(dir.path(), Some(index));
        assert!(matches!(
            queue.load_index(),
            Err(Error::DuplicateIdentity(identity)) if identity == "a.yaml"
        ));
    }
}
