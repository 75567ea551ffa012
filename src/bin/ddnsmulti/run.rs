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

//! Implements the commands.

use std::fmt::Write;
use std::fs;
use std::path::Path;
use std::process;

use anyhow::{anyhow, bail, Context, Result};
use env_logger::Env;
use log::{error, info};

use ddnsmulti::dispatch::{self, Nameserver};
use ddnsmulti::queue::{Queue, QueueEntry};
use ddnsmulti::transport::TcpTransport;
use ddnsmulti::update::Update;

use crate::args::{Args, Command};
use crate::config::{self, Config};

/// Runs the command given on the command line.
pub fn run(args: Args) {
    let default_filter = if args.debug { "debug" } else { "warn" };
    env_logger::init_from_env(Env::new().default_filter_or(default_filter));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            let _ = write!(message, "\n[{}] {}", i + 1, cause);
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
}

fn try_running(args: Args) -> Result<()> {
    info!("Loading the configuration from {}.", args.config.display());
    let config =
        config::load_from_path(&args.config).context("failed to load the configuration")?;

    match args.command {
        Command::Queue => show_queue(&config),
        Command::Refresh => refresh_index(&config),
        Command::Update(update_args) if update_args.script => print_scripts(&config),
        Command::Update(_) => send_all_updates(&config),
        Command::UpdateFile(file_args) => send_single_update(&config, &file_args.file),
    }
}

fn open_queue(config: &Config) -> Queue {
    Queue::new(&config.queue_dir, config.index.clone())
}

/// Prints every queued change request with its delivery status.
fn show_queue(config: &Config) -> Result<()> {
    let mut queue = open_queue(config);
    if config.index.is_some() {
        queue.load_index().context("failed to load the index")?;
    }
    queue
        .scan_and_merge()
        .context("failed to scan the queue directory")?;
    let nameservers = config.nameservers();
    for entry in queue.entries() {
        println!(
            "- {} ({}) {} [{}]",
            entry.identity(),
            entry.change_request().change(),
            entry.fingerprint(),
            delivery_status(entry, &nameservers)
        );
    }
    Ok(())
}

/// Returns "complete" if every configured nameserver has accepted
/// `entry`, and "pending" otherwise.
fn delivery_status(entry: &QueueEntry, nameservers: &[Nameserver]) -> &'static str {
    if nameservers
        .iter()
        .all(|ns| !entry.needs_delivery(&ns.delivery_key()))
    {
        "complete"
    } else {
        "pending"
    }
}

/// Adds new change requests from the queue directory to the index.
fn refresh_index(config: &Config) -> Result<()> {
    if config.index.is_none() {
        bail!("no index is configured");
    }
    let mut queue = open_queue(config);
    info!("Load index");
    queue.load_index().context("failed to load the index")?;
    info!("Update index");
    queue
        .scan_and_merge()
        .context("failed to scan the queue directory")?;
    info!("Save index");
    queue.save_index().context("failed to save the index")
}

/// Loads the queue for the `update` command. With an index, only the
/// change requests already in it are considered (new files are added by
/// `refresh`); without one, the queue directory is scanned.
fn load_queue_for_update(config: &Config) -> Result<Queue> {
    let mut queue = open_queue(config);
    if config.index.is_some() {
        info!("Load index");
        queue.load_index().context("failed to load the index")?;
    } else {
        info!("Running without index");
        queue
            .scan_and_merge()
            .context("failed to scan the queue directory")?;
    }
    Ok(queue)
}

/// Prints the queued updates as nsupdate scripts.
fn print_scripts(config: &Config) -> Result<()> {
    let queue = load_queue_for_update(config)?;
    for entry in queue.entries() {
        let update = Update::from_change_request(entry.change_request());
        println!("; {}", entry.identity());
        println!("{}", update.to_script());
    }
    Ok(())
}

/// Sends every queued update to the nameservers that have not accepted
/// it yet, saving the index after each entry.
fn send_all_updates(config: &Config) -> Result<()> {
    let mut queue = load_queue_for_update(config)?;
    let nameservers = config.nameservers();
    let mut transport = TcpTransport::default();

    for i in 0..queue.len() {
        send_entry(&mut queue.entries_mut()[i], &nameservers, &mut transport);
        if config.index.is_some() {
            queue.save_index().context("failed to save the index")?;
        }
    }
    Ok(())
}

/// Sends the update in a single change-request file. Nothing is
/// recorded in the queue.
fn send_single_update(config: &Config, path: &Path) -> Result<()> {
    let identity = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut entry = QueueEntry::from_source(identity, &raw)?;
    send_entry(&mut entry, &config.nameservers(), &mut TcpTransport::default());
    Ok(())
}

fn send_entry(entry: &mut QueueEntry, nameservers: &[Nameserver], transport: &mut TcpTransport) {
    let outcomes = dispatch::dispatch_entry(entry, nameservers, transport);
    let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
    info!(
        "{} delivered to {} of {} nameservers",
        entry.identity(),
        delivered,
        outcomes.len()
    );
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    const CHANGE_REQUEST: &str = "\
zone: example.com
change: b.example.com
from:
  - b.example.com NS ns.example.net
to:
  - b.example.com NS ns.example.org
";

    #[test]
    fn status_follows_configured_nameservers() {
        let nameservers = [
            Nameserver::new("10.0.0.1".parse().unwrap()),
            Nameserver::new("10.0.0.2".parse().unwrap()),
        ];
        let mut entry = QueueEntry::from_source("b.yaml", CHANGE_REQUEST.as_bytes()).unwrap();
        assert_eq!(delivery_status(&entry, &nameservers), "pending");

        let when = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        entry.mark_succeeded("10.0.0.1", when);
        assert_eq!(delivery_status(&entry, &nameservers), "pending");
        entry.mark_failed("10.0.0.2");
        assert_eq!(delivery_status(&entry, &nameservers), "pending");
        entry.mark_succeeded("10.0.0.2", when);
        assert_eq!(delivery_status(&entry, &nameservers), "complete");
    }
}
