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

//! Implements command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// The configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "ddnsmulti.toml";

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// Distributes DNS delegation changes to nameservers with DNS UPDATE
#[derive(Debug, Parser)]
#[command(author, version)]
pub struct Args {
    /// Set the configuration file to use
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the update queue
    Queue,

    /// Add new change requests to the index
    Refresh,

    /// Send all queued updates
    Update(UpdateArgs),

    /// Send the update in a single change-request file, bypassing the queue
    UpdateFile(UpdateFileArgs),
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// Print nsupdate scripts instead of sending updates
    #[arg(long)]
    pub script: bool,
}

#[derive(Debug, Parser)]
pub struct UpdateFileArgs {
    /// The change-request file to send
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn config_has_default() {
        let args = Args::try_parse_from(["ddnsmulti", "queue"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!args.debug);
        assert!(matches!(args.command, Command::Queue));
    }

    #[test]
    fn update_commands_parse() {
        let args =
            Args::try_parse_from(["ddnsmulti", "--config", "x.toml", "--debug", "update", "--script"])
                .unwrap();
        assert_eq!(args.config, PathBuf::from("x.toml"));
        assert!(args.debug);
        assert!(matches!(args.command, Command::Update(UpdateArgs { script: true })));

        let args = Args::try_parse_from(["ddnsmulti", "update-file", "a.yaml"]).unwrap();
        match args.command {
            Command::UpdateFile(file_args) => assert_eq!(file_args.file, PathBuf::from("a.yaml")),
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Args::try_parse_from(["ddnsmulti", "update-file"]).is_err());
    }
}
