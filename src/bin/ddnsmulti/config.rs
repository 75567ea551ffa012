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

//! Implements the configuration file.

use std::fmt::{self, Write};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use serde::{de, Deserialize};

use ddnsmulti::dispatch::{Nameserver, DEFAULT_PORT};
use ddnsmulti::message::tsig::{Algorithm, TsigKey};
use ddnsmulti::name::Name;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the configuration from the file given by `path`.
///
/// Relative paths in the configuration are interpreted relative to the
/// configuration file's directory. The queue directory must exist.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let dir = match path.as_ref().parent() {
        Some(p) => p,
        None => return Err(anyhow!("the configuration file path has no parent")),
    };
    let raw_config =
        fs::read_to_string(path.as_ref()).context("failed to read the configuration file")?;
    let config = parse(&raw_config, dir)?;
    log_config_summary(&config);
    Ok(config)
}

/// Parses the configuration, resolving relative paths against `dir`.
fn parse(raw_config: &str, dir: &Path) -> Result<Config> {
    let mut config: Config =
        toml::from_str(raw_config).context("failed to parse the configuration file")?;
    if config.queue_dir.is_relative() {
        config.queue_dir = dir.join(&config.queue_dir);
    }
    if let Some(ref mut index) = config.index {
        if index.is_relative() {
            *index = dir.join(&*index);
        }
    }
    if !config.queue_dir.is_dir() {
        bail!(
            "the queue directory {} is not a directory",
            config.queue_dir.display()
        );
    }
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        return;
    }

    let index = match config.index {
        Some(ref index) => index.display().to_string(),
        None => String::from("none"),
    };
    let mut message = format!(
        "Configuration loaded:\n\
         Queue directory: {}\n\
         Index:           {}\n\
         Nameservers:     ",
        config.queue_dir.display(),
        index,
    );
    if config.nameservers.is_empty() {
        message.push_str("none");
    } else {
        let _ = write!(message, "{}", config.nameservers.len());
        for ns in &config.nameservers {
            let _ = write!(message, "\n  {} port {}", ns.address, ns.port);
            if let Some(ref tsig) = ns.tsig {
                let _ = write!(message, " (TSIG {} {})", tsig.name.0, tsig.algorithm.0);
            }
        }
    }
    debug!("{}", message);
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub queue_dir: PathBuf,
    pub index: Option<PathBuf>,
    pub nameservers: Vec<NameserverConfig>,
}

impl Config {
    /// Returns the configured nameservers, in order.
    pub fn nameservers(&self) -> Vec<Nameserver> {
        self.nameservers.iter().map(Nameserver::from).collect()
    }
}

/// The configuration of a single nameserver.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameserverConfig {
    pub address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    pub tsig: Option<TsigConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl From<&NameserverConfig> for Nameserver {
    fn from(config: &NameserverConfig) -> Self {
        Self {
            address: config.address,
            port: config.port,
            tsig: config
                .tsig
                .as_ref()
                .map(|t| TsigKey::new(&t.name.0, t.algorithm.0, t.secret.0 .0.clone())),
        }
    }
}

/// The TSIG key shared with a nameserver.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TsigConfig {
    pub name: ConfigName,
    pub secret: ConfigSecret,
    pub algorithm: ConfigAlgorithm,
}

/// A base64-encoded TSIG secret.
#[derive(Clone)]
pub struct Secret(Box<[u8]>);

impl FromStr for Secret {
    type Err = base64::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(|secret| Self(secret.into()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER DDNSMULTI TYPES FOR SERDE                            //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type,
/// using its [`FromStr`] implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, Name, "domain name");
make_serde_wrapper!(ConfigAlgorithm, Algorithm, "TSIG algorithm");
make_serde_wrapper!(ConfigSecret, Secret, "base64 secret");

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
queue_dir = "queue"
index = "index.json"

[[nameservers]]
address = "10.0.0.1"

[nameservers.tsig]
name = "test-20230201."
secret = "BA3V2qaseslfYlJ3+XGQwKgXPprlshGnJcFN9NxapNg="
algorithm = "hmac-sha256"

[[nameservers]]
address = "2001:db8::53"
port = 5353
"#;

    fn config_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("queue")).unwrap();
        dir
    }

    #[test]
    fn parses_valid_config() {
        let dir = config_dir();
        let config = parse(CONFIG, dir.path()).unwrap();
        assert_eq!(config.queue_dir, dir.path().join("queue"));
        assert_eq!(config.index, Some(dir.path().join("index.json")));

        let nameservers = config.nameservers();
        assert_eq!(nameservers.len(), 2);
        assert_eq!(nameservers[0].address, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(nameservers[0].port, 53);
        let key = nameservers[0].tsig.as_ref().unwrap();
        assert_eq!(key.name(), &"test-20230201.".parse::<Name>().unwrap());
        assert_eq!(key.algorithm(), Algorithm::HmacSha256);
        assert_eq!(nameservers[1].port, 5353);
        assert!(nameservers[1].tsig.is_none());
    }

    #[test]
    fn absolute_paths_are_kept() {
        let dir = config_dir();
        let queue_dir = dir.path().join("queue");
        let raw = format!(
            "queue_dir = {:?}\nnameservers = []\n",
            queue_dir.to_str().unwrap()
        );
        let config = parse(&raw, Path::new("/nonexistent")).unwrap();
        assert_eq!(config.queue_dir, queue_dir);
        assert!(config.index.is_none());
    }

    #[test]
    fn rejects_invalid_configs() {
        let dir = config_dir();
        let bad_algorithm = CONFIG.replace("hmac-sha256", "hmac-md5");
        assert!(parse(&bad_algorithm, dir.path()).is_err());
        let bad_secret = CONFIG.replace("BA3V2qases", "!!!");
        assert!(parse(&bad_secret, dir.path()).is_err());
        let bad_address = CONFIG.replace("10.0.0.1", "10.0.0");
        assert!(parse(&bad_address, dir.path()).is_err());
        let unknown_key = format!("{}\nverbose = true\n", CONFIG);
        assert!(parse(&unknown_key, dir.path()).is_err());
        let missing_dir = CONFIG.replace("\"queue\"", "\"missing\"");
        assert!(parse(&missing_dir, dir.path()).is_err());
    }
}
