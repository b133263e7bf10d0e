//! Configuration of the sidecar.
//!
//! A [Config] is read either from command-line arguments ([Config::command] and
//! [Config::from_matches]) or from a YAML file ([Config::from_yaml]). [Config::load]
//! picks between the two.

use clap::{value_parser, Arg, ArgMatches, Command};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Read, net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::Level;

/// Default interval between contract manifest polls, in seconds.
pub const DEFAULT_MANIFEST_POLL_INTERVAL: u64 = 900;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing argument: {0}")]
    Missing(&'static str),
    #[error("invalid arguments: {0}")]
    Arguments(#[from] clap::Error),
    #[error("failed to open config file: {0}")]
    Open(#[source] std::io::Error),
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("node RPC endpoint is empty")]
    EmptyEndpoint,
    #[error("manifest poll interval must be positive")]
    ZeroPollInterval,
    #[error("finality must not be negative: {0}")]
    NegativeFinality(i64),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// JSON-RPC endpoint of the node.
    pub rpc_endpoint: String,

    /// Token authorizing write calls (signing) on the node.
    #[serde(default)]
    pub jwt: Option<String>,

    /// Address the operator RPC endpoint listens on.
    pub f3_rpc_endpoint: SocketAddr,

    /// CID of the initial power table, if known.
    #[serde(default)]
    pub initial_power_table: Option<String>,

    pub bootstrap_epoch: i64,
    pub finality: i64,

    /// Directory holding the sidecar's data.
    pub root: PathBuf,

    /// Seconds between contract manifest polls.
    #[serde(default = "default_manifest_poll_interval")]
    pub manifest_poll_interval: u64,
}

fn default_manifest_poll_interval() -> u64 {
    DEFAULT_MANIFEST_POLL_INTERVAL
}

impl Config {
    /// Command-line arguments accepted by [Config::from_matches].
    pub fn command() -> Command {
        Command::new("f3-sidecar")
            .about("participate in fast finality on behalf of the miners of a node")
            .arg(
                Arg::new("config")
                    .long("config")
                    .required(false)
                    .value_parser(value_parser!(PathBuf))
                    .help("YAML config file, replacing the other settings"),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .default_value("info")
                    .value_parser(value_parser!(Level)),
            )
            .arg(
                Arg::new("rpc-endpoint")
                    .long("rpc-endpoint")
                    .required_unless_present("config")
                    .help("JSON-RPC endpoint of the node"),
            )
            .arg(
                Arg::new("jwt")
                    .long("jwt")
                    .required(false)
                    .help("Token authorizing signing on the node"),
            )
            .arg(
                Arg::new("f3-rpc-endpoint")
                    .long("f3-rpc-endpoint")
                    .required_unless_present("config")
                    .value_parser(value_parser!(SocketAddr))
                    .help("Address to serve finality queries on"),
            )
            .arg(
                Arg::new("initial-power-table")
                    .long("initial-power-table")
                    .required(false),
            )
            .arg(
                Arg::new("bootstrap-epoch")
                    .long("bootstrap-epoch")
                    .required_unless_present("config")
                    .allow_negative_numbers(true)
                    .value_parser(value_parser!(i64)),
            )
            .arg(
                Arg::new("finality")
                    .long("finality")
                    .required_unless_present("config")
                    .allow_negative_numbers(true)
                    .value_parser(value_parser!(i64)),
            )
            .arg(
                Arg::new("root")
                    .long("root")
                    .required_unless_present("config")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("manifest-poll-interval")
                    .long("manifest-poll-interval")
                    .required(false)
                    .value_parser(value_parser!(u64))
                    .help("Seconds between contract manifest polls"),
            )
    }

    /// Build a validated config from arguments parsed with [Config::command].
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, Error> {
        let config = Self {
            rpc_endpoint: matches
                .get_one::<String>("rpc-endpoint")
                .cloned()
                .ok_or(Error::Missing("rpc-endpoint"))?,
            jwt: matches.get_one::<String>("jwt").cloned(),
            f3_rpc_endpoint: matches
                .get_one::<SocketAddr>("f3-rpc-endpoint")
                .copied()
                .ok_or(Error::Missing("f3-rpc-endpoint"))?,
            initial_power_table: matches.get_one::<String>("initial-power-table").cloned(),
            bootstrap_epoch: matches
                .get_one::<i64>("bootstrap-epoch")
                .copied()
                .ok_or(Error::Missing("bootstrap-epoch"))?,
            finality: matches
                .get_one::<i64>("finality")
                .copied()
                .ok_or(Error::Missing("finality"))?,
            root: matches
                .get_one::<PathBuf>("root")
                .cloned()
                .ok_or(Error::Missing("root"))?,
            manifest_poll_interval: matches
                .get_one::<u64>("manifest-poll-interval")
                .copied()
                .unwrap_or(DEFAULT_MANIFEST_POLL_INTERVAL),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read the file named by `--config` if given, else the individual arguments.
    pub fn load(matches: &ArgMatches) -> Result<Self, Error> {
        match matches.get_one::<PathBuf>("config") {
            Some(path) => Self::from_yaml(File::open(path).map_err(Error::Open)?),
            None => Self::from_matches(matches),
        }
    }

    /// Parse and validate a YAML config.
    pub fn from_yaml<R: Read>(reader: R) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.rpc_endpoint.is_empty() {
            return Err(Error::EmptyEndpoint);
        }
        if self.manifest_poll_interval == 0 {
            return Err(Error::ZeroPollInterval);
        }
        if self.finality < 0 {
            return Err(Error::NegativeFinality(self.finality));
        }
        Ok(())
    }

    pub fn manifest_poll_interval(&self) -> Duration {
        Duration::from_secs(self.manifest_poll_interval)
    }

    /// Token authorizing signing, treating an empty token as none.
    pub fn jwt(&self) -> Option<&str> {
        self.jwt.as_deref().filter(|jwt| !jwt.is_empty())
    }
}
