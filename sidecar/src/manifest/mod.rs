//! Construct the manifest that parameterizes the finality module.
//!
//! # Overview
//!
//! A [Manifest] is assembled once from the values the node reports (network name and
//! block delay) and the operator's configuration. If the result passes [Manifest::validate]
//! it is served by [Provider::Static] for the lifetime of the process. Otherwise the sidecar
//! falls back to [Provider::Contract], which polls the node for the manifest published by
//! the on-chain contract and republishes every new snapshot.
//!
//! Either way, consumers only see [Manifests]: the current snapshot plus a stream of
//! replacements. Snapshots are never mutated in place.

use crate::node::Node;
use cid::Cid;
use commonware_runtime::{Clock, Spawner};
use futures::channel::mpsc;
use serde::{
    de::Error as _, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tracing::{info, warn};

pub mod contract;

/// Number of tipsets behind the head the finality module proposes from.
pub const HEAD_LOOKBACK: u32 = 4;

/// Errors returned by [Manifest::validate].
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("network name is empty")]
    EmptyNetworkName,
    #[error("bootstrap epoch {bootstrap} is before finality {finality}")]
    BootstrapBeforeFinality { bootstrap: i64, finality: i64 },
    #[error("negative finality: {0}")]
    NegativeFinality(i64),
    #[error("ec period must be positive")]
    ZeroPeriod,
    #[error("delay multiplier must be positive")]
    InvalidDelayMultiplier,
    #[error("base decision backoff table must be non-empty and positive")]
    InvalidBackoffTable,
    #[error("gpbft delta must be positive")]
    ZeroDelta,
    #[error("backoff exponent must be at least 1: {0}")]
    InvalidBackoffExponent(f64),
    #[error("rebroadcast backoff max {max:?} below base {base:?}")]
    InvalidRebroadcastBackoff { base: Duration, max: Duration },
    #[error("request timeouts must be positive")]
    ZeroRequestTimeout,
    #[error("invalid poll bounds: minimum {min:?}, maximum {max:?}")]
    InvalidPollBounds { min: Duration, max: Duration },
}

/// Reference to the power table the first instance is bootstrapped from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerTable {
    /// No reference; the module derives the table from the chain.
    #[default]
    Undefined,
    Defined(Cid),
}

impl PowerTable {
    /// Parse an optional textual reference.
    ///
    /// Anything that is missing, blank or not a valid content identifier is
    /// [PowerTable::Undefined].
    pub fn parse(reference: Option<&str>) -> Self {
        match reference.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reference) => Cid::try_from(reference)
                .map(Self::Defined)
                .unwrap_or(Self::Undefined),
            None => Self::Undefined,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }
}

/// IPLD link encoding: `{"/": "<cid>"}`.
#[derive(Serialize, Deserialize)]
struct Link {
    #[serde(rename = "/")]
    root: String,
}

impl Serialize for PowerTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined => serializer.serialize_none(),
            Self::Defined(cid) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("/", &cid.to_string())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for PowerTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Link>::deserialize(deserializer)? {
            None => Ok(Self::Undefined),
            Some(link) => Cid::try_from(link.root.as_str())
                .map(Self::Defined)
                .map_err(D::Error::custom),
        }
    }
}

/// Durations travel as integer nanoseconds.
mod nanos {
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(duration.as_nanos()).map_err(S::Error::custom)?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        let nanos = u64::try_from(nanos).map_err(D::Error::custom)?;
        Ok(Duration::from_nanos(nanos))
    }
}

/// Parameters of the consensus protocol itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Gpbft {
    #[serde(with = "nanos")]
    pub delta: Duration,
    #[serde(rename = "DeltaBackOffExponent")]
    pub delta_backoff_exponent: f64,
    pub quality_delta_multiplier: f64,
    pub max_lookahead_rounds: u64,
    #[serde(with = "nanos")]
    pub rebroadcast_backoff_base: Duration,
    pub rebroadcast_backoff_exponent: f64,
    #[serde(with = "nanos")]
    pub rebroadcast_backoff_max: Duration,
}

impl Gpbft {
    fn validate(&self) -> Result<(), Error> {
        if self.delta.is_zero() {
            return Err(Error::ZeroDelta);
        }
        for exponent in [
            self.delta_backoff_exponent,
            self.rebroadcast_backoff_exponent,
        ] {
            if exponent.is_nan() || exponent < 1.0 {
                return Err(Error::InvalidBackoffExponent(exponent));
            }
        }
        if self.rebroadcast_backoff_base.is_zero()
            || self.rebroadcast_backoff_max < self.rebroadcast_backoff_base
        {
            return Err(Error::InvalidRebroadcastBackoff {
                base: self.rebroadcast_backoff_base,
                max: self.rebroadcast_backoff_max,
            });
        }
        Ok(())
    }
}

/// Parameters of the expected-consensus chain being finalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec {
    /// Expected time between epochs.
    #[serde(with = "nanos")]
    pub period: Duration,

    /// Number of epochs after which a tipset is considered final by the chain.
    pub finality: i64,

    pub delay_multiplier: f64,
    pub base_decision_backoff_table: Vec<f64>,
    pub head_lookback: u32,

    /// Whether finalized tipsets are fed back to the chain.
    pub finalize: bool,
}

impl Ec {
    fn validate(&self) -> Result<(), Error> {
        if self.period.is_zero() {
            return Err(Error::ZeroPeriod);
        }
        if self.finality < 0 {
            return Err(Error::NegativeFinality(self.finality));
        }
        if self.delay_multiplier.is_nan() || self.delay_multiplier <= 0.0 {
            return Err(Error::InvalidDelayMultiplier);
        }
        if self.base_decision_backoff_table.is_empty()
            || self
                .base_decision_backoff_table
                .iter()
                .any(|backoff| backoff.is_nan() || *backoff <= 0.0)
        {
            return Err(Error::InvalidBackoffTable);
        }
        Ok(())
    }
}

/// Parameters of certificate exchange between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateExchange {
    #[serde(with = "nanos")]
    pub client_request_timeout: Duration,
    #[serde(with = "nanos")]
    pub server_request_timeout: Duration,
    #[serde(with = "nanos")]
    pub minimum_poll_interval: Duration,
    #[serde(with = "nanos")]
    pub maximum_poll_interval: Duration,
}

impl CertificateExchange {
    fn validate(&self) -> Result<(), Error> {
        if self.client_request_timeout.is_zero() || self.server_request_timeout.is_zero() {
            return Err(Error::ZeroRequestTimeout);
        }
        if self.minimum_poll_interval.is_zero()
            || self.maximum_poll_interval < self.minimum_poll_interval
        {
            return Err(Error::InvalidPollBounds {
                min: self.minimum_poll_interval,
                max: self.maximum_poll_interval,
            });
        }
        Ok(())
    }
}

/// Configuration of a finality module instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    pub network_name: String,
    pub initial_power_table: PowerTable,
    pub bootstrap_epoch: i64,
    pub committee_lookback: u64,

    /// Interval instances are aligned to when catching up.
    #[serde(with = "nanos")]
    pub catch_up_alignment: Duration,

    pub gpbft: Gpbft,
    #[serde(rename = "EC")]
    pub ec: Ec,
    pub certificate_exchange: CertificateExchange,
}

impl Manifest {
    /// Defaults of a local development network.
    pub fn local_devnet() -> Self {
        let period = Duration::from_secs(30);
        Self {
            network_name: String::from("localnet"),
            initial_power_table: PowerTable::Undefined,
            bootstrap_epoch: 1000,
            committee_lookback: 10,
            catch_up_alignment: period / 2,
            gpbft: Gpbft {
                delta: Duration::from_secs(6),
                delta_backoff_exponent: 2.0,
                quality_delta_multiplier: 1.0,
                max_lookahead_rounds: 5,
                rebroadcast_backoff_base: Duration::from_secs(6),
                rebroadcast_backoff_exponent: 1.3,
                rebroadcast_backoff_max: Duration::from_secs(60),
            },
            ec: Ec {
                period,
                finality: 900,
                delay_multiplier: 2.0,
                base_decision_backoff_table: vec![1.3, 1.69, 2.2, 2.86, 3.71, 4.83, 6.27, 7.5],
                head_lookback: 0,
                finalize: true,
            },
            certificate_exchange: CertificateExchange {
                client_request_timeout: Duration::from_secs(10),
                server_request_timeout: Duration::from_secs(60),
                minimum_poll_interval: period,
                maximum_poll_interval: 4 * period,
            },
        }
    }

    /// Check the manifest is structurally usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.network_name.is_empty() {
            return Err(Error::EmptyNetworkName);
        }
        if self.bootstrap_epoch < self.ec.finality {
            return Err(Error::BootstrapBeforeFinality {
                bootstrap: self.bootstrap_epoch,
                finality: self.ec.finality,
            });
        }
        self.gpbft.validate()?;
        self.ec.validate()?;
        self.certificate_exchange.validate()
    }
}

/// Node-reported and configured values a [Manifest] is built from.
#[derive(Clone, Debug)]
pub struct Params {
    pub network_name: String,
    pub block_delay: Duration,
    pub initial_power_table: Option<String>,
    pub bootstrap_epoch: i64,
    pub finality: i64,
}

impl Params {
    /// Assemble a manifest on top of [Manifest::local_devnet].
    ///
    /// All chain timing is derived from the block delay `D`: the period is `D`, instances
    /// align to `D/2` and certificates are polled every `[D, 4D]`.
    pub fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::local_devnet();
        manifest.initial_power_table = PowerTable::parse(self.initial_power_table.as_deref());
        match manifest.initial_power_table {
            PowerTable::Defined(cid) => info!(%cid, "initial power table is defined"),
            PowerTable::Undefined => warn!("initial power table is undefined"),
        }
        manifest.network_name = self.network_name.clone();
        manifest.ec.period = self.block_delay;
        manifest.ec.head_lookback = HEAD_LOOKBACK;
        manifest.ec.finality = self.finality;
        manifest.ec.finalize = true;
        manifest.catch_up_alignment = self.block_delay / 2;
        manifest.bootstrap_epoch = self.bootstrap_epoch;
        manifest.certificate_exchange.minimum_poll_interval = self.block_delay;
        manifest.certificate_exchange.maximum_poll_interval = 4 * self.block_delay;
        manifest
    }
}

/// Source of manifest snapshots, selected once at startup.
pub enum Provider<N: Node> {
    /// A fixed manifest that never changes.
    Static(Manifest),

    /// Manifests published by the on-chain contract.
    Contract(contract::Poller<N>),
}

impl<N: Node> Provider<N> {
    /// Build the manifest from `params` and pick the provider serving it.
    ///
    /// A manifest that fails validation is not an error: the contract is polled every
    /// `poll_interval` instead.
    pub fn resolve(node: N, params: &Params, poll_interval: Duration) -> Self {
        let manifest = params.manifest();
        match manifest.validate() {
            Ok(()) => {
                info!(network = %manifest.network_name, "using static manifest");
                Self::Static(manifest)
            }
            Err(err) => {
                info!(?err, "using contract manifest");
                Self::Contract(contract::Poller::new(node, manifest, poll_interval))
            }
        }
    }

    /// The manifest served before any update.
    pub fn initial(&self) -> &Manifest {
        match self {
            Self::Static(manifest) => manifest,
            Self::Contract(poller) => poller.initial(),
        }
    }

    /// Start serving snapshots.
    pub fn start<E: Clock + Spawner>(self, context: E) -> Manifests {
        match self {
            Self::Static(manifest) => Manifests::new(manifest),
            Self::Contract(poller) => poller.start(context),
        }
    }
}

struct Inner {
    current: Arc<Manifest>,
    subscribers: Vec<mpsc::UnboundedSender<Arc<Manifest>>>,
}

/// Current manifest snapshot, possibly changing over time.
#[derive(Clone)]
pub struct Manifests {
    inner: Arc<Mutex<Inner>>,
}

impl Manifests {
    pub fn new(initial: Manifest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current: Arc::new(initial),
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn current(&self) -> Arc<Manifest> {
        self.inner.lock().unwrap().current.clone()
    }

    /// Receive every snapshot published after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<Manifest>> {
        let (sender, receiver) = mpsc::unbounded();
        self.inner.lock().unwrap().subscribers.push(sender);
        receiver
    }

    /// Replace the current snapshot, returning false if `manifest` is already current.
    pub(crate) fn publish(&self, manifest: Manifest) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if *inner.current == manifest {
            return false;
        }
        let manifest = Arc::new(manifest);
        inner.current = manifest.clone();
        inner
            .subscribers
            .retain(|subscriber| subscriber.unbounded_send(manifest.clone()).is_ok());
        true
    }
}
