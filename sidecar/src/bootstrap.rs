//! Wait for the node and wire up the collaborators of the finality module.

use crate::{
    finality::{Environment, Host},
    node::Node,
};
use commonware_runtime::Clock;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Delay between liveness probes of an unreachable node.
pub const RETRY: Duration = Duration::from_secs(5);

/// Directory (under the root) holding the module's store.
pub const STORE: &str = "db";

/// Errors that abort bootstrapping.
#[derive(Debug, Error)]
pub enum Error {
    #[error("node unreachable after {0} attempts")]
    Unreachable(usize),
    #[error("failed to get listen addresses: {0}")]
    ListenAddrs(String),
    #[error("failed to create host: {0}")]
    Host(String),
    #[error("failed to protect peer {peer}: {reason}")]
    Protect { peer: String, reason: String },
    #[error("failed to connect to node: {0}")]
    Connect(String),
    #[error("failed to open store: {0}")]
    Store(String),
}

/// Configuration for [bootstrap].
#[derive(Clone, Debug)]
pub struct Config {
    /// Delay between liveness probes.
    pub retry: Duration,

    /// Give up after this many failed probes (never if `None`).
    pub max_attempts: Option<usize>,

    /// Directory holding the sidecar's data.
    pub root: PathBuf,
}

impl Config {
    pub fn new(root: PathBuf) -> Self {
        Self {
            retry: RETRY,
            max_attempts: None,
            root,
        }
    }
}

/// Collaborators produced by [bootstrap].
pub struct Bootstrapped<V: Environment> {
    /// Name of the network the node is on.
    pub network: String,
    pub host: V::Host,
    pub store: V::Store,
}

/// Liveness probe of the node.
enum Probe {
    Offline { attempts: usize },
    Online { network: String },
}

impl Probe {
    /// Probe once, returning the next state or an error once `max_attempts` probes failed.
    async fn step<N: Node>(self, node: &N, max_attempts: Option<usize>) -> Result<Self, Error> {
        let Probe::Offline { attempts } = self else {
            return Ok(self);
        };
        let attempts = attempts + 1;
        match node.network_name().await {
            Ok(network) => {
                info!(%network, attempts, "node is online");
                Ok(Probe::Online { network })
            }
            Err(err) if max_attempts.is_some_and(|max| attempts >= max) => {
                warn!(?err, attempts, "giving up on node");
                Err(Error::Unreachable(attempts))
            }
            Err(err) => {
                warn!(?err, attempts, "waiting for node");
                Ok(Probe::Offline { attempts })
            }
        }
    }
}

/// Wait until the node responds, then create the host, connect it to the node and open
/// the store.
///
/// Only the liveness probe is retried; every later failure is returned.
pub async fn bootstrap<E: Clock, N: Node, V: Environment>(
    context: &E,
    cfg: &Config,
    node: &N,
    environment: &mut V,
) -> Result<Bootstrapped<V>, Error> {
    let mut probe = Probe::Offline { attempts: 0 };
    let network = loop {
        probe = probe.step(node, cfg.max_attempts).await?;
        match probe {
            Probe::Online { network } => break network,
            Probe::Offline { .. } => context.sleep(cfg.retry).await,
        }
    };

    let addrs = node
        .listen_addrs()
        .await
        .map_err(|err| Error::ListenAddrs(err.to_string()))?;
    let mut host = environment
        .host(&network)
        .await
        .map_err(|err| Error::Host(err.to_string()))?;

    let peer = host.peer_id();
    let protected = node
        .protect_peer(&peer)
        .await
        .map_err(|err| Error::Protect {
            peer: peer.clone(),
            reason: err.to_string(),
        })?;
    debug!(%peer, protected, "protected host on node");

    host.connect(&addrs.id, &addrs.addrs)
        .await
        .map_err(|err| Error::Connect(err.to_string()))?;
    info!(node = %addrs.id, "connected to node");

    let store = environment
        .store(&cfg.root.join(STORE))
        .await
        .map_err(|err| Error::Store(err.to_string()))?;
    Ok(Bootstrapped {
        network,
        host,
        store,
    })
}
