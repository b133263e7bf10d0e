//! Poll the node for the manifest published by the on-chain contract.

use super::{Manifest, Manifests};
use crate::node::Node;
use commonware_runtime::{Clock, Spawner};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodically fetches the contract manifest and publishes new snapshots.
pub struct Poller<N: Node> {
    node: N,
    initial: Manifest,
    interval: Duration,
}

impl<N: Node> Poller<N> {
    pub fn new(node: N, initial: Manifest, interval: Duration) -> Self {
        Self {
            node,
            initial,
            interval,
        }
    }

    /// Manifest served until the contract publishes one.
    pub fn initial(&self) -> &Manifest {
        &self.initial
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the polling loop, returning the snapshots it publishes to.
    pub fn start<E: Clock + Spawner>(self, context: E) -> Manifests {
        let manifests = Manifests::new(self.initial.clone());
        let published = manifests.clone();
        context.spawn(move |context| self.run(context, published));
        manifests
    }

    async fn run<E: Clock>(self, context: E, manifests: Manifests) {
        loop {
            context.sleep(self.interval).await;
            let manifest = match self.node.manifest_from_contract().await {
                Ok(Some(manifest)) => manifest,
                Ok(None) => {
                    debug!("contract has not published a manifest");
                    continue;
                }
                Err(err) => {
                    warn!(?err, "failed to fetch manifest from contract");
                    continue;
                }
            };
            if let Err(err) = manifest.validate() {
                warn!(?err, "ignoring invalid contract manifest");
                continue;
            }
            let network = manifest.network_name.clone();
            let bootstrap_epoch = manifest.bootstrap_epoch;
            if manifests.publish(manifest) {
                info!(network = %network, bootstrap_epoch, "contract manifest updated");
            }
        }
    }
}
