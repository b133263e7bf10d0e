//! Query the remote node that the sidecar participates on behalf of.
//!
//! The node is treated as an oracle: it reports network parameters, the miners it
//! currently runs and signs messages with their keys. [Client] talks to a real node
//! over JSON-RPC.

use crate::{manifest::Manifest, MinerId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

mod client;
pub use client::{Client, Error};

#[cfg(test)]
pub mod mocks;

/// Listen addresses of the node's P2P host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
    /// Peer id of the node.
    #[serde(rename = "ID")]
    pub id: String,

    /// Multiaddresses the node listens on.
    #[serde(rename = "Addrs", default)]
    pub addrs: Vec<String>,
}

/// Version information reported by the node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Version {
    pub version: String,

    #[serde(rename = "APIVersion", default)]
    pub api_version: u64,

    /// Block delay in seconds.
    pub block_delay: u64,
}

impl Version {
    pub fn block_delay(&self) -> Duration {
        Duration::from_secs(self.block_delay)
    }
}

/// Remote procedure calls the sidecar issues against the node.
pub trait Node: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether the node accepts write calls from us (i.e. a credential is configured).
    ///
    /// Without it the sidecar only observes and never signs.
    fn can_sign(&self) -> bool;

    /// Name of the network the node is on. Doubles as the liveness probe.
    fn network_name(&self) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Addresses the node's P2P host listens on.
    fn listen_addrs(&self) -> impl Future<Output = Result<AddrInfo, Self::Error>> + Send;

    fn version(&self) -> impl Future<Output = Result<Version, Self::Error>> + Send;

    /// Miners that currently participate through this node.
    fn participating_miner_ids(
        &self,
    ) -> impl Future<Output = Result<Vec<MinerId>, Self::Error>> + Send;

    /// Mark `peer` as protected so the node never prunes its connection to it.
    fn protect_peer(&self, peer: &str) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Sign `message` with the key behind `public_key`.
    fn sign(
        &self,
        public_key: &[u8],
        message: &[u8],
    ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;

    /// Latest manifest published by the on-chain contract, if any.
    fn manifest_from_contract(
        &self,
    ) -> impl Future<Output = Result<Option<Manifest>, Self::Error>> + Send;
}
