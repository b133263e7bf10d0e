//! Interfaces of the finality module and the environment it runs in.
//!
//! The sidecar does not implement consensus. It drives a [Module] built by an
//! [Environment]: the module asks for messages to be signed, the sidecar decides on whose
//! behalf, signs them through the node and hands them back for broadcast.

use crate::{
    manifest::{Manifest, Manifests},
    MinerId,
};
use bytes::Bytes;
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use std::{future::Future, path::Path, sync::Arc};
use thiserror::Error;

#[cfg(test)]
pub mod mocks;

/// Why signing inputs could not be prepared for a miner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrepareError {
    /// The miner has no power in the current instance.
    #[error("no power")]
    NoPower,
    #[error("{0}")]
    Other(String),
}

/// Everything needed to sign a message on behalf of one miner.
pub trait Inputs: Send + Sync + 'static {
    fn miner(&self) -> MinerId;

    /// Key the miner signs with.
    fn public_key(&self) -> &[u8];

    /// Payload to sign.
    fn payload(&self) -> &[u8];

    /// VRF ticket input, if this message carries one.
    fn vrf(&self) -> Option<&[u8]>;
}

/// Consensus progress reported by the module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Progress {
    #[serde(rename = "ID")]
    pub instance: u64,
    pub round: u64,
    pub phase: u8,
}

/// A running finality module.
///
/// Handles are cheap to clone and shared between the participation loop, the catch-up
/// broadcaster and the RPC endpoint.
pub trait Module: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// A message waiting for signatures.
    type Message: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static;

    type Inputs: Inputs;

    /// Finality certificate, opaque to the sidecar.
    type Certificate: Serialize + Send + 'static;

    fn start(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Stream of messages to sign. `None` means there is nothing to sign this round.
    fn messages_to_sign(&mut self) -> mpsc::Receiver<Option<Self::Message>>;

    /// Prepare the signing inputs of `message` for `miner`.
    fn prepare_signing_inputs(
        &self,
        message: &Self::Message,
        miner: MinerId,
    ) -> Result<Self::Inputs, PrepareError>;

    /// Broadcast a signed message.
    fn broadcast(
        &mut self,
        inputs: Self::Inputs,
        payload_signature: Bytes,
        vrf_signature: Option<Bytes>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn manifest(&self) -> Arc<Manifest>;

    fn progress(&self) -> impl Future<Output = Result<Progress, Self::Error>> + Send;

    fn is_running(&self) -> bool;

    fn latest_certificate(
        &self,
    ) -> impl Future<Output = Result<Option<Self::Certificate>, Self::Error>> + Send;

    fn certificate(
        &self,
        instance: u64,
    ) -> impl Future<Output = Result<Option<Self::Certificate>, Self::Error>> + Send;
}

/// Local P2P host the module gossips through.
pub trait Host: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Peer id of this host.
    fn peer_id(&self) -> String;

    /// Connect to a peer listening on `addrs`.
    fn connect(
        &mut self,
        peer: &str,
        addrs: &[String],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Builds the collaborators the sidecar wires together.
pub trait Environment: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Host: Host;

    /// Durable key-value store owned by the module.
    type Store: Send + 'static;

    type Module: Module;

    /// Create a P2P host for `network`.
    fn host(
        &mut self,
        network: &str,
    ) -> impl Future<Output = Result<Self::Host, Self::Error>> + Send;

    /// Open the store at `path`.
    fn store(
        &mut self,
        path: &Path,
    ) -> impl Future<Output = Result<Self::Store, Self::Error>> + Send;

    /// Create the module.
    fn module(
        &mut self,
        manifests: Manifests,
        store: Self::Store,
        host: Self::Host,
    ) -> impl Future<Output = Result<Self::Module, Self::Error>> + Send;
}
