//! Sign messages with the miner keys held by the node.

use crate::{finality::Inputs, node::Node};
use bytes::Bytes;
use commonware_macros::select;
use commonware_runtime::Clock;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Default bound on a single signing call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("signing timed out after {0:?}")]
    Timeout(Duration),
    #[error("node failed to sign: {0}")]
    Node(String),
}

/// Signatures over a message's payload and (optional) VRF ticket input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signatures {
    pub payload: Bytes,
    pub vrf: Option<Bytes>,
}

/// Requests signatures from the node without knowing where keys are kept.
///
/// Every call to the node is bounded by `timeout` so an unresponsive key cannot hold up
/// the other miners of a round.
#[derive(Clone)]
pub struct Signer<E: Clock, N: Node> {
    context: E,
    node: N,
    timeout: Duration,
}

impl<E: Clock, N: Node> Signer<E, N> {
    pub fn new(context: E, node: N, timeout: Duration) -> Self {
        Self {
            context,
            node,
            timeout,
        }
    }

    /// Sign the payload and, if present, the VRF input of `inputs`.
    pub async fn sign<I: Inputs>(&self, inputs: &I) -> Result<Signatures, Error> {
        trace!(miner = inputs.miner(), "signing");
        let payload = self.sign_bytes(inputs.public_key(), inputs.payload()).await?;
        let vrf = match inputs.vrf() {
            Some(vrf) => Some(self.sign_bytes(inputs.public_key(), vrf).await?),
            None => None,
        };
        Ok(Signatures { payload, vrf })
    }

    async fn sign_bytes(&self, public_key: &[u8], message: &[u8]) -> Result<Bytes, Error> {
        select! {
            result = self.node.sign(public_key, message) => {
                result.map_err(|err| Error::Node(err.to_string()))
            },
            _ = self.context.sleep(self.timeout) => {
                Err(Error::Timeout(self.timeout))
            },
        }
    }
}
