//! Sign and broadcast the finality module's messages on behalf of local miners.
//!
//! # Overview
//!
//! The [Actor] consumes the module's stream of messages to sign. For every message it
//! asks the node which miners participate and, for each miner that has not yet signed
//! the message, prepares signing inputs, signs them through the node and hands the
//! signed message back to the module for broadcast. A miner is recorded as signed only
//! once its broadcast succeeds.
//!
//! Messages are usually re-delivered by the module while a round is in progress. A
//! repeated message refreshes the round's receipt time but keeps the set of signed
//! miners; a distinct message (or the absence of one) starts over with an empty set.
//!
//! # Catch-up
//!
//! A miner that starts participating after the message was first delivered would never
//! sign it if the round stalls. The [Broadcaster] polls the actor every [CHECK_INTERVAL]
//! and, once nothing was received for [SILENCE_THRESHOLD], signs the current message for
//! every participating miner still missing from the round.
//!
//! The round is owned by the actor alone. The broadcaster claims a miner through the
//! [Mailbox] before signing for it and releases the claim with the outcome, so no miner
//! is broadcast twice for the same message and claims against a superseded message are
//! ignored.
//!
//! # Failures
//!
//! Every failure is scoped to a single miner (see [Error]) except a failed miner query,
//! which skips the whole round. Without a signing credential the actor never signs and
//! only warns when miners are participating.

use crate::{
    finality::{Module, PrepareError},
    node::Node,
    signer::{self, Signer},
    MinerId,
};
use commonware_runtime::Clock;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

mod actor;
pub use actor::Actor;
mod catchup;
pub use catchup::Broadcaster;
mod ingress;
pub use ingress::{Closed, Mailbox};
mod metrics;
mod round;
pub use round::{Round, Snapshot};

/// How often the catch-up broadcaster checks whether the round stalled.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Time without receiving a message after which a round is considered stalled.
pub const SILENCE_THRESHOLD: Duration = Duration::from_secs(10);

/// Configuration for the [Actor].
pub struct Config<E: Clock, N: Node, M: Module> {
    pub node: N,
    pub module: M,

    /// Signer used for participation, `None` if the node accepts no signing requests.
    pub signer: Option<Signer<E, N>>,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,
}

/// Why a miner did not broadcast a signed message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("miner {0} has no voting power")]
    NoVotingPower(MinerId),
    #[error("failed to prepare signing inputs for miner {miner}: {reason}")]
    SigningInputError { miner: MinerId, reason: String },
    #[error("failed to sign for miner {miner}: {source}")]
    SignatureError {
        miner: MinerId,
        #[source]
        source: signer::Error,
    },
    #[error("failed to broadcast for miner {miner}: {reason}")]
    BroadcastError { miner: MinerId, reason: String },
}

impl Error {
    /// The miner that failed to participate.
    pub fn miner(&self) -> MinerId {
        match self {
            Error::NoVotingPower(miner)
            | Error::SigningInputError { miner, .. }
            | Error::SignatureError { miner, .. }
            | Error::BroadcastError { miner, .. } => *miner,
        }
    }
}

/// Sign `message` on behalf of `miner` and broadcast it.
async fn participate<E: Clock, N: Node, M: Module>(
    signer: &Signer<E, N>,
    module: &mut M,
    message: &M::Message,
    miner: MinerId,
) -> Result<(), Error> {
    let inputs = module
        .prepare_signing_inputs(message, miner)
        .map_err(|err| match err {
            PrepareError::NoPower => Error::NoVotingPower(miner),
            PrepareError::Other(reason) => Error::SigningInputError { miner, reason },
        })?;
    let signatures = signer
        .sign(&inputs)
        .await
        .map_err(|source| Error::SignatureError { miner, source })?;
    trace!(miner, "broadcasting");
    module
        .broadcast(inputs, signatures.payload, signatures.vrf)
        .await
        .map_err(|err| Error::BroadcastError {
            miner,
            reason: err.to_string(),
        })
}
