use super::Snapshot;
use crate::MinerId;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use std::time::Duration;
use thiserror::Error;

/// The [`Actor`](super::Actor) stopped and no longer answers requests.
#[derive(Debug, Error)]
#[error("participant actor stopped")]
pub struct Closed;

/// Requests the catch-up broadcaster makes of the [`Actor`](super::Actor).
pub enum Message<T> {
    /// Request the current message if the round has been silent for `threshold`.
    Stalled {
        threshold: Duration,
        responder: oneshot::Sender<Option<Snapshot<T>>>,
    },

    /// Reserve a miner of round `generation` for signing.
    ///
    /// The responder is sent false if the miner no longer needs to sign.
    Claim {
        generation: u64,
        miner: MinerId,
        responder: oneshot::Sender<bool>,
    },

    /// Release a claimed miner with the outcome of its participation.
    Release {
        generation: u64,
        miner: MinerId,
        result: Result<(), super::Error>,
    },
}

/// Ingress mailbox for [`Actor`](super::Actor).
#[derive(Clone)]
pub struct Mailbox<T> {
    sender: mpsc::Sender<Message<T>>,
}

impl<T> Mailbox<T> {
    pub(super) fn new(sender: mpsc::Sender<Message<T>>) -> Self {
        Self { sender }
    }

    /// The current round message if nothing was received for at least `threshold`.
    pub async fn stalled(&mut self, threshold: Duration) -> Result<Option<Snapshot<T>>, Closed> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Stalled {
                threshold,
                responder,
            })
            .await
            .map_err(|_| Closed)?;
        receiver.await.map_err(|_| Closed)
    }

    /// Reserve `miner` for signing the message of round `generation`.
    pub async fn claim(&mut self, generation: u64, miner: MinerId) -> bool {
        let (responder, receiver) = oneshot::channel();
        if self
            .sender
            .send(Message::Claim {
                generation,
                miner,
                responder,
            })
            .await
            .is_err()
        {
            return false;
        }
        receiver.await.unwrap_or(false)
    }

    /// Release a claim made with [`Mailbox::claim`].
    pub async fn release(
        &mut self,
        generation: u64,
        miner: MinerId,
        result: Result<(), super::Error>,
    ) {
        let _ = self
            .sender
            .send(Message::Release {
                generation,
                miner,
                result,
            })
            .await;
    }
}
