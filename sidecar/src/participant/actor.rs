use super::{
    ingress::{Mailbox, Message},
    metrics, participate, Config, Error, Round,
};
use crate::{finality::Module, node::Node, signer::Signer, MinerId};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use tracing::{debug, info, trace, warn};

/// Signs every message the module asks for on behalf of each participating miner.
///
/// The actor is the only owner of the [Round]. The catch-up broadcaster reads and updates
/// it through the [Mailbox], so a round message, its receipt time and the set of miners
/// that signed it are always observed together.
pub struct Actor<E: Clock + Spawner + Metrics, N: Node, M: Module> {
    context: E,
    node: N,
    module: M,
    signer: Option<Signer<E, N>>,

    mailbox: mpsc::Receiver<Message<M::Message>>,
    round: Round<M::Message>,

    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics, N: Node, M: Module> Actor<E, N, M> {
    /// Create a new actor and the mailbox used to reach it.
    pub fn new(context: E, cfg: Config<E, N, M>) -> (Self, Mailbox<M::Message>) {
        let (sender, receiver) = mpsc::channel(cfg.mailbox_size);
        let metrics = metrics::Metrics::init(context.clone());
        (
            Self {
                context,
                node: cfg.node,
                module: cfg.module,
                signer: cfg.signer,
                mailbox: receiver,
                round: Round::default(),
                metrics,
            },
            Mailbox::new(sender),
        )
    }

    /// Start the actor.
    ///
    /// The returned handle resolves once the module stops producing messages to sign.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) {
        let mut messages = self.module.messages_to_sign();
        loop {
            select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        info!("module stopped requesting signatures");
                        return;
                    };
                    self.handle_message(message).await;
                },
                mail = self.mailbox.next() => {
                    let Some(mail) = mail else {
                        debug!("mailbox closed");
                        break;
                    };
                    self.handle_mail(mail);
                },
            }
        }

        // Nobody will ask about the round anymore but the module still needs signatures
        while let Some(message) = messages.next().await {
            self.handle_message(message).await;
        }
        info!("module stopped requesting signatures");
    }

    async fn handle_message(&mut self, message: Option<M::Message>) {
        self.metrics.messages.inc();
        if self.round.receive(message, self.context.current()) {
            debug!(
                generation = self.round.generation(),
                message = ?self.round.message(),
                "new message to sign"
            );
        } else {
            trace!(generation = self.round.generation(), "message re-received");
        }

        let miners = match self.node.participating_miner_ids().await {
            Ok(miners) => miners,
            Err(err) => {
                warn!(?err, "failed to get participating miners, skipping round");
                return;
            }
        };
        let Some(signer) = &self.signer else {
            if !miners.is_empty() {
                warn!(
                    ?miners,
                    "cannot sign for participating miners: no credential for the node is configured"
                );
            }
            return;
        };
        let Some(message) = self.round.message().cloned() else {
            return;
        };

        for miner in miners {
            if !self.round.needs(miner) {
                continue;
            }
            let result = participate(signer, &mut self.module, &message, miner).await;
            if result.is_ok() {
                self.round.record(miner);
            }
            self.observe(miner, &result, false);
        }
    }

    fn handle_mail(&mut self, mail: Message<M::Message>) {
        match mail {
            Message::Stalled {
                threshold,
                responder,
            } => {
                let _ = responder.send(self.round.stalled(self.context.current(), threshold));
            }
            Message::Claim {
                generation,
                miner,
                responder,
            } => {
                let _ = responder.send(self.round.claim(generation, miner));
            }
            Message::Release {
                generation,
                miner,
                result,
            } => {
                if !self.round.release(generation, miner, result.is_ok()) {
                    debug!(generation, miner, "ignoring release of superseded round");
                }
                self.observe(miner, &result, true);
            }
        }
    }

    /// Record the outcome of one miner's participation.
    fn observe(&self, miner: MinerId, result: &Result<(), Error>, catch_up: bool) {
        match result {
            Ok(()) => {
                self.metrics.signed.inc();
                if catch_up {
                    self.metrics.catch_ups.inc();
                    info!(miner, "re-broadcast stalled message");
                } else {
                    debug!(miner, "broadcast signed message");
                }
            }
            Err(Error::NoVotingPower(_)) => {
                self.metrics.no_power.inc();
                debug!(miner, catch_up, "miner has no voting power");
            }
            Err(err) => {
                self.metrics.failures.inc();
                warn!(?err, catch_up, "failed to participate");
            }
        }
    }
}
