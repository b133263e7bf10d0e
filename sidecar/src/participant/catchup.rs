use super::{participate, Mailbox, CHECK_INTERVAL, SILENCE_THRESHOLD};
use crate::{finality::Module, node::Node, signer::Signer};
use commonware_runtime::{Clock, Handle, Spawner};
use tracing::{debug, trace};

/// Re-signs the current message for miners that missed it once the module has gone quiet.
///
/// Every [CHECK_INTERVAL] the broadcaster asks the [Actor](super::Actor) whether the round
/// has been silent for [SILENCE_THRESHOLD]. If so, it claims each participating miner that
/// has not yet signed the current message, signs and broadcasts on its behalf and reports
/// the outcome back.
pub struct Broadcaster<E: Clock + Spawner, N: Node, M: Module> {
    context: E,
    node: N,
    module: M,
    signer: Signer<E, N>,
    mailbox: Mailbox<M::Message>,
}

impl<E: Clock + Spawner, N: Node, M: Module> Broadcaster<E, N, M> {
    pub fn new(
        context: E,
        node: N,
        module: M,
        signer: Signer<E, N>,
        mailbox: Mailbox<M::Message>,
    ) -> Self {
        Self {
            context,
            node,
            module,
            signer,
            mailbox,
        }
    }

    /// Start the broadcaster.
    ///
    /// The returned handle resolves once the [Actor](super::Actor) has stopped.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) {
        loop {
            self.context.sleep(CHECK_INTERVAL).await;
            let snapshot = match self.mailbox.stalled(SILENCE_THRESHOLD).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(_) => {
                    debug!("participant stopped, ending catch-up");
                    return;
                }
            };
            trace!(generation = snapshot.generation, "round stalled");

            let miners = match self.node.participating_miner_ids().await {
                Ok(miners) => miners,
                Err(err) => {
                    debug!(?err, "failed to get participating miners for catch-up");
                    continue;
                }
            };
            for miner in miners {
                if !self.mailbox.claim(snapshot.generation, miner).await {
                    continue;
                }
                let result =
                    participate(&self.signer, &mut self.module, &snapshot.message, miner).await;
                self.mailbox
                    .release(snapshot.generation, miner, result)
                    .await;
            }
        }
    }
}
