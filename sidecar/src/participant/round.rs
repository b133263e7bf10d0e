use crate::MinerId;
use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime},
};

/// A stalled round message handed to the catch-up broadcaster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<T> {
    /// Identifies the round message; bumped whenever a new message supersedes the last.
    pub generation: u64,
    pub message: T,
}

/// The message awaiting signatures and who has already signed it.
///
/// The message, its receipt time and the miner sets are only ever updated together.
/// A miner is `claimed` while the catch-up broadcaster signs on its behalf and moves to
/// `signed` once its broadcast succeeded.
#[derive(Debug)]
pub struct Round<T> {
    message: Option<T>,
    received: Option<SystemTime>,
    generation: u64,
    signed: BTreeSet<MinerId>,
    claimed: BTreeSet<MinerId>,
}

impl<T> Default for Round<T> {
    fn default() -> Self {
        Self {
            message: None,
            received: None,
            generation: 0,
            signed: BTreeSet::new(),
            claimed: BTreeSet::new(),
        }
    }
}

impl<T: Clone + PartialEq> Round<T> {
    /// Record a (possibly repeated) message to sign received at `now`.
    ///
    /// Returns true if `message` supersedes the current one, in which case the miner sets
    /// are cleared.
    pub fn receive(&mut self, message: Option<T>, now: SystemTime) -> bool {
        self.received = Some(now);
        if self.message == message {
            return false;
        }
        self.message = message;
        self.generation += 1;
        self.signed.clear();
        self.claimed.clear();
        true
    }

    pub fn message(&self) -> Option<&T> {
        self.message.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signed(&self) -> &BTreeSet<MinerId> {
        &self.signed
    }

    /// Whether `miner` still has to sign the current message.
    pub fn needs(&self, miner: MinerId) -> bool {
        self.message.is_some() && !self.signed.contains(&miner) && !self.claimed.contains(&miner)
    }

    /// Record that a signed copy of the current message was broadcast for `miner`.
    pub fn record(&mut self, miner: MinerId) -> bool {
        self.claimed.remove(&miner);
        self.signed.insert(miner)
    }

    /// The current message if nothing was received for at least `threshold`.
    pub fn stalled(&self, now: SystemTime, threshold: Duration) -> Option<Snapshot<T>> {
        let message = self.message.as_ref()?;
        let received = self.received?;
        let silence = now.duration_since(received).unwrap_or(Duration::ZERO);
        (silence >= threshold).then(|| Snapshot {
            generation: self.generation,
            message: message.clone(),
        })
    }

    /// Reserve `miner` for signing by someone other than the owner of the round.
    ///
    /// Fails if `generation` is no longer current or the miner is already signed or claimed.
    pub fn claim(&mut self, generation: u64, miner: MinerId) -> bool {
        if generation != self.generation || !self.needs(miner) {
            return false;
        }
        self.claimed.insert(miner)
    }

    /// Release a claim, recording `miner` as signed if its broadcast succeeded.
    ///
    /// Returns false (and changes nothing) if the claim belongs to a superseded message.
    pub fn release(&mut self, generation: u64, miner: MinerId, broadcast: bool) -> bool {
        if generation != self.generation || !self.claimed.contains(&miner) {
            return false;
        }
        if broadcast {
            self.record(miner);
        } else {
            self.claimed.remove(&miner);
        }
        true
    }
}
