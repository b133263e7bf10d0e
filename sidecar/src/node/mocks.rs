//! Mock [crate::node::Node] with scriptable responses.

use super::{AddrInfo, Version};
use crate::{manifest::Manifest, MinerId};
use bytes::Bytes;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node unavailable")]
    Unavailable,
    #[error("call rejected")]
    Rejected,
}

/// Initial behavior of a mock [Node].
pub struct Config {
    pub network_name: String,

    /// Number of liveness probes that fail before the node comes online.
    pub offline_probes: usize,

    pub listen_addrs: Option<AddrInfo>,
    pub block_delay: u64,
    pub can_sign: bool,
    pub protect: bool,
    pub miners: Vec<MinerId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_name: String::from("calibrationnet"),
            offline_probes: 0,
            listen_addrs: Some(AddrInfo {
                id: String::from("12D3KooWNode"),
                addrs: vec![String::from("/ip4/127.0.0.1/tcp/1234")],
            }),
            block_delay: 30,
            can_sign: true,
            protect: true,
            miners: Vec::new(),
        }
    }
}

struct State {
    config: Config,
    probes: usize,
    miner_queries: usize,
    fail_miners: bool,
    fail_contract: bool,
    contract: Option<Manifest>,
    protected: Vec<String>,
    rejected_keys: HashSet<Vec<u8>>,
    stalled_keys: HashSet<Vec<u8>>,
    requested: Vec<Vec<u8>>,
    signed: Vec<(Vec<u8>, Vec<u8>)>,
}

/// A mock node shared between the code under test and the test itself.
#[derive(Clone)]
pub struct Node {
    state: Arc<Mutex<State>>,
}

impl Node {
    pub fn new(config: Config) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                config,
                probes: 0,
                miner_queries: 0,
                fail_miners: false,
                fail_contract: false,
                contract: None,
                protected: Vec::new(),
                rejected_keys: HashSet::new(),
                stalled_keys: HashSet::new(),
                requested: Vec::new(),
                signed: Vec::new(),
            })),
        }
    }

    pub fn set_miners(&self, miners: Vec<MinerId>) {
        self.state.lock().unwrap().config.miners = miners;
    }

    pub fn fail_miners(&self, fail: bool) {
        self.state.lock().unwrap().fail_miners = fail;
    }

    pub fn fail_contract(&self, fail: bool) {
        self.state.lock().unwrap().fail_contract = fail;
    }

    pub fn set_contract_manifest(&self, manifest: Option<Manifest>) {
        self.state.lock().unwrap().contract = manifest;
    }

    /// Reject every signing request for `public_key`.
    pub fn reject_key(&self, public_key: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .rejected_keys
            .insert(public_key.to_vec());
    }

    /// Never answer signing requests for `public_key`.
    pub fn stall_key(&self, public_key: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .stalled_keys
            .insert(public_key.to_vec());
    }

    pub fn probes(&self) -> usize {
        self.state.lock().unwrap().probes
    }

    pub fn miner_queries(&self) -> usize {
        self.state.lock().unwrap().miner_queries
    }

    pub fn protected(&self) -> Vec<String> {
        self.state.lock().unwrap().protected.clone()
    }

    /// Number of signing requests received for `public_key`, answered or not.
    pub fn requests(&self, public_key: &[u8]) -> usize {
        let state = self.state.lock().unwrap();
        state
            .requested
            .iter()
            .filter(|key| key.as_slice() == public_key)
            .count()
    }

    /// Signing requests answered so far as `(public_key, message)`.
    pub fn signed(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.state.lock().unwrap().signed.clone()
    }

    /// Signature the mock produces for `message`.
    pub fn signature(public_key: &[u8], message: &[u8]) -> Bytes {
        let mut signature = public_key.to_vec();
        signature.extend_from_slice(message);
        Bytes::from(signature)
    }
}

impl super::Node for Node {
    type Error = Error;

    fn can_sign(&self) -> bool {
        self.state.lock().unwrap().config.can_sign
    }

    async fn network_name(&self) -> Result<String, Error> {
        let mut state = self.state.lock().unwrap();
        state.probes += 1;
        if state.probes <= state.config.offline_probes {
            return Err(Error::Unavailable);
        }
        Ok(state.config.network_name.clone())
    }

    async fn listen_addrs(&self) -> Result<AddrInfo, Error> {
        let state = self.state.lock().unwrap();
        state.config.listen_addrs.clone().ok_or(Error::Rejected)
    }

    async fn version(&self) -> Result<Version, Error> {
        let state = self.state.lock().unwrap();
        Ok(Version {
            version: String::from("mock"),
            api_version: 1,
            block_delay: state.config.block_delay,
        })
    }

    async fn participating_miner_ids(&self) -> Result<Vec<MinerId>, Error> {
        let mut state = self.state.lock().unwrap();
        state.miner_queries += 1;
        if state.fail_miners {
            return Err(Error::Unavailable);
        }
        Ok(state.config.miners.clone())
    }

    async fn protect_peer(&self, peer: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().unwrap();
        if !state.config.protect {
            return Err(Error::Rejected);
        }
        state.protected.push(peer.to_string());
        Ok(true)
    }

    async fn sign(&self, public_key: &[u8], message: &[u8]) -> Result<Bytes, Error> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            state.requested.push(public_key.to_vec());
            if state.rejected_keys.contains(public_key) {
                return Err(Error::Rejected);
            }
            let stalled = state.stalled_keys.contains(public_key);
            if !stalled {
                state.signed.push((public_key.to_vec(), message.to_vec()));
            }
            stalled
        };
        if stalled {
            futures::future::pending::<()>().await;
        }
        Ok(Self::signature(public_key, message))
    }

    async fn manifest_from_contract(&self) -> Result<Option<Manifest>, Error> {
        let state = self.state.lock().unwrap();
        if state.fail_contract {
            return Err(Error::Unavailable);
        }
        Ok(state.contract.clone())
    }
}
