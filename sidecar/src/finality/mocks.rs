//! Mock finality module and environment.

use super::{PrepareError, Progress};
use crate::{
    manifest::{Manifest, Manifests},
    MinerId,
};
use bytes::Bytes;
use futures::channel::mpsc;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("broadcast rejected")]
    Broadcast,
    #[error("not running")]
    NotRunning,
    #[error("environment failure: {0}")]
    Environment(&'static str),
    #[error("connection refused")]
    Connect,
}

/// Key a mock miner signs with.
pub fn public_key(miner: MinerId) -> Vec<u8> {
    miner.to_be_bytes().to_vec()
}

/// A message to sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub instance: u64,
    pub round: u64,
    pub vrf: bool,
}

impl Message {
    pub fn new(instance: u64, round: u64) -> Self {
        Self {
            instance,
            round,
            vrf: false,
        }
    }

    pub fn with_vrf(mut self) -> Self {
        self.vrf = true;
        self
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = self.instance.to_be_bytes().to_vec();
        payload.extend_from_slice(&self.round.to_be_bytes());
        payload
    }
}

pub struct Inputs {
    pub message: Message,
    miner: MinerId,
    public_key: Vec<u8>,
    payload: Vec<u8>,
    vrf: Option<Vec<u8>>,
}

impl super::Inputs for Inputs {
    fn miner(&self) -> MinerId {
        self.miner
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn vrf(&self) -> Option<&[u8]> {
        self.vrf.as_deref()
    }
}

/// A message handed back to the module for broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broadcast {
    pub miner: MinerId,
    pub message: Message,
    pub payload_signature: Bytes,
    pub vrf_signature: Option<Bytes>,
}

struct State {
    running: bool,
    messages: Option<mpsc::Receiver<Option<Message>>>,
    powered: HashSet<MinerId>,
    broken: HashSet<MinerId>,
    rejected: HashSet<MinerId>,
    broadcasts: Vec<Broadcast>,
    certificates: BTreeMap<u64, Value>,
    progress: Progress,
}

/// A mock [super::Module] driven by the test through a message channel.
#[derive(Clone)]
pub struct Module {
    manifests: Manifests,
    state: Arc<Mutex<State>>,
}

impl Module {
    /// Create a module and the sender the test pushes messages to sign through.
    pub fn new(manifests: Manifests) -> (Self, mpsc::Sender<Option<Message>>) {
        let (sender, receiver) = mpsc::channel(16);
        (
            Self {
                manifests,
                state: Arc::new(Mutex::new(State {
                    running: false,
                    messages: Some(receiver),
                    powered: HashSet::new(),
                    broken: HashSet::new(),
                    rejected: HashSet::new(),
                    broadcasts: Vec::new(),
                    certificates: BTreeMap::new(),
                    progress: Progress::default(),
                })),
            },
            sender,
        )
    }

    /// Give `miner` power in every instance.
    pub fn power(&self, miner: MinerId) {
        self.state.lock().unwrap().powered.insert(miner);
    }

    /// Make signing-input preparation fail for `miner` with something other than
    /// missing power.
    pub fn break_miner(&self, miner: MinerId) {
        self.state.lock().unwrap().broken.insert(miner);
    }

    /// Reject broadcasts signed by `miner`.
    pub fn reject_broadcasts(&self, miner: MinerId) {
        self.state.lock().unwrap().rejected.insert(miner);
    }

    pub fn set_progress(&self, progress: Progress) {
        self.state.lock().unwrap().progress = progress;
    }

    pub fn add_certificate(&self, instance: u64, certificate: Value) {
        self.state
            .lock()
            .unwrap()
            .certificates
            .insert(instance, certificate);
    }

    pub fn broadcasts(&self) -> Vec<Broadcast> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// Broadcasts of `miner` for `message`.
    pub fn broadcasts_for(&self, miner: MinerId, message: &Message) -> usize {
        self.broadcasts()
            .iter()
            .filter(|b| b.miner == miner && &b.message == message)
            .count()
    }
}

impl super::Module for Module {
    type Error = Error;
    type Message = Message;
    type Inputs = Inputs;
    type Certificate = Value;

    async fn start(&mut self) -> Result<(), Error> {
        self.state.lock().unwrap().running = true;
        Ok(())
    }

    fn messages_to_sign(&mut self) -> mpsc::Receiver<Option<Message>> {
        self.state
            .lock()
            .unwrap()
            .messages
            .take()
            .expect("messages already taken")
    }

    fn prepare_signing_inputs(
        &self,
        message: &Message,
        miner: MinerId,
    ) -> Result<Inputs, PrepareError> {
        let state = self.state.lock().unwrap();
        if state.broken.contains(&miner) {
            return Err(PrepareError::Other(String::from("missing key")));
        }
        if !state.powered.contains(&miner) {
            return Err(PrepareError::NoPower);
        }
        let payload = message.payload();
        Ok(Inputs {
            message: message.clone(),
            miner,
            public_key: public_key(miner),
            vrf: message.vrf.then(|| [b"vrf".as_slice(), payload.as_slice()].concat()),
            payload,
        })
    }

    async fn broadcast(
        &mut self,
        inputs: Inputs,
        payload_signature: Bytes,
        vrf_signature: Option<Bytes>,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(&inputs.miner) {
            return Err(Error::Broadcast);
        }
        state.broadcasts.push(Broadcast {
            miner: inputs.miner,
            message: inputs.message,
            payload_signature,
            vrf_signature,
        });
        Ok(())
    }

    fn manifest(&self) -> Arc<Manifest> {
        self.manifests.current()
    }

    async fn progress(&self) -> Result<Progress, Error> {
        let state = self.state.lock().unwrap();
        if !state.running {
            return Err(Error::NotRunning);
        }
        Ok(state.progress.clone())
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    async fn latest_certificate(&self) -> Result<Option<Value>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.certificates.values().next_back().cloned())
    }

    async fn certificate(&self, instance: u64) -> Result<Option<Value>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.certificates.get(&instance).cloned())
    }
}

/// A mock [super::Host].
pub struct Host {
    peer_id: String,
    refuse: bool,
    observed: Arc<Mutex<Observed>>,
}

impl super::Host for Host {
    type Error = Error;

    fn peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn connect(&mut self, peer: &str, addrs: &[String]) -> Result<(), Error> {
        if self.refuse {
            return Err(Error::Connect);
        }
        self.observed
            .lock()
            .unwrap()
            .connected
            .push((peer.to_string(), addrs.to_vec()));
        Ok(())
    }
}

/// Which steps of a mock [Environment] fail.
#[derive(Clone, Copy, Default)]
pub struct Failures {
    pub host: bool,
    pub connect: bool,
    pub store: bool,
    pub module: bool,
}

/// Calls observed by a mock [Environment].
#[derive(Default)]
pub struct Observed {
    pub networks: Vec<String>,
    pub stores: Vec<PathBuf>,
    pub connected: Vec<(String, Vec<String>)>,
    pub manifests: Option<Manifests>,
}

/// A mock [super::Environment] building mock collaborators.
pub struct Environment {
    failures: Failures,
    observed: Arc<Mutex<Observed>>,
    built: mpsc::UnboundedSender<(Module, mpsc::Sender<Option<Message>>)>,
}

impl Environment {
    /// Create an environment and a receiver yielding every module it builds (with the
    /// sender that feeds it messages to sign).
    pub fn new(
        failures: Failures,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<(Module, mpsc::Sender<Option<Message>>)>,
    ) {
        let (built, receiver) = mpsc::unbounded();
        (
            Self {
                failures,
                observed: Arc::new(Mutex::new(Observed::default())),
                built,
            },
            receiver,
        )
    }

    /// Calls observed so far.
    pub fn observed(&self) -> Arc<Mutex<Observed>> {
        self.observed.clone()
    }
}

impl super::Environment for Environment {
    type Error = Error;
    type Host = Host;
    type Store = PathBuf;
    type Module = Module;

    async fn host(&mut self, network: &str) -> Result<Host, Error> {
        if self.failures.host {
            return Err(Error::Environment("host"));
        }
        self.observed
            .lock()
            .unwrap()
            .networks
            .push(network.to_string());
        Ok(Host {
            peer_id: String::from("12D3KooWSidecar"),
            refuse: self.failures.connect,
            observed: self.observed.clone(),
        })
    }

    async fn store(&mut self, path: &Path) -> Result<PathBuf, Error> {
        if self.failures.store {
            return Err(Error::Environment("store"));
        }
        self.observed
            .lock()
            .unwrap()
            .stores
            .push(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    async fn module(
        &mut self,
        manifests: Manifests,
        _store: PathBuf,
        _host: Host,
    ) -> Result<Module, Error> {
        if self.failures.module {
            return Err(Error::Environment("module"));
        }
        self.observed.lock().unwrap().manifests = Some(manifests.clone());
        let (module, sender) = Module::new(manifests);
        let _ = self.built.unbounded_send((module.clone(), sender));
        Ok(module)
    }
}
