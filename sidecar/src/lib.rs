//! Participate in fast finality on behalf of the miners of a remote node.
//!
//! The sidecar runs next to a node that does not implement the finality gadget itself.
//! It learns the network from the node, builds (or polls for) the consensus manifest,
//! starts a finality [Module](finality::Module) and then signs every message the module
//! asks for on behalf of the miners the node reports as participating.
//!
//! # Startup
//!
//! 1. [bootstrap]: wait for the node to respond, create the P2P host, protect it on the
//!    node, connect it to the node and open the store.
//! 2. [manifest]: derive the manifest from the node's block delay and select a static or
//!    contract-polled [Provider](manifest::Provider).
//! 3. Create and start the module.
//! 4. [rpc]: serve the module's query surface to operators.
//! 5. [participant]: sign and broadcast messages, catching up stalled rounds.
//!
//! Any failure after the node came online aborts [run].
//!
//! # Launching
//!
//! The sidecar is embedded next to the finality module's [Environment]. A binary passes
//! its arguments and environment to [launch], which reads the [Config], installs
//! [telemetry] and runs the sidecar on a `tokio` runtime.

use commonware_runtime::{Clock, Handle, Metrics, Runner, Spawner};
use finality::{Environment, Module};
use manifest::{Params, Provider};
use node::Node;
use participant::{Actor, Broadcaster};
use signer::Signer;
use std::ffi::OsString;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, Level};

pub mod bootstrap;
pub mod config;
pub mod finality;
pub mod manifest;
pub mod node;
pub mod participant;
pub mod rpc;
pub mod signer;
pub mod telemetry;

pub use config::Config;

/// Identifier of a miner (its actor id).
pub type MinerId = u64;

/// Namespace of the node's RPC methods, shared by the operator endpoint.
pub const NAMESPACE: &str = "Filecoin";

const MAILBOX_SIZE: usize = 1024;

/// Errors that stop the sidecar.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    Config(#[from] config::Error),
    #[error("failed to install logging: {0}")]
    Telemetry(#[from] telemetry::Error),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] bootstrap::Error),
    #[error("failed to get node version: {0}")]
    Version(String),
    #[error("failed to create module: {0}")]
    Module(String),
    #[error("failed to start module: {0}")]
    Start(String),
    #[error("failed to bind RPC listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("participation stopped: {0}")]
    Participant(#[from] commonware_runtime::Error),
}

/// A started finality module, ready to participate.
pub struct Sidecar<E: Clock + Spawner + Metrics, N: Node, M: Module> {
    context: E,
    node: N,
    module: M,

    /// Whether a signing credential was configured.
    credential: bool,
}

impl<E: Clock + Spawner + Metrics, N: Node, M: Module> Sidecar<E, N, M> {
    /// Bootstrap against `node`, resolve the manifest and start the module built by
    /// `environment`.
    pub async fn start<V: Environment<Module = M>>(
        context: E,
        config: &Config,
        node: N,
        mut environment: V,
    ) -> Result<Self, Error> {
        let bootstrapped = bootstrap::bootstrap(
            &context,
            &bootstrap::Config::new(config.root.clone()),
            &node,
            &mut environment,
        )
        .await?;

        let version = node
            .version()
            .await
            .map_err(|err| Error::Version(err.to_string()))?;
        let params = Params {
            network_name: bootstrapped.network,
            block_delay: version.block_delay(),
            initial_power_table: config.initial_power_table.clone(),
            bootstrap_epoch: config.bootstrap_epoch,
            finality: config.finality,
        };
        let manifests = Provider::resolve(node.clone(), &params, config.manifest_poll_interval())
            .start(context.with_label("manifest"));

        let mut module = environment
            .module(manifests, bootstrapped.store, bootstrapped.host)
            .await
            .map_err(|err| Error::Module(err.to_string()))?;
        module
            .start()
            .await
            .map_err(|err| Error::Start(err.to_string()))?;
        info!(network = %params.network_name, "started finality module");

        Ok(Self {
            context,
            node,
            module,
            credential: config.jwt().is_some(),
        })
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Start signing for participating miners.
    ///
    /// Signing requires both a configured credential and a node accepting write calls.
    /// The returned handle resolves once the module stops requesting signatures.
    pub fn participate(self) -> Handle<()> {
        let signer = (self.credential && self.node.can_sign()).then(|| {
            Signer::new(
                self.context.with_label("signer"),
                self.node.clone(),
                signer::DEFAULT_TIMEOUT,
            )
        });
        if signer.is_none() {
            info!("no credential for the node configured, not signing");
        }
        let (actor, mailbox) = Actor::new(
            self.context.with_label("participant"),
            participant::Config {
                node: self.node.clone(),
                module: self.module.clone(),
                signer: signer.clone(),
                mailbox_size: MAILBOX_SIZE,
            },
        );
        if let Some(signer) = signer {
            Broadcaster::new(
                self.context.with_label("catchup"),
                self.node,
                self.module,
                signer,
                mailbox,
            )
            .start();
        }
        actor.start()
    }
}

/// Parse `args`, install logging and run the sidecar on a `tokio` runtime until the
/// module built by `environment` stops.
pub fn launch<V, I, T>(args: I, environment: V) -> Result<(), Error>
where
    V: Environment,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = Config::command()
        .try_get_matches_from(args)
        .map_err(config::Error::from)?;
    let config = Config::load(&matches)?;
    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or(Level::INFO);
    telemetry::init(level)?;

    let executor = commonware_runtime::tokio::Runner::default();
    executor.start(|context| run(context, &config, environment))
}

/// Run the sidecar against the node at `config.rpc_endpoint` until the module stops.
///
/// The node is called with `config.jwt` when one is set. Must be called from within a
/// `tokio` runtime: the operator endpoint is served with `axum`.
pub async fn run<E, V>(context: E, config: &Config, environment: V) -> Result<(), Error>
where
    E: Clock + Spawner + Metrics,
    V: Environment,
{
    let node = node::Client::new(config.rpc_endpoint.clone(), config.jwt().map(str::to_owned));
    info!(endpoint = node.endpoint(), signing = node.can_sign(), "using node");
    run_with(context, config, node, environment).await
}

/// Run the sidecar against `node` until the module stops.
///
/// Must be called from within a `tokio` runtime.
pub async fn run_with<E, N, V>(
    context: E,
    config: &Config,
    node: N,
    environment: V,
) -> Result<(), Error>
where
    E: Clock + Spawner + Metrics,
    N: Node,
    V: Environment,
{
    let sidecar = Sidecar::start(context.clone(), config, node, environment).await?;

    let listener = TcpListener::bind(config.f3_rpc_endpoint)
        .await
        .map_err(Error::Bind)?;
    info!(address = %config.f3_rpc_endpoint, "serving finality queries");
    let module = sidecar.module().clone();
    context.with_label("rpc").spawn(move |_| async move {
        if let Err(err) = rpc::serve(listener, module).await {
            error!(?err, "RPC endpoint failed");
        }
    });

    sidecar.participate().await?;
    Ok(())
}
