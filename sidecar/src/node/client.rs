use super::{AddrInfo, Node, Version};
use crate::{
    manifest::Manifest,
    rpc::{Request, Response},
    MinerId, NAMESPACE,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use thiserror::Error;
use tracing::trace;

/// Namespace of the finality-specific calls served by the node.
const F3_NAMESPACE: &str = "F3";

/// Parameters of calls that take none (encoded as `[]`).
const NO_PARAMS: [(); 0] = [];

/// Errors that can occur when calling the node.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed result: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed bytes: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// JSON-RPC client for the node.
///
/// Byte arrays travel as standard base64 strings. The bearer token is only attached
/// when one was configured.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    next_id: Arc<AtomicU64>,
}

impl Client {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.filter(|token| !token.is_empty()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: String,
        params: P,
    ) -> Result<R, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, method = %method, "calling node");
        let request = Request::new(Value::from(id), method, serde_json::to_value(params)?);
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response: Response = builder.send().await?.error_for_status()?.json().await?;
        if let Some(error) = response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    async fn common<R: DeserializeOwned>(&self, method: &str) -> Result<R, Error> {
        self.call(format!("{NAMESPACE}.{method}"), NO_PARAMS).await
    }

    async fn f3<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, Error> {
        self.call(format!("{F3_NAMESPACE}.{method}"), params).await
    }
}

impl Node for Client {
    type Error = Error;

    fn can_sign(&self) -> bool {
        self.token.is_some()
    }

    async fn network_name(&self) -> Result<String, Error> {
        self.common("StateNetworkName").await
    }

    async fn listen_addrs(&self) -> Result<AddrInfo, Error> {
        self.common("NetAddrsListen").await
    }

    async fn version(&self) -> Result<Version, Error> {
        self.common("Version").await
    }

    async fn participating_miner_ids(&self) -> Result<Vec<MinerId>, Error> {
        let miners: Option<Vec<MinerId>> =
            self.f3("GetParticipatingMinerIDs", NO_PARAMS).await?;
        Ok(miners.unwrap_or_default())
    }

    async fn protect_peer(&self, peer: &str) -> Result<bool, Error> {
        self.f3("ProtectPeer", (peer,)).await
    }

    async fn sign(&self, public_key: &[u8], message: &[u8]) -> Result<Bytes, Error> {
        let signature: String = self
            .f3(
                "SignMessage",
                (STANDARD.encode(public_key), STANDARD.encode(message)),
            )
            .await?;
        Ok(Bytes::from(STANDARD.decode(signature)?))
    }

    async fn manifest_from_contract(&self) -> Result<Option<Manifest>, Error> {
        self.f3("GetManifestFromContract", NO_PARAMS).await
    }
}
