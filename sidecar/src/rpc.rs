//! JSON-RPC types shared with the node client and the operator endpoint.
//!
//! The endpoint re-exposes the module's query surface under the node's own namespace
//! so that tooling built for the node can query the sidecar unchanged.

use crate::{finality::Module, NAMESPACE};
use axum::{extract::State, routing::post, Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::debug;

/// Path the endpoint is served on.
pub const PATH: &str = "/rpc/v1";

const VERSION: &str = "2.0";

/// Codes of the standard JSON-RPC errors.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: Value, method: String, params: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            id,
            method,
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject { code, message }),
        }
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(serde_json::Error),
    #[error("{0}")]
    Internal(String),
}

impl Error {
    fn code(&self) -> i64 {
        match self {
            Error::MethodNotFound(_) => METHOD_NOT_FOUND,
            Error::InvalidParams(_) => INVALID_PARAMS,
            Error::Internal(_) => INTERNAL_ERROR,
        }
    }
}

fn internal(err: impl std::fmt::Display) -> Error {
    Error::Internal(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(internal)
}

/// Answer `request` using `module`.
pub async fn dispatch<M: Module>(module: &M, request: Request) -> Response {
    debug!(method = %request.method, "rpc request");
    match handle(module, &request.method, request.params).await {
        Ok(result) => Response::success(request.id, result),
        Err(err) => Response::failure(request.id, err.code(), err.to_string()),
    }
}

async fn handle<M: Module>(module: &M, method: &str, params: Value) -> Result<Value, Error> {
    let name = method
        .strip_prefix(NAMESPACE)
        .and_then(|name| name.strip_prefix('.'))
        .ok_or_else(|| Error::MethodNotFound(method.to_string()))?;
    match name {
        "F3GetManifest" => encode(&*module.manifest()),
        "F3GetProgress" => encode(&module.progress().await.map_err(internal)?),
        "F3GetLatestCertificate" => encode(&module.latest_certificate().await.map_err(internal)?),
        "F3GetCertificate" => {
            let (instance,): (u64,) =
                serde_json::from_value(params).map_err(Error::InvalidParams)?;
            encode(&module.certificate(instance).await.map_err(internal)?)
        }
        "F3IsRunning" => Ok(Value::Bool(module.is_running())),
        _ => Err(Error::MethodNotFound(method.to_string())),
    }
}

async fn serve_request<M: Module>(State(module): State<M>, body: Bytes) -> Json<Response> {
    let response = match serde_json::from_slice::<Request>(&body) {
        Ok(request) => dispatch(&module, request).await,
        Err(err) => Response::failure(Value::Null, PARSE_ERROR, err.to_string()),
    };
    Json(response)
}

/// Routes of the operator endpoint.
pub fn router<M: Module>(module: M) -> Router {
    Router::new()
        .route(PATH, post(serve_request::<M>))
        .with_state(module)
}

/// Serve the operator endpoint on `listener` until it fails.
pub async fn serve<M: Module>(listener: TcpListener, module: M) -> std::io::Result<()> {
    axum::serve(listener, router(module)).await
}
