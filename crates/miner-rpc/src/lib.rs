//! JSON-RPC 1.0 client for a Bitcoin full node.
//!
//! Single and batched calls share one [`reqwest::Client`], which is itself
//! a connection-pooled, keep-alive HTTP/1.1 client; a semaphore caps the
//! number of requests in flight so the node is never asked to juggle more
//! sockets than it's configured for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;

mod methods;
mod scriptpubkey;

pub use methods::{BlockTemplateResponse, RawTemplateTransaction};
pub use scriptpubkey::extract_script_pubkey;

/// Failures from a single RPC call.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("failed to parse RPC response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("RPC method error {code}: {message}")]
    Method { code: i64, message: String },
}

/// Connection parameters for a node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Maximum sockets kept open to the node (spec default: 64).
    pub max_sockets: usize,
    /// Maximum idle sockets kept warm per host (spec default: 32).
    pub max_idle_per_host: usize,
}

impl RpcConfig {
    fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// A JSON-RPC 1.0 client bound to one node.
pub struct RpcClient {
    client: Client,
    config: RpcConfig,
    next_id: AtomicU64,
    inflight: Arc<Semaphore>,
}

impl RpcClient {
    /// Build a client from connection parameters. Fails only if the
    /// underlying HTTP client cannot be constructed (e.g. invalid TLS
    /// configuration), never due to network state.
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()?;

        Ok(RpcClient {
            client,
            inflight: Arc::new(Semaphore::new(config.max_sockets)),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issue one JSON-RPC 1.0 call and return its `result` field.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id();
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let _permit = self.inflight.acquire().await.expect("semaphore never closed");

        let response = self
            .client
            .post(self.config.url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;

        if !status.is_success() {
            // Bitcoin Core still returns a JSON-RPC error body on most
            // non-2xx statuses; prefer that over the bare status code.
            if let Some(err) = method_error(&payload) {
                return Err(err);
            }
            return Err(RpcError::HttpStatus(status.as_u16()));
        }

        if let Some(err) = method_error(&payload) {
            return Err(err);
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Issue a batch of calls in one HTTP request. Responses are reordered
    /// by `id` before return, regardless of the order the node replied in;
    /// each call's outcome is reported independently so one failing call
    /// doesn't void the rest of the batch.
    pub async fn batch(&self, calls: &[(&str, Value)]) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        let ids: Vec<u64> = (0..calls.len()).map(|_| self.next_id()).collect();
        let body: Vec<Value> = calls
            .iter()
            .zip(&ids)
            .map(|((method, params), id)| {
                json!({
                    "jsonrpc": "1.0",
                    "id": id,
                    "method": method,
                    "params": params,
                })
            })
            .collect();

        let _permit = self.inflight.acquire().await.expect("semaphore never closed");

        let response = self
            .client
            .post(self.config.url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus(status.as_u16()));
        }

        let payload: Vec<Value> = response.json().await?;
        reorder_batch(&ids, payload)
    }
}

fn method_error(payload: &Value) -> Option<RpcError> {
    let err = payload.get("error")?;
    if err.is_null() {
        return None;
    }
    let code = err.get("code").and_then(Value::as_i64).unwrap_or(-1);
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown RPC error")
        .to_string();
    Some(RpcError::Method { code, message })
}

/// Reorder raw batch responses to match the caller's request order, keyed
/// by the `id` field the node echoes back.
fn reorder_batch(ids: &[u64], mut responses: Vec<Value>) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
    let mut by_id = std::collections::HashMap::with_capacity(responses.len());
    for response in responses.drain(..) {
        if let Some(id) = response.get("id").and_then(Value::as_u64) {
            by_id.insert(id, response);
        }
    }

    Ok(ids
        .iter()
        .map(|id| match by_id.get(id) {
            Some(response) => match method_error(response) {
                Some(err) => Err(err),
                None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
            },
            None => Err(RpcError::Parse(<serde_json::Error as serde::de::Error>::custom(
                format!("missing response for id {id}"),
            ))),
        })
        .collect())
}
