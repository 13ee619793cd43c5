use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use super::types::{MempoolEntry, RawTransaction};
use crate::queue::{JobError, JobProcessor, QueueError, WorkQueue};

/// Node error code for an unknown transaction or address
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// Bitcoin RPC configuration
#[derive(Debug, Clone)]
pub struct BitcoinRpcConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Number of concurrent RPC workers
    pub workers: usize,
    /// Pending calls allowed before callers wait
    pub queue_capacity: usize,
}

impl Default for BitcoinRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8332".to_string(),
            username: String::new(),
            password: String::new(),
            workers: 8,
            queue_capacity: 10_000,
        }
    }
}

/// Bitcoin RPC error types
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode RPC response: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("RPC gateway is closed")]
    Closed,

    #[error("RPC call cancelled")]
    Cancelled,

    #[error("RPC worker panicked: {0}")]
    WorkerPanicked(String),
}

impl RpcError {
    /// True for failures that mean the node could not be reached at all,
    /// as opposed to a problem with one particular call.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Http(_) | RpcError::Closed | RpcError::Cancelled)
    }

    /// Node error code, if the node answered with an error object
    pub fn node_code(&self) -> Option<i64> {
        match self {
            RpcError::Node { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<QueueError> for RpcError {
    fn from(_: QueueError) -> Self {
        RpcError::Closed
    }
}

impl From<JobError<RpcError>> for RpcError {
    fn from(error: JobError<RpcError>) -> Self {
        match error {
            JobError::Failed(e) => e,
            JobError::Panicked(message) => RpcError::WorkerPanicked(message),
            JobError::Cancelled => RpcError::Cancelled,
        }
    }
}

/// One JSON-RPC call waiting in the gateway queue
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<Value>,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorResponse>,
}

#[derive(Deserialize)]
struct RpcErrorResponse {
    code: i64,
    message: String,
}

/// Performs the HTTP round trip for each queued call
struct HttpProcessor {
    client: Client,
    url: String,
    auth_header: String,
    next_id: AtomicU64,
}

#[async_trait]
impl JobProcessor for HttpProcessor {
    type Job = RpcCall;
    type Output = Value;
    type Error = RpcError;

    async fn process(&self, call: RpcCall) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: id.to_string(),
            method: &call.method,
            params: &call.params,
        };

        let response = self
            .client
            .post(&self.url)
            .header(header::AUTHORIZATION, &self.auth_header)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await?;

        // Bitcoin Core answers RPC errors with a non-2xx status and a JSON body,
        // so the body is decoded regardless of status
        let status = response.status();
        let body = response.text().await?;

        let decoded: RpcResponse = match serde_json::from_str(&body) {
            Ok(decoded) => decoded,
            Err(source) => {
                debug!(method = %call.method, %status, "Undecodable RPC response");
                return Err(RpcError::Decode { source, body });
            }
        };

        if let Some(error) = decoded.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }

        Ok(decoded.result.unwrap_or(Value::Null))
    }
}

/// Bitcoin node JSON-RPC gateway.
///
/// All calls pass through a bounded work queue, so at most `workers`
/// requests are in flight against the node at any time.
pub struct BitcoinRpcClient {
    queue: WorkQueue<HttpProcessor>,
    url: String,
}

impl BitcoinRpcClient {
    /// Creates the client and starts its workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: BitcoinRpcConfig) -> Self {
        let auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", config.username, config.password));

        let processor = HttpProcessor {
            client: Client::new(),
            url: config.url.clone(),
            auth_header: format!("Basic {}", auth),
            next_id: AtomicU64::new(0),
        };

        let queue = WorkQueue::new(processor, config.queue_capacity, config.workers);
        queue.start();

        info!("Bitcoin RPC gateway ready for {}", config.url);

        Self {
            queue,
            url: config.url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends a call through the queue and waits for its decoded result
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let handle = self
            .queue
            .enqueue(RpcCall {
                method: method.to_string(),
                params,
            })
            .await?;

        let value = handle.await?;

        T::deserialize(&value).map_err(|source| RpcError::Decode {
            source,
            body: value.to_string(),
        })
    }

    /// Txids currently in the node's mempool
    pub async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        self.call("getrawmempool", vec![json!(false)]).await
    }

    /// Mempool entries keyed by txid
    pub async fn get_raw_mempool_verbose(&self) -> Result<HashMap<String, MempoolEntry>, RpcError> {
        self.call("getrawmempool", vec![json!(true)]).await
    }

    /// Decoded transaction, or `None` if the node does not know it
    pub async fn get_raw_transaction(
        &self,
        txid: &str,
    ) -> Result<Option<RawTransaction>, RpcError> {
        match self
            .call("getrawtransaction", vec![json!(txid), json!(true)])
            .await
        {
            Ok(tx) => Ok(Some(tx)),
            Err(e) if e.node_code() == Some(RPC_INVALID_ADDRESS_OR_KEY) => {
                debug!("Transaction {} not found", txid);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stops the workers and releases the HTTP client
    pub async fn close(self) {
        self.queue.stop().await;
        debug!("Bitcoin RPC gateway closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BitcoinRpcConfig::default();
        assert_eq!(config.url, "http://localhost:8332");
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 10_000);
    }

    #[test]
    fn test_job_error_mapping() {
        let e: RpcError = JobError::Failed(RpcError::Node {
            code: -8,
            message: "bad".to_string(),
        })
        .into();
        assert_eq!(e.node_code(), Some(-8));
        assert!(!e.is_transport());

        let e: RpcError = JobError::<RpcError>::Cancelled.into();
        assert!(e.is_transport());

        let e: RpcError = QueueError::Closed.into();
        assert!(matches!(e, RpcError::Closed));
    }

    #[test]
    fn test_request_serialization() {
        let params = vec![json!("abc"), json!(true)];
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: "7".to_string(),
            method: "getrawtransaction",
            params: &params,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "jsonrpc": "1.0",
                "id": "7",
                "method": "getrawtransaction",
                "params": ["abc", true]
            })
        );
    }

    #[tokio::test]
    async fn test_call_after_close_fails() {
        let client = BitcoinRpcClient::new(BitcoinRpcConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        });
        client.queue.stop().await;

        let result = client.get_raw_mempool().await;
        assert!(matches!(result, Err(RpcError::Closed)));
    }
}
