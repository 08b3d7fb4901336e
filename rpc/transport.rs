/// JSON-RPC transport to the remote ledger
///
/// `RpcTransport` is the seam the chain reader and the node-managed wallet
/// talk through. `HttpTransport` is the live implementation over reqwest;
/// tests substitute scripted transports.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Endpoint unreachable, timed out, or answered with a server error
    #[error("endpoint unavailable: {0}")]
    Transient(String),

    /// The ledger executed the call and refused it (revert, bad params)
    #[error("rejected: {0}")]
    Rejected(String),

    /// The endpoint answered but the payload could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether a retry (same or next endpoint) could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_) | TransportError::Malformed(_))
    }
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Human-readable endpoint label for logs
    fn endpoint(&self) -> &str;

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP POST
pub struct HttpTransport {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(TransportError::Transient(format!("{} returned {}", self.url, status)));
        }
        if !status.is_success() {
            return Err(TransportError::Malformed(format!("{} returned {}", self.url, status)));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(classify_rpc_error(err.code, err.message));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

/// Reverts (code 3) and invalid-params are final; server-side hiccups in the
/// -32000 range that mention limits or timeouts are treated as transient.
fn classify_rpc_error(code: i64, message: String) -> TransportError {
    let lower = message.to_lowercase();
    let transient_hint = ["timeout", "rate limit", "too many", "unavailable", "header not found"]
        .iter()
        .any(|hint| lower.contains(hint));

    match code {
        -32603 | -32005 => TransportError::Transient(message),
        -32099..=-32000 if transient_hint => TransportError::Transient(message),
        _ => TransportError::Rejected(message),
    }
}

/// Build a positional params array.
pub fn params(values: impl IntoIterator<Item = Value>) -> Value {
    Value::Array(values.into_iter().collect())
}

/// `eth_call` params against the latest block.
pub fn call_params(to: &str, data: &str) -> Value {
    json!([{ "to": to, "data": data }, "latest"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_is_final() {
        let err = classify_rpc_error(3, "execution reverted: Market ended".into());
        assert_eq!(err, TransportError::Rejected("execution reverted: Market ended".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_limits_are_transient() {
        assert!(classify_rpc_error(-32005, "limit".into()).is_retryable());
        assert!(classify_rpc_error(-32000, "Rate limit exceeded".into()).is_retryable());
        assert!(!classify_rpc_error(-32000, "insufficient funds".into()).is_retryable());
    }

    #[test]
    fn test_server_range_bounds() {
        assert!(classify_rpc_error(-32099, "request timeout".into()).is_retryable());
        assert!(classify_rpc_error(-32050, "too many requests".into()).is_retryable());
        // just outside the server-error range
        assert!(!classify_rpc_error(-32100, "request timeout".into()).is_retryable());
        assert!(!classify_rpc_error(-31999, "request timeout".into()).is_retryable());
    }

    #[test]
    fn test_call_params_shape() {
        let p = call_params("0xabc", "0x1234");
        assert_eq!(p[0]["to"], "0xabc");
        assert_eq!(p[1], "latest");
    }
}
