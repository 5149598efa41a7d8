//! Transport-agnostic RPC call interface.
//!
//! The session service and the cache service are reached through the same
//! narrow trait; the default implementation speaks newline-delimited
//! JSON-RPC 2.0 over TCP, one connection per call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("no RPC connection configured")]
    NoConnection,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("{0}")]
    Remote(String),
    #[error("connection closed before reply")]
    ConnectionClosed,
}

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// JSON-RPC 2.0 over TCP against an ordered list of peers; the first peer
/// that accepts the connection serves the call.
pub struct JsonRpcClient {
    addrs: Vec<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(addrs: Vec<String>) -> Self {
        JsonRpcClient {
            addrs,
            next_id: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<TcpStream, RpcError> {
        if self.addrs.is_empty() {
            return Err(RpcError::NoConnection);
        }
        let mut last_err = None;
        for addr in &self.addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.map(RpcError::Io).unwrap_or(RpcError::NoConnection))
    }
}

#[async_trait]
impl RpcClient for JsonRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let stream = self.connect().await?;
        let (read_half, mut write_half) = stream.into_split();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": [params],
        });
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(RpcError::ConnectionClosed);
        }
        let parsed: Value = serde_json::from_str(&reply)?;
        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(RpcError::Remote(message));
        }
        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn call_roundtrip_against_mock_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], "SessionSv1.AuthorizeEvent");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": {"MaxUsage": 3600000000000i64},
                "error": null,
            });
            let mut bytes = serde_json::to_vec(&reply).unwrap();
            bytes.push(b'\n');
            write_half.write_all(&bytes).await.unwrap();
        });

        let client = JsonRpcClient::new(vec![addr.to_string()]);
        let result = client
            .call("SessionSv1.AuthorizeEvent", json!({"Tenant": "example.org"}))
            .await
            .unwrap();
        assert_eq!(result["MaxUsage"], 3600000000000i64);
    }

    #[tokio::test]
    async fn remote_error_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": null,
                "error": {"code": -32000, "message": "RALS_ERROR:INSUFFICIENT_CREDIT"},
            });
            let mut bytes = serde_json::to_vec(&reply).unwrap();
            bytes.push(b'\n');
            write_half.write_all(&bytes).await.unwrap();
        });

        let client = JsonRpcClient::new(vec![addr.to_string()]);
        let err = client.call("SessionSv1.ProcessMessage", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote(msg) if msg.starts_with("RALS_ERROR")));
    }

    #[tokio::test]
    async fn no_connection_configured() {
        let client = JsonRpcClient::new(Vec::new());
        assert!(matches!(
            client.call("X.Y", json!({})).await,
            Err(RpcError::NoConnection)
        ));
    }
}
