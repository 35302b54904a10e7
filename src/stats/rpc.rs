//! HTTP JSON-RPC client
//!
//! Concrete implementation of the chain-RPC port over reqwest. Wire-level
//! chain differences live behind the generic invoke surface.

use crate::domain::ports::ChainRpc;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Per-request timeout applied to every RPC call
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpChainRpc {
    client: reqwest::Client,
}

impl HttpChainRpc {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpChainRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn invoke(&self, url: &str, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.client.post(url).json(&body).send().await?;
        let envelope: Value = response.json().await?;

        if let Some(err) = envelope.get("error") {
            if !err.is_null() {
                return Err(Error::transient("chain-rpc", method, err.to_string()));
            }
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Parse a 0x-prefixed hex quantity
pub fn parse_hex_quantity(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity(&json!("0x0")), Some(0));
        assert_eq!(parse_hex_quantity(&json!("0x10")), Some(16));
        assert_eq!(parse_hex_quantity(&json!("0xff")), Some(255));
        assert_eq!(parse_hex_quantity(&json!(12)), None);
        assert_eq!(parse_hex_quantity(&json!("zz")), None);
    }
}
