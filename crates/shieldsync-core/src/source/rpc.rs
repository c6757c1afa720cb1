//! ethereum json-rpc client (eth_getLogs, eth_blockNumber, eth_call)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{LogSource, RootSource, SourceError, SourceResult};
use crate::event::{keccak256, parse_quantity, EventFilter, RawLog};
use crate::field::{fr_from_be_bytes, Fr};

/// solidity signature of the root getter on the pool contract
pub const GET_MERKLE_ROOT: &str = "getMerkleRoot()";

/// json-rpc error codes providers use for throttling or oversized ranges
const LIMIT_ERROR_CODES: [i64; 2] = [-32005, 429];

#[derive(Clone)]
pub struct RpcSource {
    name: String,
    url: String,
    client: Client,
}

impl RpcSource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client: Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> SourceResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "shieldsync",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(format!("{} returned 429", self.url)));
        }
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let json: RpcResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        if let Some(error) = json.error {
            let msg = format!("RPC error {}: {}", error.code, error.message);
            let lower = error.message.to_ascii_lowercase();
            if LIMIT_ERROR_CODES.contains(&error.code) || lower.contains("rate limit") || lower.contains("too many") {
                return Err(SourceError::RateLimited(msg));
            }
            return Err(SourceError::Unavailable(msg));
        }

        json.result
            .ok_or_else(|| SourceError::Malformed("no result in response".into()))
    }

    /// read-only contract view for the pool root
    pub fn root_reader(&self, contract: &str) -> RpcRootReader {
        RpcRootReader {
            rpc: self.clone(),
            contract: contract.to_ascii_lowercase(),
        }
    }
}

#[async_trait]
impl LogSource for RpcSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self) -> SourceResult<u64> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        let hex: String = serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))?;
        parse_quantity(Some(hex.as_str()), "eth_blockNumber").map_err(|e| SourceError::Malformed(e.to_string()))
    }

    async fn fetch_logs(&self, filter: &EventFilter, from: u64, to: u64) -> SourceResult<Vec<RawLog>> {
        let params = json!({
            "address": filter.contract(),
            "topics": [filter.topics()],
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
        });
        let result = self.call("eth_getLogs", vec![params]).await?;
        serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

/// `getMerkleRoot()` via eth_call at a fixed height
#[derive(Clone)]
pub struct RpcRootReader {
    rpc: RpcSource,
    contract: String,
}

#[async_trait]
impl RootSource for RpcRootReader {
    async fn onchain_root(&self, at_block: u64) -> SourceResult<Fr> {
        let call = json!({
            "to": self.contract,
            "data": format!("0x{}", hex::encode(selector(GET_MERKLE_ROOT))),
        });
        let result = self
            .rpc
            .call("eth_call", vec![call, json!(format!("0x{:x}", at_block))])
            .await?;
        let hex: String = serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))?;
        decode_root(&hex)
    }
}

/// first four bytes of keccak256(signature)
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// abi-decoded bytes32 / uint256 return value, strictly below the modulus
fn decode_root(hex_str: &str) -> SourceResult<Fr> {
    let digits = hex_str
        .strip_prefix("0x")
        .ok_or_else(|| SourceError::Malformed(format!("eth_call result {:?} not 0x-prefixed", hex_str)))?;
    let bytes = hex::decode(digits).map_err(|e| SourceError::Malformed(e.to_string()))?;
    let word: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| SourceError::Malformed(format!("root is {} bytes, expected 32", b.len())))?;
    fr_from_be_bytes(&word).map_err(|e| SourceError::Malformed(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}
