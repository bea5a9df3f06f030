//! Typed wrappers over [`crate::RpcClient::call`] for the RPC methods the
//! miner actually needs.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{RpcClient, RpcError};

/// One non-coinbase transaction as returned by `getblocktemplate`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTemplateTransaction {
    pub data: String,
    pub txid: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub sigops: i64,
    #[serde(default)]
    pub depends: Vec<u32>,
}

/// The subset of `getblocktemplate`'s response the engine consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTemplateResponse {
    pub version: i32,
    pub previousblockhash: String,
    pub transactions: Vec<RawTemplateTransaction>,
    pub coinbasevalue: u64,
    pub target: String,
    pub bits: String,
    pub curtime: u32,
    pub mintime: u32,
    pub height: u32,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub mutable: Vec<String>,
    #[serde(default)]
    pub default_witness_commitment: Option<String>,
}

impl RpcClient {
    /// `getblocktemplate({"rules":["segwit"]})`.
    pub async fn get_block_template(&self) -> Result<BlockTemplateResponse, RpcError> {
        let raw = self
            .call("getblocktemplate", json!([{"rules": ["segwit"]}]))
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// `getblockhash(height)`.
    pub async fn get_block_hash(&self, height: u32) -> Result<String, RpcError> {
        let raw = self.call("getblockhash", json!([height])).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// `getblock(hash, verbosity)`.
    pub async fn get_block(&self, hash: &str, verbosity: u8) -> Result<Value, RpcError> {
        self.call("getblock", json!([hash, verbosity])).await
    }

    /// `getrawtransaction(txid, verbose, blockhash?)`.
    pub async fn get_raw_transaction(
        &self,
        txid: &str,
        verbose: bool,
        blockhash: Option<&str>,
    ) -> Result<Value, RpcError> {
        let params = match blockhash {
            Some(hash) => json!([txid, verbose, hash]),
            None => json!([txid, verbose]),
        };
        self.call("getrawtransaction", params).await
    }

    /// `submitblock(hex)`. A `null` result means the node accepted the block.
    pub async fn submit_block(&self, block_hex: &str) -> Result<Option<String>, RpcError> {
        let raw = self.call("submitblock", json!([block_hex])).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// `getblockchaininfo`.
    pub async fn get_blockchain_info(&self) -> Result<Value, RpcError> {
        self.call("getblockchaininfo", json!([])).await
    }

    /// `validateaddress(address)`.
    pub async fn validate_address(&self, address: &str) -> Result<Value, RpcError> {
        self.call("validateaddress", json!([address])).await
    }
}
