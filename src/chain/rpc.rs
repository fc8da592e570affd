//!
//! JSON-RPC chain observer for EVM networks.
//!
//! This module provides an async client that reads ERC-20 transfer logs, the chain head
//! and block timestamps over plain `eth_*` JSON-RPC. Transient HTTP failures are retried
//! with exponential backoff; RPC-level errors are surfaced to the caller, which treats
//! them as retryable through the scheduler.

use super::observer::ChainObserver;
use super::types::{ChainError, TransferEvent};
use crate::config::TokenInfo;
use backoff::{ExponentialBackoffBuilder, future::retry};
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// keccak256("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// EVM JSON-RPC chain observer
#[derive(Clone)]
pub struct EvmRpcObserver {
	/// The underlying HTTP client for RPC calls.
	http_client: Client,
	/// The JSON-RPC endpoint URL.
	rpc_url: String,
}

impl EvmRpcObserver {
	/// Create a new observer for the given RPC endpoint.
	pub fn new(rpc_url: String) -> Self {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to create HTTP client");

		Self {
			http_client,
			rpc_url,
		}
	}

	/// Execute a JSON-RPC call and return the `result` value.
	///
	/// HTTP transport failures are retried with exponential backoff for up to 30
	/// seconds; an error object in the RPC response is returned immediately.
	async fn execute_rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
		let body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});

		let policy = ExponentialBackoffBuilder::new()
			.with_max_elapsed_time(Some(Duration::from_secs(30)))
			.build();

		let response = retry(policy, || async {
			let resp = self
				.http_client
				.post(&self.rpc_url)
				.json(&body)
				.send()
				.await
				.map_err(|e| {
					debug!("RPC send error for {}: {}", method, e);
					backoff::Error::transient(ChainError::Http(e))
				})?;

			let parsed: Value = resp
				.json()
				.await
				.map_err(|e| backoff::Error::transient(ChainError::Http(e)))?;

			if let Some(error) = parsed.get("error") {
				return Err(backoff::Error::permanent(ChainError::Rpc(error.to_string())));
			}

			Ok(parsed)
		})
		.await?;

		response
			.get("result")
			.cloned()
			.ok_or_else(|| ChainError::MalformedResponse("missing result field".to_string()))
	}
}

#[async_trait::async_trait]
impl ChainObserver for EvmRpcObserver {
	async fn get_latest_block(&self) -> Result<u64, ChainError> {
		let result = self.execute_rpc("eth_blockNumber", json!([])).await?;
		let hex = result
			.as_str()
			.ok_or_else(|| ChainError::MalformedResponse("block number is not a string".into()))?;
		parse_hex_u64(hex)
	}

	async fn get_transfer_logs(
		&self,
		token: &TokenInfo,
		to_address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<TransferEvent>, ChainError> {
		let filter = json!([{
			"fromBlock": to_hex(from_block),
			"toBlock": to_hex(to_block),
			"address": token.address,
			"topics": [TRANSFER_TOPIC, Value::Null, address_topic(to_address)],
		}]);

		let result = self.execute_rpc("eth_getLogs", filter).await?;
		let raw_logs = result
			.as_array()
			.ok_or_else(|| ChainError::MalformedResponse("logs is not an array".into()))?;

		debug!(
			"Fetched {} transfer logs for {} in blocks [{}, {}]",
			raw_logs.len(),
			to_address,
			from_block,
			to_block
		);

		raw_logs
			.iter()
			.map(|log| parse_transfer_log(log, token.decimals))
			.collect()
	}

	async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, ChainError> {
		let result = self
			.execute_rpc("eth_getBlockByNumber", json!([to_hex(block_number), false]))
			.await?;
		let hex = result
			.get("timestamp")
			.and_then(|t| t.as_str())
			.ok_or_else(|| ChainError::MalformedResponse("block has no timestamp".into()))?;
		let seconds = parse_hex_u64(hex)?;
		DateTime::from_timestamp(seconds as i64, 0)
			.ok_or_else(|| ChainError::MalformedResponse(format!("invalid timestamp {}", seconds)))
	}
}

fn to_hex(value: u64) -> String {
	format!("{:#x}", value)
}

fn parse_hex_u64(hex: &str) -> Result<u64, ChainError> {
	let trimmed = hex.trim_start_matches("0x");
	u64::from_str_radix(trimmed, 16)
		.map_err(|e| ChainError::MalformedResponse(format!("bad hex quantity {}: {}", hex, e)))
}

/// Pad an address into a 32-byte topic value.
fn address_topic(address: &str) -> String {
	format!(
		"0x000000000000000000000000{}",
		address.trim_start_matches("0x").to_lowercase()
	)
}

/// Extract the trailing 20-byte address from a 32-byte topic.
fn topic_address(topic: &str) -> Result<String, ChainError> {
	let trimmed = topic.trim_start_matches("0x");
	if trimmed.len() < 40 {
		return Err(ChainError::MalformedResponse(format!(
			"topic too short for an address: {}",
			topic
		)));
	}
	Ok(format!("0x{}", &trimmed[trimmed.len() - 40..]))
}

/// Decode the 32-byte big-endian amount word, scaled by the token's decimals.
fn decode_amount(data: &str, decimals: u32) -> Result<Decimal, ChainError> {
	let bytes = hex::decode(data.trim_start_matches("0x"))?;
	if bytes.len() > 16 && bytes[..bytes.len() - 16].iter().any(|b| *b != 0) {
		return Err(ChainError::MalformedResponse(
			"transfer amount exceeds supported range".to_string(),
		));
	}
	let mut raw: u128 = 0;
	for byte in bytes.iter().skip(bytes.len().saturating_sub(16)) {
		raw = (raw << 8) | u128::from(*byte);
	}
	let mut amount = Decimal::from_u128(raw)
		.ok_or_else(|| ChainError::MalformedResponse(format!("amount out of range: {}", raw)))?;
	amount
		.set_scale(decimals)
		.map_err(|e| ChainError::MalformedResponse(format!("bad token decimals: {}", e)))?;
	Ok(amount.normalize())
}

fn parse_transfer_log(log: &Value, decimals: u32) -> Result<TransferEvent, ChainError> {
	let field_str = |name: &str| -> Result<&str, ChainError> {
		log.get(name)
			.and_then(|v| v.as_str())
			.ok_or_else(|| ChainError::MalformedResponse(format!("log missing field {}", name)))
	};

	let topics = log
		.get("topics")
		.and_then(|t| t.as_array())
		.ok_or_else(|| ChainError::MalformedResponse("log missing topics".into()))?;
	if topics.len() < 3 {
		return Err(ChainError::MalformedResponse(format!(
			"transfer log has {} topics, expected 3",
			topics.len()
		)));
	}
	let topic_str = |index: usize| -> Result<&str, ChainError> {
		topics[index]
			.as_str()
			.ok_or_else(|| ChainError::MalformedResponse(format!("topic {} is not a string", index)))
	};

	Ok(TransferEvent {
		tx_hash: field_str("transactionHash")?.to_string(),
		log_index: parse_hex_u64(field_str("logIndex")?)?,
		block_number: parse_hex_u64(field_str("blockNumber")?)?,
		from: topic_address(topic_str(1)?)?,
		to: topic_address(topic_str(2)?)?,
		amount: decode_amount(field_str("data")?, decimals)?,
	})
}
