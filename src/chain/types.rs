//! Types for chain observation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single token transfer read from the chain log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
	/// Hash of the transaction that emitted the transfer.
	pub tx_hash: String,
	/// Position of the log within the transaction receipt.
	pub log_index: u64,
	/// Block the transfer landed in.
	pub block_number: u64,
	/// Sending address.
	pub from: String,
	/// Receiving address.
	pub to: String,
	/// Transfer amount scaled to token units.
	pub amount: Decimal,
}

/// Error types for chain observation. All variants are transient from the engine's
/// perspective: handlers map them to a retryable signal.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("RPC error: {0}")]
	Rpc(String),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("hex decode error: {0}")]
	Hex(#[from] hex::FromHexError),

	#[error("malformed response: {0}")]
	MalformedResponse(String),
}
