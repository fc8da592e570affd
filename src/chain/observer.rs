use super::types::{ChainError, TransferEvent};
use crate::config::TokenInfo;
use chrono::{DateTime, Utc};

/// Port for reading transfer activity from a blockchain.
///
/// A pure query capability: implementations never mutate engine state. The deposit
/// state machine scans `[session.created_at_block, latest]` through this interface on
/// every confirmation attempt.
#[async_trait::async_trait]
pub trait ChainObserver: Send + Sync {
	/// Current chain head block number.
	async fn get_latest_block(&self) -> Result<u64, ChainError>;

	/// Transfer events of `token` into `to_address` within the inclusive block range.
	async fn get_transfer_logs(
		&self,
		token: &TokenInfo,
		to_address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<TransferEvent>, ChainError>;

	/// Timestamp of the given block.
	async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, ChainError>;
}
