//! Types for swap execution and the swap provider port.

use crate::ledger::{LedgerError, ProviderState};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Order status reported by the swap provider.
#[derive(Debug, Clone)]
pub struct OrderStatus {
	pub state: ProviderState,
	/// USD value actually delivered; present once the order completed.
	pub actual_output: Option<Decimal>,
	/// On-chain hash of the settlement transaction, if the provider exposes it.
	pub settlement_tx_hash: Option<String>,
	/// Failure reason, when the order failed.
	pub reason: Option<String>,
}

/// Port for the external swap provider.
#[async_trait::async_trait]
pub trait SwapProvider: Send + Sync {
	/// Submit an order and return its handle. The handle is the idempotency key for
	/// all subsequent status polling.
	async fn submit_order(
		&self,
		from_asset: &str,
		to_asset: &str,
		usd_amount: Decimal,
		slippage_bps: u32,
	) -> Result<String, SwapError>;

	/// Current status of an order by handle.
	async fn get_order_status(&self, order_handle: &str) -> Result<OrderStatus, SwapError>;
}

/// Error types for swap execution.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
	#[error("swap transaction not found: {0}")]
	TransactionNotFound(Uuid),

	#[error("swap transaction {0} has no order handle")]
	MissingOrderHandle(Uuid),

	#[error("swap transaction {0} is missing source or destination fields")]
	MalformedTransaction(Uuid),

	#[error("swap provider error: {0}")]
	Provider(String),

	#[error("ledger error: {0}")]
	Ledger(#[from] LedgerError),
}
