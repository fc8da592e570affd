//! Data types for portfolios, holdings and ledger transactions.

use crate::assets::AssetClass;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single position inside a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
	/// Asset ticker symbol, e.g. "PAXG".
	pub asset: String,
	/// The asset class this holding counts toward.
	pub asset_class: AssetClass,
	/// Current USD value of the position.
	pub value_usd: Decimal,
	/// Share of the portfolio total, in percent.
	pub percentage: Decimal,
}

/// A user's portfolio: total value, target allocation and per-asset holdings.
///
/// Holdings are keyed by asset symbol. Percentages are recomputed by the store inside
/// every balance mutation, so they sum to 100 (within rounding) whenever the total is
/// positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
	pub id: Uuid,
	pub user_id: Uuid,
	pub total_value_usd: Decimal,
	/// Target allocation in percent per asset class.
	pub target_allocation: HashMap<AssetClass, Decimal>,
	pub holdings: HashMap<String, Holding>,
	pub updated_at: DateTime<Utc>,
}

impl Portfolio {
	/// Current allocation in percent per asset class, summed across holdings.
	pub fn allocation_by_class(&self) -> HashMap<AssetClass, Decimal> {
		let mut allocation: HashMap<AssetClass, Decimal> = HashMap::new();
		for holding in self.holdings.values() {
			*allocation.entry(holding.asset_class).or_default() += holding.percentage;
		}
		allocation
	}

	/// Held USD value per asset class.
	pub fn balances_by_class(&self) -> HashMap<AssetClass, Decimal> {
		let mut balances: HashMap<AssetClass, Decimal> = HashMap::new();
		for holding in self.holdings.values() {
			*balances.entry(holding.asset_class).or_default() += holding.value_usd;
		}
		balances
	}
}

/// A signed USD adjustment to one holding, applied atomically by the store.
#[derive(Debug, Clone)]
pub struct BalanceDelta {
	pub asset: String,
	pub asset_class: AssetClass,
	pub amount_usd: Decimal,
}

/// Globally unique marker for an on-chain event that has been credited.
///
/// Inserting this marker is the idempotency gate for deposit crediting: the insert
/// happens immediately before the credit, and a duplicate insert means another execution
/// already handled the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
	pub chain: String,
	pub tx_hash: String,
	pub log_index: u64,
}

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
	Deposit,
	Swap,
	Rebalance,
}

/// Lifecycle status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	Pending,
	Completed,
	Failed,
}

/// Why a group of swap transactions was created together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapGroupKind {
	/// Correcting allocation drift.
	Rebalance,
	/// Spreading a fresh deposit across the target allocation.
	DepositConversion,
}

/// Last status reported by the swap provider for an in-flight order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
	Pending,
	Processing,
	Completed,
	Failed,
}

/// Typed polling progress for a swap transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapProgress {
	pub provider_state: ProviderState,
	pub poll_count: u32,
	pub last_polled_at: DateTime<Utc>,
}

/// A recorded ledger transaction: a deposit credit or a (rebalance) swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
	pub id: Uuid,
	pub user_id: Uuid,
	pub kind: TransactionKind,
	pub status: TransactionStatus,
	pub from_asset: Option<String>,
	pub from_class: Option<AssetClass>,
	pub from_amount_usd: Option<Decimal>,
	pub to_asset: Option<String>,
	pub to_class: Option<AssetClass>,
	/// USD value the swap was expected to deliver.
	pub estimated_to_amount: Option<Decimal>,
	/// USD value actually delivered; set on settlement, never rounded up to the estimate.
	pub actual_to_amount: Option<Decimal>,
	/// External order handle used as the idempotency key for status polling.
	pub order_handle: Option<String>,
	pub group_id: Option<Uuid>,
	pub group_kind: Option<SwapGroupKind>,
	/// On-chain transaction hash (deposit source or swap settlement).
	pub chain_tx_hash: Option<String>,
	pub failure_reason: Option<String>,
	pub progress: Option<SwapProgress>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Fields a caller supplies when recording a new transaction; the store assigns the id
/// and timestamps.
#[derive(Debug, Clone)]
pub struct NewTransaction {
	pub user_id: Uuid,
	pub kind: TransactionKind,
	pub status: TransactionStatus,
	pub from_asset: Option<String>,
	pub from_class: Option<AssetClass>,
	pub from_amount_usd: Option<Decimal>,
	pub to_asset: Option<String>,
	pub to_class: Option<AssetClass>,
	pub estimated_to_amount: Option<Decimal>,
	pub actual_to_amount: Option<Decimal>,
	pub order_handle: Option<String>,
	pub group_id: Option<Uuid>,
	pub group_kind: Option<SwapGroupKind>,
	pub chain_tx_hash: Option<String>,
}

impl NewTransaction {
	/// A new transaction with the given identity fields and everything else unset.
	pub fn new(user_id: Uuid, kind: TransactionKind, status: TransactionStatus) -> Self {
		Self {
			user_id,
			kind,
			status,
			from_asset: None,
			from_class: None,
			from_amount_usd: None,
			to_asset: None,
			to_class: None,
			estimated_to_amount: None,
			actual_to_amount: None,
			order_handle: None,
			group_id: None,
			group_kind: None,
			chain_tx_hash: None,
		}
	}
}

/// Error types for ledger store operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("portfolio not found for user {0}")]
	PortfolioNotFound(Uuid),

	#[error("transaction not found: {0}")]
	TransactionNotFound(Uuid),

	#[error("storage error: {0}")]
	Storage(String),
}
