//! The ledger store port and its in-memory reference implementation.
//!
//! Balance mutations are atomic read-modify-write operations: two concurrent mutations
//! on the same portfolio must not lose a delta, so raw overwrite semantics are never
//! exposed. Swap settlement (`complete_swap`) applies the balance movement and the
//! status flip as one unit, and `mark_event_processed` is the uniqueness gate deposit
//! crediting synchronizes on.

use super::types::*;
use crate::assets::AssetClass;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

/// Port for all persistent ledger state.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
	/// Fetch a user's portfolio with its holdings.
	async fn get_portfolio(&self, user_id: Uuid) -> Result<Portfolio, LedgerError>;

	/// Fetch a single holding by portfolio id and asset symbol.
	async fn get_holding(
		&self,
		portfolio_id: Uuid,
		asset: &str,
	) -> Result<Option<Holding>, LedgerError>;

	/// Atomically apply balance deltas to a portfolio and recompute totals and
	/// percentages. Returns the updated portfolio.
	async fn increment_balances(
		&self,
		user_id: Uuid,
		deltas: &[BalanceDelta],
	) -> Result<Portfolio, LedgerError>;

	/// Record a new transaction; the store assigns id and timestamps.
	async fn record_transaction(
		&self,
		new: NewTransaction,
	) -> Result<TransactionRecord, LedgerError>;

	async fn get_transaction(&self, id: Uuid) -> Result<TransactionRecord, LedgerError>;

	/// Look up a transaction by its external order handle.
	async fn find_transaction_by_order_handle(
		&self,
		handle: &str,
	) -> Result<Option<TransactionRecord>, LedgerError>;

	/// The group id of any transaction for this user that is still pending with the
	/// given group kind, if one exists.
	async fn find_pending_group(
		&self,
		user_id: Uuid,
		group_kind: SwapGroupKind,
	) -> Result<Option<Uuid>, LedgerError>;

	/// Settle a swap as one atomic unit: apply the balance deltas, record the actual
	/// delivered amount and settlement hash, and flip the status to `Completed`.
	///
	/// Returns the record and whether this call performed the settlement. A transaction
	/// that is already terminal is returned unchanged with `false`, so polling a settled
	/// swap never mutates balances again.
	async fn complete_swap(
		&self,
		id: Uuid,
		actual_to_amount: Decimal,
		settlement_tx_hash: Option<String>,
		deltas: &[BalanceDelta],
	) -> Result<(TransactionRecord, bool), LedgerError>;

	/// Mark a swap failed with a reason. No balance mutation.
	async fn fail_swap(&self, id: Uuid, reason: &str) -> Result<TransactionRecord, LedgerError>;

	/// Persist the latest provider-reported progress for observability.
	async fn record_swap_progress(
		&self,
		id: Uuid,
		progress: SwapProgress,
	) -> Result<(), LedgerError>;

	/// Whether an on-chain event has already been credited.
	async fn is_event_processed(&self, key: &EventKey) -> Result<bool, LedgerError>;

	/// Insert the processed-event marker. Returns `true` if this call inserted it,
	/// `false` if the marker already existed (another execution credited the event).
	async fn mark_event_processed(&self, key: &EventKey) -> Result<bool, LedgerError>;
}

#[derive(Default)]
struct LedgerState {
	portfolios: HashMap<Uuid, Portfolio>,
	transactions: HashMap<Uuid, TransactionRecord>,
	processed_events: HashSet<EventKey>,
}

/// In-memory ledger store.
///
/// A single mutex over the whole state gives every trait method the atomicity the
/// contract requires. Suitable for tests and the demo binary; a database adapter would
/// enforce the same guarantees with transactions and a unique index on the event key.
#[derive(Default)]
pub struct InMemoryLedgerStore {
	state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Create an empty portfolio for a user with the given target allocation.
	pub fn seed_portfolio(
		&self,
		user_id: Uuid,
		target_allocation: HashMap<AssetClass, Decimal>,
	) -> Portfolio {
		let portfolio = Portfolio {
			id: Uuid::new_v4(),
			user_id,
			total_value_usd: Decimal::ZERO,
			target_allocation,
			holdings: HashMap::new(),
			updated_at: Utc::now(),
		};
		let mut state = self.state.lock().unwrap();
		state.portfolios.insert(user_id, portfolio.clone());
		portfolio
	}

	/// Set a holding to an absolute USD value, creating it if missing. Test and demo
	/// seeding helper; the engine itself only ever increments.
	pub fn seed_holding(&self, user_id: Uuid, asset: &str, class: AssetClass, value: Decimal) {
		let mut state = self.state.lock().unwrap();
		let portfolio = state
			.portfolios
			.get_mut(&user_id)
			.expect("portfolio must be seeded first");
		portfolio.holdings.insert(
			asset.to_string(),
			Holding {
				asset: asset.to_string(),
				asset_class: class,
				value_usd: value,
				percentage: Decimal::ZERO,
			},
		);
		recompute(portfolio);
	}

	/// All transactions recorded for a user, oldest first.
	pub fn transactions_for(&self, user_id: Uuid) -> Vec<TransactionRecord> {
		let state = self.state.lock().unwrap();
		let mut transactions: Vec<TransactionRecord> = state
			.transactions
			.values()
			.filter(|t| t.user_id == user_id)
			.cloned()
			.collect();
		transactions.sort_by_key(|t| t.created_at);
		transactions
	}

	/// Number of processed-event markers held.
	pub fn processed_event_count(&self) -> usize {
		self.state.lock().unwrap().processed_events.len()
	}
}

/// Recompute the portfolio total and per-holding percentages in place.
fn recompute(portfolio: &mut Portfolio) {
	let total: Decimal = portfolio.holdings.values().map(|h| h.value_usd).sum();
	portfolio.total_value_usd = total;
	for holding in portfolio.holdings.values_mut() {
		holding.percentage = if total > Decimal::ZERO {
			holding.value_usd / total * Decimal::from(100)
		} else {
			Decimal::ZERO
		};
	}
	portfolio.updated_at = Utc::now();
}

fn apply_deltas(portfolio: &mut Portfolio, deltas: &[BalanceDelta]) {
	for delta in deltas {
		let holding = portfolio
			.holdings
			.entry(delta.asset.clone())
			.or_insert_with(|| Holding {
				asset: delta.asset.clone(),
				asset_class: delta.asset_class,
				value_usd: Decimal::ZERO,
				percentage: Decimal::ZERO,
			});
		holding.value_usd += delta.amount_usd;
	}
	recompute(portfolio);
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
	async fn get_portfolio(&self, user_id: Uuid) -> Result<Portfolio, LedgerError> {
		let state = self.state.lock().unwrap();
		state
			.portfolios
			.get(&user_id)
			.cloned()
			.ok_or(LedgerError::PortfolioNotFound(user_id))
	}

	async fn get_holding(
		&self,
		portfolio_id: Uuid,
		asset: &str,
	) -> Result<Option<Holding>, LedgerError> {
		let state = self.state.lock().unwrap();
		Ok(state
			.portfolios
			.values()
			.find(|p| p.id == portfolio_id)
			.and_then(|p| p.holdings.get(asset))
			.cloned())
	}

	async fn increment_balances(
		&self,
		user_id: Uuid,
		deltas: &[BalanceDelta],
	) -> Result<Portfolio, LedgerError> {
		let mut state = self.state.lock().unwrap();
		let portfolio = state
			.portfolios
			.get_mut(&user_id)
			.ok_or(LedgerError::PortfolioNotFound(user_id))?;
		apply_deltas(portfolio, deltas);
		Ok(portfolio.clone())
	}

	async fn record_transaction(
		&self,
		new: NewTransaction,
	) -> Result<TransactionRecord, LedgerError> {
		let now = Utc::now();
		let record = TransactionRecord {
			id: Uuid::new_v4(),
			user_id: new.user_id,
			kind: new.kind,
			status: new.status,
			from_asset: new.from_asset,
			from_class: new.from_class,
			from_amount_usd: new.from_amount_usd,
			to_asset: new.to_asset,
			to_class: new.to_class,
			estimated_to_amount: new.estimated_to_amount,
			actual_to_amount: new.actual_to_amount,
			order_handle: new.order_handle,
			group_id: new.group_id,
			group_kind: new.group_kind,
			chain_tx_hash: new.chain_tx_hash,
			failure_reason: None,
			progress: None,
			created_at: now,
			updated_at: now,
		};
		let mut state = self.state.lock().unwrap();
		state.transactions.insert(record.id, record.clone());
		Ok(record)
	}

	async fn get_transaction(&self, id: Uuid) -> Result<TransactionRecord, LedgerError> {
		let state = self.state.lock().unwrap();
		state
			.transactions
			.get(&id)
			.cloned()
			.ok_or(LedgerError::TransactionNotFound(id))
	}

	async fn find_transaction_by_order_handle(
		&self,
		handle: &str,
	) -> Result<Option<TransactionRecord>, LedgerError> {
		let state = self.state.lock().unwrap();
		Ok(state
			.transactions
			.values()
			.find(|t| t.order_handle.as_deref() == Some(handle))
			.cloned())
	}

	async fn find_pending_group(
		&self,
		user_id: Uuid,
		group_kind: SwapGroupKind,
	) -> Result<Option<Uuid>, LedgerError> {
		let state = self.state.lock().unwrap();
		Ok(state
			.transactions
			.values()
			.find(|t| {
				t.user_id == user_id
					&& t.status == TransactionStatus::Pending
					&& t.group_kind == Some(group_kind)
			})
			.and_then(|t| t.group_id))
	}

	async fn complete_swap(
		&self,
		id: Uuid,
		actual_to_amount: Decimal,
		settlement_tx_hash: Option<String>,
		deltas: &[BalanceDelta],
	) -> Result<(TransactionRecord, bool), LedgerError> {
		let mut state = self.state.lock().unwrap();
		let record = state
			.transactions
			.get(&id)
			.cloned()
			.ok_or(LedgerError::TransactionNotFound(id))?;
		if record.status != TransactionStatus::Pending {
			return Ok((record, false));
		}

		let user_id = record.user_id;
		let portfolio = state
			.portfolios
			.get_mut(&user_id)
			.ok_or(LedgerError::PortfolioNotFound(user_id))?;
		apply_deltas(portfolio, deltas);

		let record = state
			.transactions
			.get_mut(&id)
			.ok_or(LedgerError::TransactionNotFound(id))?;
		record.status = TransactionStatus::Completed;
		record.actual_to_amount = Some(actual_to_amount);
		record.chain_tx_hash = settlement_tx_hash;
		record.updated_at = Utc::now();
		Ok((record.clone(), true))
	}

	async fn fail_swap(&self, id: Uuid, reason: &str) -> Result<TransactionRecord, LedgerError> {
		let mut state = self.state.lock().unwrap();
		let record = state
			.transactions
			.get_mut(&id)
			.ok_or(LedgerError::TransactionNotFound(id))?;
		if record.status == TransactionStatus::Pending {
			record.status = TransactionStatus::Failed;
			record.failure_reason = Some(reason.to_string());
			record.updated_at = Utc::now();
		}
		Ok(record.clone())
	}

	async fn record_swap_progress(
		&self,
		id: Uuid,
		progress: SwapProgress,
	) -> Result<(), LedgerError> {
		let mut state = self.state.lock().unwrap();
		let record = state
			.transactions
			.get_mut(&id)
			.ok_or(LedgerError::TransactionNotFound(id))?;
		record.progress = Some(progress);
		record.updated_at = Utc::now();
		Ok(())
	}

	async fn is_event_processed(&self, key: &EventKey) -> Result<bool, LedgerError> {
		let state = self.state.lock().unwrap();
		Ok(state.processed_events.contains(key))
	}

	async fn mark_event_processed(&self, key: &EventKey) -> Result<bool, LedgerError> {
		let mut state = self.state.lock().unwrap();
		Ok(state.processed_events.insert(key.clone()))
	}
}
