use crate::chain::ChainError;
use crate::config::EngineConfig;
use crate::ledger::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Lifecycle status of a deposit session.
///
/// `AwaitingTransfer → Received → Confirmed` on success; `AwaitingTransfer → Expired`
/// when the wall clock passes the session expiry before any transfer is bound. Both
/// `Confirmed` and `Expired` are terminal: no further scanning happens after either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
	AwaitingTransfer,
	Received,
	Confirmed,
	Expired,
}

/// The on-chain transfer a session has been bound to.
///
/// Binding is overwritable until the credit happens; the processed-event marker, not
/// this record, is what makes the credit exactly-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedTransfer {
	pub tx_hash: String,
	pub log_index: u64,
	pub block_number: u64,
	pub from: String,
	pub amount: Decimal,
	/// Confirmation depth observed on the most recent check.
	pub confirmations: u64,
}

/// An intent to receive an on-chain transfer into a user's deposit address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositSession {
	pub id: Uuid,
	pub user_id: Uuid,
	pub destination_address: String,
	pub expected_token: String,
	pub expected_amount: Option<Decimal>,
	/// Lower bound of the acceptable amount band.
	pub min_amount: Decimal,
	/// Upper bound of the band; open-ended when no expected amount was given.
	pub max_amount: Option<Decimal>,
	pub created_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
	/// Chain head at creation; the scan floor, so pre-existing transfers are never
	/// considered.
	pub created_at_block: u64,
	pub status: SessionStatus,
	pub matched: Option<MatchedTransfer>,
	/// Ledger transaction recorded by the credit, once confirmed.
	pub credit_transaction_id: Option<Uuid>,
}

impl DepositSession {
	/// Create a session in `AwaitingTransfer`, with its amount band and expiry derived
	/// from the engine configuration.
	pub fn new(
		user_id: Uuid,
		destination_address: String,
		expected_token: String,
		expected_amount: Option<Decimal>,
		created_at_block: u64,
		config: &EngineConfig,
	) -> Self {
		let now = Utc::now();
		let ttl = chrono::Duration::from_std(config.session_ttl)
			.unwrap_or_else(|_| chrono::Duration::minutes(60));
		let (min_amount, max_amount) = amount_band(
			expected_amount,
			config.amount_band_pct,
			config.min_open_amount,
		);
		Self {
			id: Uuid::new_v4(),
			user_id,
			destination_address,
			expected_token,
			expected_amount,
			min_amount,
			max_amount,
			created_at: now,
			expires_at: now + ttl,
			created_at_block,
			status: SessionStatus::AwaitingTransfer,
			matched: None,
			credit_transaction_id: None,
		}
	}

	/// Whether a transfer amount falls inside the session's acceptable band.
	pub fn accepts_amount(&self, amount: Decimal) -> bool {
		amount >= self.min_amount && self.max_amount.is_none_or(|max| amount <= max)
	}

	/// Whether the wall clock has passed the session expiry.
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		now > self.expires_at
	}
}

/// The acceptable band: ±`band_pct`% around an expected amount, or `[min_open, ∞)`
/// when the session is open-amount.
fn amount_band(
	expected: Option<Decimal>,
	band_pct: Decimal,
	min_open: Decimal,
) -> (Decimal, Option<Decimal>) {
	match expected {
		Some(amount) => {
			let half_width = amount * band_pct / Decimal::from(100);
			(amount - half_width, Some(amount + half_width))
		}
		None => (min_open, None),
	}
}

/// Error types for deposit session operations.
#[derive(Debug, thiserror::Error)]
pub enum DepositError {
	#[error("unsupported token: {0}")]
	UnsupportedToken(String),

	#[error("expected amount must be a positive number")]
	InvalidAmount,

	#[error("deposit session not found: {0}")]
	SessionNotFound(Uuid),

	#[error("deposit session expired")]
	SessionExpired,

	#[error("chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("session storage error: {0}")]
	Storage(String),
}

/// Port for deposit session persistence.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
	async fn save(&self, session: &DepositSession) -> Result<(), DepositError>;
	async fn get(&self, id: Uuid) -> Result<Option<DepositSession>, DepositError>;
}

/// In-memory session store for tests and the demo binary.
#[derive(Default)]
pub struct InMemorySessionStore {
	sessions: Mutex<HashMap<Uuid, DepositSession>>,
}

impl InMemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
	async fn save(&self, session: &DepositSession) -> Result<(), DepositError> {
		let mut sessions = self.sessions.lock().unwrap();
		sessions.insert(session.id, session.clone());
		Ok(())
	}

	async fn get(&self, id: Uuid) -> Result<Option<DepositSession>, DepositError> {
		let sessions = self.sessions.lock().unwrap();
		Ok(sessions.get(&id).cloned())
	}
}
