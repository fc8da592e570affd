//! Deposit service: session creation and the re-entrant confirmation algorithm.
//!
//! `confirm` is callable synchronously (user-triggered) and from the recurring job, and
//! produces identical outcomes in both paths. Safety under concurrent invocations rests
//! on two things only: terminal states short-circuit before any ledger access, and the
//! processed-event marker is inserted before the credit, so a duplicate insert means
//! another execution already credited and this one stops.

use super::session::{
	DepositError, DepositSession, MatchedTransfer, SessionStatus, SessionStore,
};
use crate::assets::AssetClass;
use crate::chain::ChainObserver;
use crate::config::EngineConfig;
use crate::ledger::{
	BalanceDelta, EventKey, LedgerError, LedgerStore, NewTransaction, TransactionKind,
	TransactionRecord, TransactionStatus,
};
use crate::scheduler::{JobHandler, JobOutcome, RetryReason, Scheduler};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Response returned to the caller that opened a deposit session.
#[derive(Debug, Clone)]
pub struct CreatedSession {
	pub session_id: Uuid,
	pub deposit_address: String,
	pub expires_at: DateTime<Utc>,
}

/// Result of one confirmation attempt.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
	/// The session is confirmed and the credit has been applied (now or earlier).
	Confirmed {
		amount: Decimal,
		tx_hash: String,
		confirmations: u64,
		transaction_id: Option<Uuid>,
		/// `true` only on the invocation that performed the credit.
		newly_credited: bool,
	},
	/// No qualifying transfer observed yet; retryable.
	AwaitingTransfer,
	/// A transfer is bound but confirmation depth is not met yet; retryable.
	AwaitingConfirmations {
		amount: Decimal,
		tx_hash: String,
		confirmations: u64,
		required: u64,
	},
}

/// Job key for a session's recurring confirmation check.
pub fn confirm_job_key(session_id: Uuid) -> String {
	format!("deposit-confirm:{}", session_id)
}

/// Coordinates deposit sessions: creation, chain scanning, confirmation-depth waiting
/// and the exactly-once ledger credit.
///
/// All collaborators are interface-typed and shared, so the service is cheap to clone
/// into recurring-job closures.
#[derive(Clone)]
pub struct DepositService {
	ledger: Arc<dyn LedgerStore>,
	sessions: Arc<dyn SessionStore>,
	chain: Arc<dyn ChainObserver>,
	scheduler: Arc<dyn Scheduler>,
	config: Arc<EngineConfig>,
}

impl DepositService {
	pub fn new(
		ledger: Arc<dyn LedgerStore>,
		sessions: Arc<dyn SessionStore>,
		chain: Arc<dyn ChainObserver>,
		scheduler: Arc<dyn Scheduler>,
		config: Arc<EngineConfig>,
	) -> Self {
		Self {
			ledger,
			sessions,
			chain,
			scheduler,
			config,
		}
	}

	/// Open a deposit session and schedule its recurring confirmation check.
	///
	/// The current chain head is recorded as the scan floor so transfers that happened
	/// before the session never match.
	pub async fn create(
		&self,
		user_id: Uuid,
		destination_address: String,
		token: &str,
		expected_amount: Option<Decimal>,
	) -> Result<CreatedSession, DepositError> {
		if token != self.config.supported_token.symbol {
			return Err(DepositError::UnsupportedToken(token.to_string()));
		}
		if let Some(amount) = expected_amount {
			if amount <= Decimal::ZERO {
				return Err(DepositError::InvalidAmount);
			}
		}

		let created_at_block = self.chain.get_latest_block().await?;
		let session = DepositSession::new(
			user_id,
			destination_address,
			token.to_string(),
			expected_amount,
			created_at_block,
			&self.config,
		);
		self.sessions.save(&session).await?;
		self.schedule_confirmation(session.id).await;

		info!(
			"Created deposit session {} for user {} watching {} at {} from block {}",
			session.id, user_id, token, session.destination_address, created_at_block
		);
		Ok(CreatedSession {
			session_id: session.id,
			deposit_address: session.destination_address,
			expires_at: session.expires_at,
		})
	}

	async fn schedule_confirmation(&self, session_id: Uuid) {
		let service = self.clone();
		let handler: JobHandler = Arc::new(move || {
			let service = service.clone();
			Box::pin(async move { service.confirm_job(session_id).await })
		});
		self.scheduler
			.schedule_recurring(
				&confirm_job_key(session_id),
				self.config.confirm_poll_interval,
				self.config.confirm_max_attempts,
				handler,
			)
			.await;
	}

	/// Adapt `confirm` to the recurring-job contract.
	pub async fn confirm_job(&self, session_id: Uuid) -> JobOutcome {
		match self.confirm(session_id).await {
			Ok(ConfirmOutcome::Confirmed { .. }) => JobOutcome::Done,
			Ok(ConfirmOutcome::AwaitingTransfer) => JobOutcome::Retry(RetryReason::NoMatchYet),
			Ok(ConfirmOutcome::AwaitingConfirmations { .. }) => {
				JobOutcome::Retry(RetryReason::AwaitingConfirmations)
			}
			Err(DepositError::Chain(e)) => JobOutcome::Retry(RetryReason::Transient(e.to_string())),
			Err(DepositError::Ledger(LedgerError::Storage(e))) => {
				JobOutcome::Retry(RetryReason::Transient(e))
			}
			Err(e) => JobOutcome::Fatal(e.to_string()),
		}
	}

	/// Run one confirmation attempt for a session.
	///
	/// Candidate transfers are scanned in chain order and the oldest unprocessed
	/// in-band transfer wins, so multiple deposits landing in one scan window credit
	/// first-in-first-out.
	pub async fn confirm(&self, session_id: Uuid) -> Result<ConfirmOutcome, DepositError> {
		let mut session = self
			.sessions
			.get(session_id)
			.await?
			.ok_or(DepositError::SessionNotFound(session_id))?;

		// Terminal short-circuits, before any chain or ledger access.
		if session.status == SessionStatus::Confirmed {
			let matched = session.matched.as_ref().ok_or_else(|| {
				DepositError::Storage(format!(
					"confirmed session {} has no matched transfer",
					session.id
				))
			})?;
			return Ok(ConfirmOutcome::Confirmed {
				amount: matched.amount,
				tx_hash: matched.tx_hash.clone(),
				confirmations: matched.confirmations,
				transaction_id: session.credit_transaction_id,
				newly_credited: false,
			});
		}
		if session.status == SessionStatus::Expired {
			return Err(DepositError::SessionExpired);
		}

		if session.status == SessionStatus::AwaitingTransfer && session.is_expired_at(Utc::now()) {
			session.status = SessionStatus::Expired;
			self.sessions.save(&session).await?;
			warn!(
				"Deposit session {} expired without a matching transfer",
				session.id
			);
			return Err(DepositError::SessionExpired);
		}

		let latest_block = self.chain.get_latest_block().await?;
		let Some(event) = self.find_match(&session, latest_block).await? else {
			debug!(
				"No qualifying transfer for session {} up to block {}",
				session.id, latest_block
			);
			return Ok(ConfirmOutcome::AwaitingTransfer);
		};

		let confirmations = latest_block - event.block_number + 1;
		session.matched = Some(MatchedTransfer {
			tx_hash: event.tx_hash.clone(),
			log_index: event.log_index,
			block_number: event.block_number,
			from: event.from.clone(),
			amount: event.amount,
			confirmations,
		});

		// Persist the binding before the credit gate; it is overwritable, not a credit.
		let required = self.config.required_confirmations;
		if confirmations < required {
			session.status = SessionStatus::Received;
		}
		self.sessions.save(&session).await?;
		if confirmations < required {
			debug!(
				"Session {} bound to tx {} with {}/{} confirmations",
				session.id, event.tx_hash, confirmations, required
			);
			return Ok(ConfirmOutcome::AwaitingConfirmations {
				amount: event.amount,
				tx_hash: event.tx_hash,
				confirmations,
				required,
			});
		}

		// Idempotency gate: the marker insert is the only synchronization point. A
		// duplicate insert means a concurrent execution already credited this event.
		let key = EventKey {
			chain: self.config.chain.clone(),
			tx_hash: event.tx_hash.clone(),
			log_index: event.log_index,
		};
		let newly_inserted = self.ledger.mark_event_processed(&key).await?;
		if !newly_inserted {
			debug!(
				"Transfer {} log {} already credited by a concurrent execution",
				event.tx_hash, event.log_index
			);
			// Re-read instead of saving the local copy: the crediting execution may
			// already have stored the confirmed session with its transaction id.
			let mut session = self
				.sessions
				.get(session_id)
				.await?
				.ok_or(DepositError::SessionNotFound(session_id))?;
			if session.status != SessionStatus::Confirmed {
				session.status = SessionStatus::Confirmed;
				if session.matched.is_none() {
					session.matched = Some(MatchedTransfer {
						tx_hash: event.tx_hash.clone(),
						log_index: event.log_index,
						block_number: event.block_number,
						from: event.from.clone(),
						amount: event.amount,
						confirmations,
					});
				}
				self.sessions.save(&session).await?;
			}
			return Ok(ConfirmOutcome::Confirmed {
				amount: event.amount,
				tx_hash: event.tx_hash,
				confirmations,
				transaction_id: session.credit_transaction_id,
				newly_credited: false,
			});
		}

		let record = match self.credit(&session, &event).await {
			Ok(record) => record,
			Err(e) => {
				// The marker exists but the credit did not land. This inconsistency is
				// detectable (marker without deposit transaction) and must surface to
				// reconciliation rather than be swallowed.
				error!(
					"Ledger credit failed after marker insert for {}#{} on session {}: {}",
					key.tx_hash, key.log_index, session.id, e
				);
				return Err(e);
			}
		};

		session.status = SessionStatus::Confirmed;
		session.credit_transaction_id = Some(record.id);
		self.sessions.save(&session).await?;
		info!(
			"Deposit session {} confirmed: credited {} {} from tx {} ({} confirmations)",
			session.id,
			event.amount,
			self.config.supported_token.symbol,
			event.tx_hash,
			confirmations
		);
		Ok(ConfirmOutcome::Confirmed {
			amount: event.amount,
			tx_hash: event.tx_hash,
			confirmations,
			transaction_id: Some(record.id),
			newly_credited: true,
		})
	}

	/// Scan the session's block window and return the oldest unprocessed in-band
	/// transfer, if any.
	async fn find_match(
		&self,
		session: &DepositSession,
		latest_block: u64,
	) -> Result<Option<crate::chain::TransferEvent>, DepositError> {
		let mut events = self
			.chain
			.get_transfer_logs(
				&self.config.supported_token,
				&session.destination_address,
				session.created_at_block,
				latest_block,
			)
			.await?;
		events.sort_by_key(|e| (e.block_number, e.log_index));

		for event in events {
			if !session.accepts_amount(event.amount) {
				continue;
			}
			let timestamp = self.chain.get_block_timestamp(event.block_number).await?;
			if timestamp < session.created_at {
				continue;
			}
			let key = EventKey {
				chain: self.config.chain.clone(),
				tx_hash: event.tx_hash.clone(),
				log_index: event.log_index,
			};
			if self.ledger.is_event_processed(&key).await? {
				continue;
			}
			return Ok(Some(event));
		}
		Ok(None)
	}

	/// Apply the ledger credit: bump the stable balance and record the deposit.
	async fn credit(
		&self,
		session: &DepositSession,
		event: &crate::chain::TransferEvent,
	) -> Result<TransactionRecord, DepositError> {
		let token = &self.config.supported_token;
		let deltas = vec![BalanceDelta {
			asset: token.symbol.clone(),
			asset_class: AssetClass::StableYield,
			amount_usd: event.amount,
		}];
		self.ledger.increment_balances(session.user_id, &deltas).await?;

		let mut new = NewTransaction::new(
			session.user_id,
			TransactionKind::Deposit,
			TransactionStatus::Completed,
		);
		new.to_asset = Some(token.symbol.clone());
		new.to_class = Some(AssetClass::StableYield);
		new.actual_to_amount = Some(event.amount);
		new.chain_tx_hash = Some(event.tx_hash.clone());
		Ok(self.ledger.record_transaction(new).await?)
	}
}
