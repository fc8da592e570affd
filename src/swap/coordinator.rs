//! Swap execution coordinator.
//!
//! Submits swap instructions to the external provider and polls order status through
//! the recurring-job contract. Settlement debits the source asset and credits the
//! destination asset with the actual filled amount in a single atomic ledger call, so a
//! transaction's status can never disagree with the balances it moved.

use crate::config::EngineConfig;
use crate::ledger::{
	BalanceDelta, LedgerError, LedgerStore, NewTransaction, ProviderState, SwapGroupKind,
	SwapProgress, TransactionKind, TransactionRecord, TransactionStatus,
};
use crate::rebalance::SwapInstruction;
use crate::scheduler::{JobHandler, JobOutcome, RetryReason, Scheduler};
use crate::swap::types::{SwapError, SwapProvider};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one status poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
	/// The order settled. `newly_settled` is `true` only on the invocation that applied
	/// the balance movement.
	Completed {
		transaction: TransactionRecord,
		newly_settled: bool,
	},
	/// The provider reported failure; recorded, no balance mutation.
	Failed { transaction: TransactionRecord },
	/// The order is still in flight; retryable.
	StillPending { state: ProviderState },
}

/// Job key for a swap transaction's recurring status poll.
pub fn poll_job_key(transaction_id: Uuid) -> String {
	format!("swap-poll:{}", transaction_id)
}

/// Coordinates swap order submission and settlement against the ledger.
#[derive(Clone)]
pub struct SwapCoordinator {
	ledger: Arc<dyn LedgerStore>,
	provider: Arc<dyn SwapProvider>,
	scheduler: Arc<dyn Scheduler>,
	config: Arc<EngineConfig>,
}

impl SwapCoordinator {
	pub fn new(
		ledger: Arc<dyn LedgerStore>,
		provider: Arc<dyn SwapProvider>,
		scheduler: Arc<dyn Scheduler>,
		config: Arc<EngineConfig>,
	) -> Self {
		Self {
			ledger,
			provider,
			scheduler,
			config,
		}
	}

	/// Submit one swap instruction: place the order, record a pending transaction and
	/// schedule its status poll.
	///
	/// When `known_handle` carries an order handle that is already recorded, the
	/// existing transaction is returned and nothing is submitted again, so duplicate
	/// submission with the same handle cannot create a second order.
	pub async fn submit(
		&self,
		user_id: Uuid,
		instruction: &SwapInstruction,
		group: Option<(Uuid, SwapGroupKind)>,
		known_handle: Option<String>,
	) -> Result<TransactionRecord, SwapError> {
		if let Some(handle) = &known_handle {
			if let Some(existing) = self.ledger.find_transaction_by_order_handle(handle).await? {
				debug!(
					"Swap order {} already recorded as transaction {}",
					handle, existing.id
				);
				return Ok(existing);
			}
		}

		let handle = match known_handle {
			Some(handle) => handle,
			None => {
				self.provider
					.submit_order(
						&instruction.from_asset,
						&instruction.to_asset,
						instruction.usd_amount,
						self.config.default_slippage_bps,
					)
					.await?
			}
		};

		let kind = match group {
			Some((_, SwapGroupKind::Rebalance)) => TransactionKind::Rebalance,
			_ => TransactionKind::Swap,
		};
		let mut new = NewTransaction::new(user_id, kind, TransactionStatus::Pending);
		new.from_asset = Some(instruction.from_asset.clone());
		new.from_class = Some(instruction.from_class);
		new.from_amount_usd = Some(instruction.usd_amount);
		new.to_asset = Some(instruction.to_asset.clone());
		new.to_class = Some(instruction.to_class);
		new.estimated_to_amount = Some(instruction.usd_amount);
		new.order_handle = Some(handle.clone());
		if let Some((group_id, group_kind)) = group {
			new.group_id = Some(group_id);
			new.group_kind = Some(group_kind);
		}
		let record = self.ledger.record_transaction(new).await?;

		self.schedule_poll(record.id).await;
		info!(
			"Submitted swap {}: {} {} -> {} (order {})",
			record.id,
			instruction.usd_amount,
			instruction.from_asset,
			instruction.to_asset,
			handle
		);
		Ok(record)
	}

	async fn schedule_poll(&self, transaction_id: Uuid) {
		let coordinator = self.clone();
		let handler: JobHandler = Arc::new(move || {
			let coordinator = coordinator.clone();
			Box::pin(async move { coordinator.poll_job(transaction_id).await })
		});
		self.scheduler
			.schedule_recurring(
				&poll_job_key(transaction_id),
				self.config.swap_poll_interval,
				self.config.swap_max_attempts,
				handler,
			)
			.await;
	}

	/// Adapt `poll` to the recurring-job contract. A recorded provider failure is a
	/// terminal outcome for the job: the transaction state is the record of it.
	pub async fn poll_job(&self, transaction_id: Uuid) -> JobOutcome {
		match self.poll(transaction_id).await {
			Ok(PollOutcome::Completed { .. }) => JobOutcome::Done,
			Ok(PollOutcome::Failed { .. }) => JobOutcome::Done,
			Ok(PollOutcome::StillPending { .. }) => JobOutcome::Retry(RetryReason::StillPending),
			Err(SwapError::Provider(e)) => JobOutcome::Retry(RetryReason::Transient(e)),
			Err(SwapError::Ledger(LedgerError::Storage(e))) => {
				JobOutcome::Retry(RetryReason::Transient(e))
			}
			Err(e) => JobOutcome::Fatal(e.to_string()),
		}
	}

	/// Poll the provider for one transaction and settle or record the outcome.
	pub async fn poll(&self, transaction_id: Uuid) -> Result<PollOutcome, SwapError> {
		let record = self
			.ledger
			.get_transaction(transaction_id)
			.await
			.map_err(|e| match e {
				LedgerError::TransactionNotFound(id) => SwapError::TransactionNotFound(id),
				other => SwapError::Ledger(other),
			})?;

		// Terminal short-circuit: never touch balances for a settled transaction.
		match record.status {
			TransactionStatus::Completed => {
				return Ok(PollOutcome::Completed {
					transaction: record,
					newly_settled: false,
				});
			}
			TransactionStatus::Failed => {
				return Ok(PollOutcome::Failed {
					transaction: record,
				});
			}
			TransactionStatus::Pending => {}
		}

		let handle = record
			.order_handle
			.clone()
			.ok_or(SwapError::MissingOrderHandle(record.id))?;
		let status = self.provider.get_order_status(&handle).await?;

		match status.state {
			ProviderState::Completed => {
				let actual = status.actual_output.ok_or_else(|| {
					SwapError::Provider(format!(
						"order {} completed without an actual output amount",
						handle
					))
				})?;
				let (from_asset, from_class, from_amount) = match (
					record.from_asset.clone(),
					record.from_class,
					record.from_amount_usd,
				) {
					(Some(asset), Some(class), Some(amount)) => (asset, class, amount),
					_ => return Err(SwapError::MalformedTransaction(record.id)),
				};
				let (to_asset, to_class) = match (record.to_asset.clone(), record.to_class) {
					(Some(asset), Some(class)) => (asset, class),
					_ => return Err(SwapError::MalformedTransaction(record.id)),
				};

				let deltas = vec![
					BalanceDelta {
						asset: from_asset,
						asset_class: from_class,
						amount_usd: -from_amount,
					},
					BalanceDelta {
						asset: to_asset,
						asset_class: to_class,
						amount_usd: actual,
					},
				];
				let (settled, newly_settled) = self
					.ledger
					.complete_swap(record.id, actual, status.settlement_tx_hash, &deltas)
					.await?;
				if newly_settled {
					info!(
						"Swap {} settled: {} -> {} actual {}",
						settled.id,
						settled.from_asset.as_deref().unwrap_or("?"),
						settled.to_asset.as_deref().unwrap_or("?"),
						actual
					);
				}
				Ok(PollOutcome::Completed {
					transaction: settled,
					newly_settled,
				})
			}
			ProviderState::Failed => {
				let reason = status
					.reason
					.unwrap_or_else(|| "provider reported failure".to_string());
				let failed = self.ledger.fail_swap(record.id, &reason).await?;
				warn!("Swap {} failed: {}", failed.id, reason);
				Ok(PollOutcome::Failed {
					transaction: failed,
				})
			}
			ProviderState::Pending | ProviderState::Processing => {
				let progress = SwapProgress {
					provider_state: status.state,
					poll_count: record.progress.as_ref().map(|p| p.poll_count + 1).unwrap_or(1),
					last_polled_at: Utc::now(),
				};
				self.ledger
					.record_swap_progress(record.id, progress)
					.await?;
				debug!("Swap {} still {:?} at the provider", record.id, status.state);
				Ok(PollOutcome::StillPending {
					state: status.state,
				})
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::assets::{AssetClass, RiskProfile};
	use crate::ledger::InMemoryLedgerStore;
	use crate::scheduler::testing::RecordingScheduler;
	use crate::swap::types::OrderStatus;
	use rust_decimal::Decimal;
	use rust_decimal_macros::dec;
	use std::collections::HashMap;
	use std::sync::Mutex;
	use std::sync::atomic::{AtomicU32, Ordering};

	/// Provider double with scriptable per-handle statuses.
	#[derive(Default)]
	struct MockProvider {
		statuses: Mutex<HashMap<String, OrderStatus>>,
		submissions: AtomicU32,
		fail_status_calls: Mutex<bool>,
	}

	impl MockProvider {
		fn set_status(&self, handle: &str, status: OrderStatus) {
			self.statuses.lock().unwrap().insert(handle.to_string(), status);
		}

		fn fail_next_status_call(&self) {
			*self.fail_status_calls.lock().unwrap() = true;
		}
	}

	#[async_trait::async_trait]
	impl SwapProvider for MockProvider {
		async fn submit_order(
			&self,
			_from_asset: &str,
			_to_asset: &str,
			_usd_amount: Decimal,
			_slippage_bps: u32,
		) -> Result<String, SwapError> {
			let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
			let handle = format!("order-{}", n);
			self.set_status(
				&handle,
				OrderStatus {
					state: ProviderState::Pending,
					actual_output: None,
					settlement_tx_hash: None,
					reason: None,
				},
			);
			Ok(handle)
		}

		async fn get_order_status(&self, order_handle: &str) -> Result<OrderStatus, SwapError> {
			if std::mem::take(&mut *self.fail_status_calls.lock().unwrap()) {
				return Err(SwapError::Provider("connection reset".to_string()));
			}
			self.statuses
				.lock()
				.unwrap()
				.get(order_handle)
				.cloned()
				.ok_or_else(|| SwapError::Provider(format!("unknown order {}", order_handle)))
		}
	}

	struct Rig {
		coordinator: SwapCoordinator,
		ledger: Arc<InMemoryLedgerStore>,
		provider: Arc<MockProvider>,
		scheduler: Arc<RecordingScheduler>,
		user_id: Uuid,
	}

	fn rig() -> Rig {
		let ledger = Arc::new(InMemoryLedgerStore::new());
		let provider = Arc::new(MockProvider::default());
		let scheduler = Arc::new(RecordingScheduler::default());
		let user_id = Uuid::new_v4();
		ledger.seed_portfolio(user_id, RiskProfile::Moderate.target_allocation());
		ledger.seed_holding(user_id, "USDC", AssetClass::StableYield, dec!(100));

		let coordinator = SwapCoordinator::new(
			ledger.clone(),
			provider.clone(),
			scheduler.clone(),
			Arc::new(EngineConfig::default()),
		);
		Rig {
			coordinator,
			ledger,
			provider,
			scheduler,
			user_id,
		}
	}

	fn instruction(amount: Decimal) -> SwapInstruction {
		SwapInstruction {
			from_class: AssetClass::StableYield,
			to_class: AssetClass::Gold,
			from_asset: "USDC".to_string(),
			to_asset: "PAXG".to_string(),
			usd_amount: amount,
		}
	}

	#[tokio::test]
	async fn submit_records_pending_transaction_and_schedules_poll() {
		let rig = rig();
		let record = rig
			.coordinator
			.submit(rig.user_id, &instruction(dec!(30)), None, None)
			.await
			.unwrap();

		assert_eq!(record.status, TransactionStatus::Pending);
		assert_eq!(record.order_handle.as_deref(), Some("order-1"));
		assert_eq!(record.estimated_to_amount, Some(dec!(30)));
		assert_eq!(
			rig.scheduler.scheduled.lock().unwrap().as_slice(),
			[poll_job_key(record.id)]
		);
	}

	#[tokio::test]
	async fn submit_with_known_handle_returns_the_existing_record() {
		let rig = rig();
		let first = rig
			.coordinator
			.submit(rig.user_id, &instruction(dec!(30)), None, None)
			.await
			.unwrap();

		let second = rig
			.coordinator
			.submit(
				rig.user_id,
				&instruction(dec!(30)),
				None,
				first.order_handle.clone(),
			)
			.await
			.unwrap();

		assert_eq!(second.id, first.id);
		assert_eq!(rig.provider.submissions.load(Ordering::SeqCst), 1);
		assert_eq!(rig.ledger.transactions_for(rig.user_id).len(), 1);
	}

	#[tokio::test]
	async fn pending_orders_record_progress_and_signal_retry() {
		let rig = rig();
		let record = rig
			.coordinator
			.submit(rig.user_id, &instruction(dec!(30)), None, None)
			.await
			.unwrap();

		let outcome = rig.coordinator.poll(record.id).await.unwrap();
		assert!(matches!(
			outcome,
			PollOutcome::StillPending {
				state: ProviderState::Pending
			}
		));

		rig.provider.set_status(
			"order-1",
			OrderStatus {
				state: ProviderState::Processing,
				actual_output: None,
				settlement_tx_hash: None,
				reason: None,
			},
		);
		rig.coordinator.poll(record.id).await.unwrap();

		let stored = rig.ledger.get_transaction(record.id).await.unwrap();
		let progress = stored.progress.unwrap();
		assert_eq!(progress.provider_state, ProviderState::Processing);
		assert_eq!(progress.poll_count, 2);

		assert!(matches!(
			rig.coordinator.poll_job(record.id).await,
			JobOutcome::Retry(RetryReason::StillPending)
		));
	}

	#[tokio::test]
	async fn settlement_uses_the_actual_fill_and_applies_exactly_once() {
		let rig = rig();
		let record = rig
			.coordinator
			.submit(rig.user_id, &instruction(dec!(30)), None, None)
			.await
			.unwrap();

		// Partial fill: 29.4 delivered against an estimate of 30.
		rig.provider.set_status(
			"order-1",
			OrderStatus {
				state: ProviderState::Completed,
				actual_output: Some(dec!(29.4)),
				settlement_tx_hash: Some("0xsettle".to_string()),
				reason: None,
			},
		);

		let outcome = rig.coordinator.poll(record.id).await.unwrap();
		match outcome {
			PollOutcome::Completed {
				transaction,
				newly_settled,
			} => {
				assert!(newly_settled);
				assert_eq!(transaction.actual_to_amount, Some(dec!(29.4)));
				assert_eq!(transaction.chain_tx_hash.as_deref(), Some("0xsettle"));
			}
			other => panic!("expected Completed, got {:?}", other),
		}

		let portfolio = rig.ledger.get_portfolio(rig.user_id).await.unwrap();
		assert_eq!(portfolio.holdings["USDC"].value_usd, dec!(70));
		assert_eq!(portfolio.holdings["PAXG"].value_usd, dec!(29.4));

		// Polling again performs zero additional mutations.
		let outcome = rig.coordinator.poll(record.id).await.unwrap();
		assert!(matches!(
			outcome,
			PollOutcome::Completed {
				newly_settled: false,
				..
			}
		));
		let portfolio = rig.ledger.get_portfolio(rig.user_id).await.unwrap();
		assert_eq!(portfolio.holdings["USDC"].value_usd, dec!(70));
		assert_eq!(portfolio.holdings["PAXG"].value_usd, dec!(29.4));
		assert!(matches!(rig.coordinator.poll_job(record.id).await, JobOutcome::Done));
	}

	#[tokio::test]
	async fn failed_orders_record_the_reason_without_touching_balances() {
		let rig = rig();
		let record = rig
			.coordinator
			.submit(rig.user_id, &instruction(dec!(30)), None, None)
			.await
			.unwrap();

		rig.provider.set_status(
			"order-1",
			OrderStatus {
				state: ProviderState::Failed,
				actual_output: None,
				settlement_tx_hash: None,
				reason: Some("insufficient liquidity".to_string()),
			},
		);

		let outcome = rig.coordinator.poll(record.id).await.unwrap();
		match outcome {
			PollOutcome::Failed { transaction } => {
				assert_eq!(transaction.status, TransactionStatus::Failed);
				assert_eq!(
					transaction.failure_reason.as_deref(),
					Some("insufficient liquidity")
				);
			}
			other => panic!("expected Failed, got {:?}", other),
		}

		let portfolio = rig.ledger.get_portfolio(rig.user_id).await.unwrap();
		assert_eq!(portfolio.holdings["USDC"].value_usd, dec!(100));
		assert!(portfolio.holdings.get("PAXG").is_none());
		assert!(matches!(rig.coordinator.poll_job(record.id).await, JobOutcome::Done));
	}

	#[tokio::test]
	async fn provider_errors_are_retryable() {
		let rig = rig();
		let record = rig
			.coordinator
			.submit(rig.user_id, &instruction(dec!(30)), None, None)
			.await
			.unwrap();

		rig.provider.fail_next_status_call();
		assert!(matches!(
			rig.coordinator.poll_job(record.id).await,
			JobOutcome::Retry(RetryReason::Transient(_))
		));

		// The transaction stays pending for a later attempt.
		let stored = rig.ledger.get_transaction(record.id).await.unwrap();
		assert_eq!(stored.status, TransactionStatus::Pending);
	}

	#[tokio::test]
	async fn polling_an_unknown_transaction_is_fatal() {
		let rig = rig();
		let missing = Uuid::new_v4();
		assert!(matches!(
			rig.coordinator.poll(missing).await,
			Err(SwapError::TransactionNotFound(id)) if id == missing
		));
		assert!(matches!(
			rig.coordinator.poll_job(missing).await,
			JobOutcome::Fatal(_)
		));
	}
}
