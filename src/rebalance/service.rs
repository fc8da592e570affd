//! Rebalance service: drift gating, group dedup and swap submission.

use super::calculator::{RebalancePlan, calculate_rebalance, calculate_required_swaps, drift};
use crate::assets::AssetRegistry;
use crate::config::EngineConfig;
use crate::ledger::{LedgerError, LedgerStore, SwapGroupKind, TransactionRecord};
use crate::swap::{SwapCoordinator, SwapError};
use crate::utils::format_usd;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Result of a rebalance request.
#[derive(Debug, Clone)]
pub enum RebalanceOutcome {
	/// Drift is within tolerance (or nothing actionable remains); no swaps submitted.
	NotNeeded { drift: Decimal },
	/// A group of swaps was submitted.
	Submitted {
		group_id: Uuid,
		swaps: Vec<TransactionRecord>,
		drift: Decimal,
		total_swap_value: Decimal,
	},
}

/// Error types for rebalance operations.
#[derive(Debug, thiserror::Error)]
pub enum RebalanceError {
	#[error("a rebalance group {group_id} is already in flight for this portfolio")]
	AlreadyInProgress { group_id: Uuid },

	#[error("ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("swap error: {0}")]
	Swap(#[from] SwapError),
}

/// Turns drifted portfolios into submitted swap groups.
#[derive(Clone)]
pub struct RebalanceService {
	ledger: Arc<dyn LedgerStore>,
	coordinator: SwapCoordinator,
	registry: Arc<AssetRegistry>,
	config: Arc<EngineConfig>,
}

impl RebalanceService {
	pub fn new(
		ledger: Arc<dyn LedgerStore>,
		coordinator: SwapCoordinator,
		registry: Arc<AssetRegistry>,
		config: Arc<EngineConfig>,
	) -> Self {
		Self {
			ledger,
			coordinator,
			registry,
			config,
		}
	}

	/// Compute the rebalance plan for a portfolio and submit it as one swap group.
	///
	/// Returns `NotNeeded` when drift is at or below the threshold and `force` is not
	/// set. A portfolio with a rebalance group still in flight is refused rather than
	/// doubled up.
	pub async fn rebalance_portfolio(
		&self,
		user_id: Uuid,
		force: bool,
	) -> Result<RebalanceOutcome, RebalanceError> {
		let portfolio = self.ledger.get_portfolio(user_id).await?;
		let current = portfolio.allocation_by_class();
		let balances = portfolio.balances_by_class();

		let plan: RebalancePlan = calculate_rebalance(
			&current,
			&portfolio.target_allocation,
			portfolio.total_value_usd,
			&balances,
			&self.registry,
			self.config.drift_threshold_pct,
			self.config.dust_threshold_usd,
		);

		if !plan.needs_rebalance && !force {
			info!(
				"Portfolio of user {} within tolerance (drift {}pp), no rebalance needed",
				user_id, plan.drift
			);
			return Ok(RebalanceOutcome::NotNeeded { drift: plan.drift });
		}

		// A forced run still recomputes swaps, which may come back empty (all dust).
		let swaps = if plan.swaps.is_empty() && force {
			calculate_required_swaps(
				&current,
				&portfolio.target_allocation,
				portfolio.total_value_usd,
				&balances,
				&self.registry,
				self.config.dust_threshold_usd,
			)
		} else {
			plan.swaps
		};
		if swaps.is_empty() {
			return Ok(RebalanceOutcome::NotNeeded { drift: plan.drift });
		}

		self.submit_group(user_id, swaps, plan.drift, SwapGroupKind::Rebalance)
			.await
	}

	/// Spread a freshly credited deposit from the stable class toward the target
	/// allocation, as one deposit-conversion swap group.
	///
	/// Uses the same calculator as drift rebalancing but without the drift gate: a
	/// deposit always lands 100% in the stable class first.
	pub async fn allocate_deposit(&self, user_id: Uuid) -> Result<RebalanceOutcome, RebalanceError> {
		let portfolio = self.ledger.get_portfolio(user_id).await?;
		let current = portfolio.allocation_by_class();
		let balances = portfolio.balances_by_class();

		let current_drift = drift(&current, &portfolio.target_allocation);
		let swaps = calculate_required_swaps(
			&current,
			&portfolio.target_allocation,
			portfolio.total_value_usd,
			&balances,
			&self.registry,
			self.config.dust_threshold_usd,
		);
		if swaps.is_empty() {
			return Ok(RebalanceOutcome::NotNeeded {
				drift: current_drift,
			});
		}

		self.submit_group(user_id, swaps, current_drift, SwapGroupKind::DepositConversion)
			.await
	}

	async fn submit_group(
		&self,
		user_id: Uuid,
		swaps: Vec<super::calculator::SwapInstruction>,
		drift: Decimal,
		group_kind: SwapGroupKind,
	) -> Result<RebalanceOutcome, RebalanceError> {
		if let Some(group_id) = self.ledger.find_pending_group(user_id, group_kind).await? {
			return Err(RebalanceError::AlreadyInProgress { group_id });
		}

		let group_id = Uuid::new_v4();
		let mut records = Vec::with_capacity(swaps.len());
		for instruction in &swaps {
			let record = self
				.coordinator
				.submit(user_id, instruction, Some((group_id, group_kind)), None)
				.await?;
			records.push(record);
		}

		let total_swap_value: Decimal = swaps.iter().map(|s| s.usd_amount).sum();
		info!(
			"Submitted {:?} group {} for user {}: {} swaps worth {} (drift {}pp)",
			group_kind,
			group_id,
			user_id,
			records.len(),
			format_usd(total_swap_value),
			drift
		);
		Ok(RebalanceOutcome::Submitted {
			group_id,
			swaps: records,
			drift,
			total_swap_value,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::assets::{AssetClass, RiskProfile};
	use crate::ledger::{InMemoryLedgerStore, ProviderState, TransactionStatus};
	use crate::scheduler::testing::RecordingScheduler;
	use crate::swap::{OrderStatus, SwapProvider};
	use rust_decimal_macros::dec;
	use std::collections::HashMap;
	use std::sync::Mutex;

	/// Provider double that completes every order at par on the first poll.
	#[derive(Default)]
	struct ParProvider {
		orders: Mutex<HashMap<String, Decimal>>,
	}

	#[async_trait::async_trait]
	impl SwapProvider for ParProvider {
		async fn submit_order(
			&self,
			_from_asset: &str,
			_to_asset: &str,
			usd_amount: Decimal,
			_slippage_bps: u32,
		) -> Result<String, SwapError> {
			let mut orders = self.orders.lock().unwrap();
			let handle = format!("order-{}", orders.len() + 1);
			orders.insert(handle.clone(), usd_amount);
			Ok(handle)
		}

		async fn get_order_status(&self, order_handle: &str) -> Result<OrderStatus, SwapError> {
			let orders = self.orders.lock().unwrap();
			let amount = orders
				.get(order_handle)
				.copied()
				.ok_or_else(|| SwapError::Provider(format!("unknown order {}", order_handle)))?;
			Ok(OrderStatus {
				state: ProviderState::Completed,
				actual_output: Some(amount),
				settlement_tx_hash: Some(format!("0xsettled-{}", order_handle)),
				reason: None,
			})
		}
	}

	struct Rig {
		service: RebalanceService,
		coordinator: SwapCoordinator,
		ledger: Arc<InMemoryLedgerStore>,
		user_id: Uuid,
	}

	fn rig() -> Rig {
		let ledger = Arc::new(InMemoryLedgerStore::new());
		let provider = Arc::new(ParProvider::default());
		let scheduler = Arc::new(RecordingScheduler::default());
		let config = Arc::new(EngineConfig::default());
		let user_id = Uuid::new_v4();
		ledger.seed_portfolio(user_id, RiskProfile::Moderate.target_allocation());

		let coordinator = SwapCoordinator::new(
			ledger.clone(),
			provider,
			scheduler,
			config.clone(),
		);
		let service = RebalanceService::new(
			ledger.clone(),
			coordinator.clone(),
			Arc::new(AssetRegistry::default()),
			config,
		);
		Rig {
			service,
			coordinator,
			ledger,
			user_id,
		}
	}

	#[tokio::test]
	async fn balanced_portfolio_reports_not_needed() {
		let rig = rig();
		// Holdings exactly at the moderate target.
		rig.ledger.seed_holding(rig.user_id, "USDC", AssetClass::StableYield, dec!(400));
		rig.ledger.seed_holding(rig.user_id, "PAXG", AssetClass::Gold, dec!(200));
		rig.ledger.seed_holding(rig.user_id, "SDAI", AssetClass::DefiYield, dec!(250));
		rig.ledger.seed_holding(rig.user_id, "WBTC", AssetClass::Crypto, dec!(150));

		let outcome = rig.service.rebalance_portfolio(rig.user_id, false).await.unwrap();
		match outcome {
			RebalanceOutcome::NotNeeded { drift } => assert_eq!(drift, dec!(0)),
			other => panic!("expected NotNeeded, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn drifted_portfolio_submits_a_swap_group() {
		let rig = rig();
		// Everything parked in the stable class: maximal drift from the target.
		rig.ledger.seed_holding(rig.user_id, "USDC", AssetClass::StableYield, dec!(1000));

		let outcome = rig.service.rebalance_portfolio(rig.user_id, false).await.unwrap();
		let (group_id, swaps, total) = match outcome {
			RebalanceOutcome::Submitted {
				group_id,
				swaps,
				total_swap_value,
				..
			} => (group_id, swaps, total_swap_value),
			other => panic!("expected Submitted, got {:?}", other),
		};

		// Moderate target puts 60% outside the stable class.
		assert_eq!(total, dec!(600));
		assert_eq!(swaps.len(), 3);
		for swap in &swaps {
			assert_eq!(swap.status, TransactionStatus::Pending);
			assert_eq!(swap.group_id, Some(group_id));
			assert_eq!(swap.group_kind, Some(SwapGroupKind::Rebalance));
		}
	}

	#[tokio::test]
	async fn second_trigger_is_refused_while_the_group_is_pending() {
		let rig = rig();
		rig.ledger.seed_holding(rig.user_id, "USDC", AssetClass::StableYield, dec!(1000));

		let first = rig.service.rebalance_portfolio(rig.user_id, false).await.unwrap();
		let group_id = match first {
			RebalanceOutcome::Submitted { group_id, .. } => group_id,
			other => panic!("expected Submitted, got {:?}", other),
		};

		let second = rig.service.rebalance_portfolio(rig.user_id, false).await;
		assert!(matches!(
			second,
			Err(RebalanceError::AlreadyInProgress { group_id: existing }) if existing == group_id
		));
	}

	#[tokio::test]
	async fn settling_the_group_converges_the_portfolio_to_target() {
		let rig = rig();
		rig.ledger.seed_holding(rig.user_id, "USDC", AssetClass::StableYield, dec!(1000));

		let outcome = rig.service.rebalance_portfolio(rig.user_id, false).await.unwrap();
		let swaps = match outcome {
			RebalanceOutcome::Submitted { swaps, .. } => swaps,
			other => panic!("expected Submitted, got {:?}", other),
		};

		for swap in &swaps {
			rig.coordinator.poll(swap.id).await.unwrap();
		}

		let portfolio = rig.ledger.get_portfolio(rig.user_id).await.unwrap();
		let after = portfolio.allocation_by_class();
		assert!(drift(&after, &portfolio.target_allocation) < dec!(0.5));
	}

	#[tokio::test]
	async fn forced_rebalance_with_nothing_actionable_reports_not_needed() {
		let rig = rig();
		rig.ledger.seed_holding(rig.user_id, "USDC", AssetClass::StableYield, dec!(400));
		rig.ledger.seed_holding(rig.user_id, "PAXG", AssetClass::Gold, dec!(200));
		rig.ledger.seed_holding(rig.user_id, "SDAI", AssetClass::DefiYield, dec!(250));
		rig.ledger.seed_holding(rig.user_id, "WBTC", AssetClass::Crypto, dec!(150));

		let outcome = rig.service.rebalance_portfolio(rig.user_id, true).await.unwrap();
		assert!(matches!(outcome, RebalanceOutcome::NotNeeded { .. }));
	}

	#[tokio::test]
	async fn deposit_conversion_moves_a_fresh_credit_toward_target() {
		let rig = rig();
		// A fresh deposit sits entirely in the stable class.
		rig.ledger.seed_holding(rig.user_id, "USDC", AssetClass::StableYield, dec!(500));

		let outcome = rig.service.allocate_deposit(rig.user_id).await.unwrap();
		let swaps = match outcome {
			RebalanceOutcome::Submitted { swaps, .. } => {
				assert!(swaps
					.iter()
					.all(|s| s.group_kind == Some(SwapGroupKind::DepositConversion)));
				swaps
			}
			other => panic!("expected Submitted, got {:?}", other),
		};

		for swap in &swaps {
			rig.coordinator.poll(swap.id).await.unwrap();
		}
		let portfolio = rig.ledger.get_portfolio(rig.user_id).await.unwrap();
		assert!(drift(&portfolio.allocation_by_class(), &portfolio.target_allocation) < dec!(0.5));
	}
}
