//! Demo binary: wires the engine with in-memory collaborators and runs a scripted
//! deposit-confirmation and rebalance scenario end to end.

use chrono::{DateTime, Utc};
use portfolio_engine::assets::{AssetClass, AssetRegistry, RiskProfile};
use portfolio_engine::chain::{ChainError, ChainObserver, TransferEvent};
use portfolio_engine::config::{EngineConfig, TokenInfo};
use portfolio_engine::deposit::{ConfirmOutcome, DepositService, InMemorySessionStore};
use portfolio_engine::ledger::{InMemoryLedgerStore, LedgerStore, ProviderState};
use portfolio_engine::rebalance::{RebalanceOutcome, RebalanceService};
use portfolio_engine::scheduler::TokioScheduler;
use portfolio_engine::swap::{OrderStatus, SwapCoordinator, SwapError, SwapProvider};
use portfolio_engine::utils::format_usd;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Chain double for the demo: a scriptable head and transfer log.
#[derive(Default)]
struct ScriptedChain {
	head: Mutex<u64>,
	events: Mutex<Vec<TransferEvent>>,
	timestamps: Mutex<HashMap<u64, DateTime<Utc>>>,
}

impl ScriptedChain {
	fn advance_to(&self, block: u64) {
		*self.head.lock().unwrap() = block;
	}

	fn record_transfer(&self, to: &str, block: u64, amount: Decimal) -> String {
		let mut hash_bytes = [0u8; 32];
		rand::rng().fill(&mut hash_bytes);
		let tx_hash = format!("0x{}", hex::encode(hash_bytes));
		self.timestamps.lock().unwrap().insert(block, Utc::now());
		self.events.lock().unwrap().push(TransferEvent {
			tx_hash: tx_hash.clone(),
			log_index: 0,
			block_number: block,
			from: "0x1111111111111111111111111111111111111111".to_string(),
			to: to.to_string(),
			amount,
		});
		tx_hash
	}
}

#[async_trait::async_trait]
impl ChainObserver for ScriptedChain {
	async fn get_latest_block(&self) -> Result<u64, ChainError> {
		Ok(*self.head.lock().unwrap())
	}

	async fn get_transfer_logs(
		&self,
		_token: &TokenInfo,
		to_address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<TransferEvent>, ChainError> {
		Ok(self
			.events
			.lock()
			.unwrap()
			.iter()
			.filter(|e| {
				e.to == to_address && e.block_number >= from_block && e.block_number <= to_block
			})
			.cloned()
			.collect())
	}

	async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, ChainError> {
		Ok(self
			.timestamps
			.lock()
			.unwrap()
			.get(&block_number)
			.copied()
			.unwrap_or_else(Utc::now))
	}
}

/// Swap provider double for the demo: every order fills on the first poll, with a
/// small haircut against the estimate.
#[derive(Default)]
struct InstantFillProvider {
	orders: Mutex<HashMap<String, Decimal>>,
}

#[async_trait::async_trait]
impl SwapProvider for InstantFillProvider {
	async fn submit_order(
		&self,
		from_asset: &str,
		to_asset: &str,
		usd_amount: Decimal,
		_slippage_bps: u32,
	) -> Result<String, SwapError> {
		let mut orders = self.orders.lock().unwrap();
		let handle = format!("order-{}-{}-{}", from_asset, to_asset, orders.len() + 1);
		orders.insert(handle.clone(), usd_amount);
		Ok(handle)
	}

	async fn get_order_status(&self, order_handle: &str) -> Result<OrderStatus, SwapError> {
		let amount = self
			.orders
			.lock()
			.unwrap()
			.get(order_handle)
			.copied()
			.ok_or_else(|| SwapError::Provider(format!("unknown order {}", order_handle)))?;
		// 0.1% fill haircut so estimated and actual amounts visibly differ.
		let actual = amount * Decimal::new(999, 3);
		Ok(OrderStatus {
			state: ProviderState::Completed,
			actual_output: Some(actual.round_dp(2)),
			settlement_tx_hash: Some(format!("0xsettled-{}", order_handle)),
			reason: None,
		})
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_file(false)
		.with_line_number(false)
		.init();

	info!("Starting portfolio engine demo");

	let mut config = EngineConfig::default();
	config.confirm_poll_interval = Duration::from_millis(500);
	config.swap_poll_interval = Duration::from_millis(500);
	let config = Arc::new(config);

	let ledger = Arc::new(InMemoryLedgerStore::new());
	let sessions = Arc::new(InMemorySessionStore::new());
	let chain = Arc::new(ScriptedChain::default());
	let scheduler = Arc::new(TokioScheduler::new());
	let provider = Arc::new(InstantFillProvider::default());
	let registry = Arc::new(AssetRegistry::default());

	let deposits = DepositService::new(
		ledger.clone(),
		sessions.clone(),
		chain.clone(),
		scheduler.clone(),
		config.clone(),
	);
	let coordinator = SwapCoordinator::new(
		ledger.clone(),
		provider.clone(),
		scheduler.clone(),
		config.clone(),
	);
	let rebalancer = RebalanceService::new(
		ledger.clone(),
		coordinator.clone(),
		registry.clone(),
		config.clone(),
	);

	let user_id = Uuid::new_v4();
	ledger.seed_portfolio(user_id, RiskProfile::Moderate.target_allocation());
	info!("Seeded empty moderate-profile portfolio for user {}", user_id);

	let deposit_address = "0x2222222222222222222222222222222222222222";
	chain.advance_to(1000);

	let created = match deposits
		.create(
			user_id,
			deposit_address.to_string(),
			"USDC",
			Some(Decimal::from(250)),
		)
		.await
	{
		Ok(created) => created,
		Err(e) => {
			error!("Failed to create deposit session: {}", e);
			return;
		}
	};
	info!(
		"Session {} open until {}, waiting for ~250 USDC at {}",
		created.session_id, created.expires_at, created.deposit_address
	);

	// The transfer lands one block later; confirmation depth is not met yet.
	let tx_hash = chain.record_transfer(deposit_address, 1001, Decimal::from(250));
	chain.advance_to(1001);
	info!("Transfer {} landed in block 1001", tx_hash);

	match deposits.confirm(created.session_id).await {
		Ok(ConfirmOutcome::AwaitingConfirmations {
			confirmations,
			required,
			..
		}) => info!("Transfer bound, {}/{} confirmations", confirmations, required),
		Ok(other) => info!("Unexpected early outcome: {:?}", other),
		Err(e) => error!("Confirmation check failed: {}", e),
	}

	// One more block gives the transfer the required depth. The manual check and the
	// recurring job race here; exactly one of them performs the credit.
	chain.advance_to(1002);
	match deposits.confirm(created.session_id).await {
		Ok(ConfirmOutcome::Confirmed {
			amount,
			confirmations,
			newly_credited,
			..
		}) => info!(
			"Session confirmed with {} confirmations: {} credited ({})",
			confirmations,
			format_usd(amount),
			if newly_credited {
				"by this check"
			} else {
				"by the recurring job"
			}
		),
		Ok(other) => info!("Confirmation still in progress: {:?}", other),
		Err(e) => error!("Confirmation check failed: {}", e),
	}
	tokio::time::sleep(Duration::from_secs(2)).await;

	let portfolio = match ledger.get_portfolio(user_id).await {
		Ok(portfolio) => portfolio,
		Err(e) => {
			error!("Failed to load portfolio: {}", e);
			return;
		}
	};
	info!(
		"Portfolio after credit: total {}",
		format_usd(portfolio.total_value_usd)
	);

	// Spread the fresh credit across the target allocation.
	match rebalancer.allocate_deposit(user_id).await {
		Ok(RebalanceOutcome::Submitted {
			group_id, swaps, ..
		}) => info!(
			"Deposit conversion group {} submitted with {} swaps",
			group_id,
			swaps.len()
		),
		Ok(RebalanceOutcome::NotNeeded { drift }) => {
			info!("No conversion needed (drift {}pp)", drift)
		}
		Err(e) => error!("Deposit conversion failed: {}", e),
	}

	// Let the polling jobs settle every swap.
	tokio::time::sleep(Duration::from_secs(2)).await;

	match ledger.get_portfolio(user_id).await {
		Ok(portfolio) => {
			info!(
				"Final portfolio: total {}",
				format_usd(portfolio.total_value_usd)
			);
			let balances = portfolio.balances_by_class();
			for class in AssetClass::ALL {
				let value = balances.get(&class).copied().unwrap_or_default();
				info!("  {}: {}", class, format_usd(value));
			}
		}
		Err(e) => error!("Failed to load portfolio: {}", e),
	}

	// A follow-up rebalance request should find the portfolio within tolerance.
	match rebalancer.rebalance_portfolio(user_id, false).await {
		Ok(RebalanceOutcome::NotNeeded { drift }) => {
			info!("Rebalance not needed (drift {}pp)", drift)
		}
		Ok(RebalanceOutcome::Submitted { group_id, .. }) => {
			info!("Residual rebalance submitted as group {}", group_id)
		}
		Err(e) => error!("Rebalance failed: {}", e),
	}

	info!("Demo completed");
}
