//! Engine configuration.

use rust_decimal::Decimal;
use std::time::Duration;

/// Metadata for the token a deposit session can watch for.
#[derive(Debug, Clone)]
pub struct TokenInfo {
	/// Ticker symbol, e.g. "USDC".
	pub symbol: String,
	/// ERC-20 contract address (0x-prefixed hex).
	pub address: String,
	/// On-chain decimals used to scale raw transfer amounts.
	pub decimals: u32,
}

/// Configuration for the coordination engine.
///
/// Thresholds and intervals that govern deposit matching, confirmation depth, rebalance
/// decisioning and job retry budgets. `Default` mirrors production values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Chain identifier recorded in processed-event markers.
	pub chain: String,
	/// The single token deposits are currently accepted in.
	pub supported_token: TokenInfo,
	/// Blocks mined on top of (inclusive of) a transfer before it is credited.
	pub required_confirmations: u64,
	/// Wall-clock lifetime of a deposit session.
	pub session_ttl: Duration,
	/// Half-width of the acceptable amount band around an expected amount, in percent.
	pub amount_band_pct: Decimal,
	/// Amount floor applied when no expected amount was given.
	pub min_open_amount: Decimal,
	/// Drift (sum of absolute percentage-point differences) above which a rebalance runs.
	pub drift_threshold_pct: Decimal,
	/// Deltas and instructions below this USD value are ignored as dust.
	pub dust_threshold_usd: Decimal,
	/// Base interval between deposit confirmation checks.
	pub confirm_poll_interval: Duration,
	/// Attempt budget for a deposit confirmation job.
	pub confirm_max_attempts: u32,
	/// Base interval between swap status polls.
	pub swap_poll_interval: Duration,
	/// Attempt budget for a swap status poll job.
	pub swap_max_attempts: u32,
	/// Slippage tolerance passed to the swap provider, in basis points.
	pub default_slippage_bps: u32,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			chain: "celo".to_string(),
			supported_token: TokenInfo {
				symbol: "USDC".to_string(),
				address: "0xceba9300f2b948710d2653dd7b07f33a8b32118c".to_string(),
				decimals: 6,
			},
			required_confirmations: 2,
			session_ttl: Duration::from_secs(60 * 60),
			amount_band_pct: Decimal::new(5, 0),
			min_open_amount: Decimal::new(1, 1),
			drift_threshold_pct: Decimal::new(5, 0),
			dust_threshold_usd: Decimal::ONE,
			confirm_poll_interval: Duration::from_secs(30),
			confirm_max_attempts: 120,
			swap_poll_interval: Duration::from_secs(10),
			swap_max_attempts: 90,
			default_slippage_bps: 50,
		}
	}
}
