//! Asset classes, risk-profile allocation presets and the class-to-asset registry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The asset classes a portfolio allocates across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
	/// Cash-like stablecoin balance, also the landing class for deposits.
	StableYield,
	/// Tokenized gold.
	Gold,
	/// Yield-bearing DeFi positions.
	DefiYield,
	/// Large-cap crypto.
	Crypto,
}

impl AssetClass {
	/// All classes in a stable, deterministic order.
	pub const ALL: [AssetClass; 4] = [
		AssetClass::StableYield,
		AssetClass::Gold,
		AssetClass::DefiYield,
		AssetClass::Crypto,
	];

	/// Stable string key for logs and storage.
	pub fn key(&self) -> &'static str {
		match self {
			AssetClass::StableYield => "stable_yield",
			AssetClass::Gold => "gold",
			AssetClass::DefiYield => "defi_yield",
			AssetClass::Crypto => "crypto",
		}
	}
}

impl fmt::Display for AssetClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.key())
	}
}

/// Risk profiles with preset target allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
	Conservative,
	Moderate,
	Aggressive,
}

impl RiskProfile {
	/// Target allocation for this profile, in percent per class. Sums to 100.
	pub fn target_allocation(&self) -> HashMap<AssetClass, Decimal> {
		let weights: [(AssetClass, i64); 4] = match self {
			RiskProfile::Conservative => [
				(AssetClass::StableYield, 60),
				(AssetClass::Gold, 20),
				(AssetClass::DefiYield, 15),
				(AssetClass::Crypto, 5),
			],
			RiskProfile::Moderate => [
				(AssetClass::StableYield, 40),
				(AssetClass::Gold, 20),
				(AssetClass::DefiYield, 25),
				(AssetClass::Crypto, 15),
			],
			RiskProfile::Aggressive => [
				(AssetClass::StableYield, 20),
				(AssetClass::Gold, 10),
				(AssetClass::DefiYield, 30),
				(AssetClass::Crypto, 40),
			],
		};
		weights
			.into_iter()
			.map(|(class, pct)| (class, Decimal::from(pct)))
			.collect()
	}
}

/// Maps each asset class to the concrete asset swaps are executed in.
#[derive(Debug, Clone)]
pub struct AssetRegistry {
	primary: HashMap<AssetClass, String>,
}

impl AssetRegistry {
	pub fn new(primary: HashMap<AssetClass, String>) -> Self {
		Self { primary }
	}

	/// The primary asset symbol for a class.
	pub fn primary_asset_for_class(&self, class: AssetClass) -> &str {
		self.primary
			.get(&class)
			.map(String::as_str)
			.unwrap_or_else(|| match class {
				AssetClass::StableYield => "USDC",
				AssetClass::Gold => "PAXG",
				AssetClass::DefiYield => "SDAI",
				AssetClass::Crypto => "WBTC",
			})
	}
}

impl Default for AssetRegistry {
	fn default() -> Self {
		let primary = [
			(AssetClass::StableYield, "USDC"),
			(AssetClass::Gold, "PAXG"),
			(AssetClass::DefiYield, "SDAI"),
			(AssetClass::Crypto, "WBTC"),
		]
		.into_iter()
		.map(|(class, symbol)| (class, symbol.to_string()))
		.collect();
		Self { primary }
	}
}
