//! Pure rebalance computation.
//!
//! Maps (current allocation, target allocation, balances) to the swap instructions that
//! bring the portfolio back to target. Matching is greedy largest-first: deterministic
//! and explainable, intentionally not globally optimal (it does not net opposing flows
//! to minimize swap count).

use crate::assets::{AssetClass, AssetRegistry};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Percent-per-class allocation map.
pub type Allocation = HashMap<AssetClass, Decimal>;

/// One class-to-class swap to execute, denominated in USD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapInstruction {
	pub from_class: AssetClass,
	pub to_class: AssetClass,
	/// Primary asset of the source class.
	pub from_asset: String,
	/// Primary asset of the destination class.
	pub to_asset: String,
	pub usd_amount: Decimal,
}

/// A computed rebalance decision.
#[derive(Debug, Clone)]
pub struct RebalancePlan {
	pub needs_rebalance: bool,
	/// Sum of absolute percentage-point differences across all classes.
	pub drift: Decimal,
	pub swaps: Vec<SwapInstruction>,
	pub total_swap_value: Decimal,
}

/// Sum of absolute percentage-point differences between current and target allocation.
pub fn drift(current: &Allocation, target: &Allocation) -> Decimal {
	AssetClass::ALL
		.iter()
		.map(|class| {
			let current_pct = current.get(class).copied().unwrap_or_default();
			let target_pct = target.get(class).copied().unwrap_or_default();
			(current_pct - target_pct).abs()
		})
		.sum()
}

/// Whether drift exceeds the rebalance threshold. Drift is the sole trigger signal;
/// there is no per-class threshold.
pub fn needs_rebalance(current: &Allocation, target: &Allocation, threshold_pct: Decimal) -> bool {
	drift(current, target) > threshold_pct
}

/// Compute the swap instructions that move a portfolio from its current allocation
/// toward the target.
///
/// Per-class USD deltas within ±`dust_threshold` are ignored entirely. Over-allocated
/// classes are consumed largest-first into under-allocated classes largest-first; when
/// a source's held balance cannot cover the required amount, the swap is clamped to the
/// available balance (floored to cents) and that source allocates nothing further.
pub fn calculate_required_swaps(
	current: &Allocation,
	target: &Allocation,
	total_value_usd: Decimal,
	balances: &HashMap<AssetClass, Decimal>,
	registry: &AssetRegistry,
	dust_threshold: Decimal,
) -> Vec<SwapInstruction> {
	let mut sources: Vec<(AssetClass, Decimal)> = Vec::new();
	let mut sinks: Vec<(AssetClass, Decimal)> = Vec::new();

	for class in AssetClass::ALL {
		let current_pct = current.get(&class).copied().unwrap_or_default();
		let target_pct = target.get(&class).copied().unwrap_or_default();
		let delta = (target_pct - current_pct) / Decimal::from(100) * total_value_usd;
		if delta > dust_threshold {
			sinks.push((class, delta));
		} else if delta < -dust_threshold {
			sources.push((class, -delta));
		}
	}

	// Largest first; ties break on class order to stay deterministic.
	sources.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
	sinks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

	let mut instructions = Vec::new();
	for (source_class, mut excess) in sources {
		let mut available = balances.get(&source_class).copied().unwrap_or_default();

		for (sink_class, deficit) in sinks.iter_mut() {
			if excess <= Decimal::ZERO {
				break;
			}
			if *deficit < dust_threshold {
				continue;
			}

			let mut amount = excess.min(*deficit);
			let balance_exhausted = available < amount;
			if balance_exhausted {
				amount = available.round_dp_with_strategy(2, RoundingStrategy::ToZero);
			}

			if amount >= dust_threshold {
				instructions.push(SwapInstruction {
					from_class: source_class,
					to_class: *sink_class,
					from_asset: registry.primary_asset_for_class(source_class).to_string(),
					to_asset: registry.primary_asset_for_class(*sink_class).to_string(),
					usd_amount: amount,
				});
				*deficit -= amount;
				excess -= amount;
				available -= amount;
			}

			if balance_exhausted {
				break;
			}
		}
	}

	instructions
}

/// Compose the drift check and the swap computation. When drift does not exceed the
/// threshold, the swap list is empty regardless of balances.
pub fn calculate_rebalance(
	current: &Allocation,
	target: &Allocation,
	total_value_usd: Decimal,
	balances: &HashMap<AssetClass, Decimal>,
	registry: &AssetRegistry,
	threshold_pct: Decimal,
	dust_threshold: Decimal,
) -> RebalancePlan {
	let drift = drift(current, target);
	let needs_rebalance = drift > threshold_pct;
	let swaps = if needs_rebalance {
		calculate_required_swaps(
			current,
			target,
			total_value_usd,
			balances,
			registry,
			dust_threshold,
		)
	} else {
		Vec::new()
	};
	let total_swap_value = swaps.iter().map(|s| s.usd_amount).sum();

	RebalancePlan {
		needs_rebalance,
		drift,
		swaps,
		total_swap_value,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	fn threshold() -> Decimal {
		dec!(5)
	}

	fn allocation(entries: &[(AssetClass, Decimal)]) -> Allocation {
		entries.iter().copied().collect()
	}

	fn swaps_for(
		current: &Allocation,
		target: &Allocation,
		total: Decimal,
		balances: &HashMap<AssetClass, Decimal>,
	) -> Vec<SwapInstruction> {
		calculate_required_swaps(
			current,
			target,
			total,
			balances,
			&AssetRegistry::default(),
			Decimal::ONE,
		)
	}

	#[test]
	fn no_drift_means_no_rebalance() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		assert_eq!(drift(&current, &current), dec!(0));
		assert!(!needs_rebalance(&current, &current, threshold()));
	}

	#[test]
	fn drift_sums_absolute_differences_across_classes() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(60)),
			(AssetClass::Gold, dec!(40)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		assert_eq!(drift(&current, &target), dec!(20));
		assert!(needs_rebalance(&current, &target, threshold()));
	}

	#[test]
	fn drift_at_the_threshold_does_not_trigger() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(52.5)),
			(AssetClass::Gold, dec!(47.5)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		assert_eq!(drift(&current, &target), dec!(5));
		assert!(!needs_rebalance(&current, &target, threshold()));
	}

	#[test]
	fn deltas_within_a_dollar_are_dust() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(50.5)),
			(AssetClass::Gold, dec!(49.5)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		// 0.5% of $100 is $0.50 per class: below the $1 actionability floor.
		let balances = [(AssetClass::StableYield, dec!(50.5))].into_iter().collect();
		let swaps = swaps_for(&current, &target, dec!(100), &balances);
		assert!(swaps.is_empty());
	}

	#[test]
	fn greedy_matching_pairs_largest_sources_with_largest_sinks() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(60)),
			(AssetClass::Gold, dec!(40)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(40)),
			(AssetClass::Gold, dec!(20)),
			(AssetClass::DefiYield, dec!(25)),
			(AssetClass::Crypto, dec!(15)),
		]);
		let balances = [
			(AssetClass::StableYield, dec!(600)),
			(AssetClass::Gold, dec!(400)),
		]
		.into_iter()
		.collect();

		let swaps = swaps_for(&current, &target, dec!(1000), &balances);
		assert_eq!(
			swaps
				.iter()
				.map(|s| (s.from_class, s.to_class, s.usd_amount))
				.collect::<Vec<_>>(),
			vec![
				(AssetClass::StableYield, AssetClass::DefiYield, dec!(200)),
				(AssetClass::Gold, AssetClass::DefiYield, dec!(50)),
				(AssetClass::Gold, AssetClass::Crypto, dec!(150)),
			]
		);
		assert_eq!(swaps[0].from_asset, "USDC");
		assert_eq!(swaps[0].to_asset, "SDAI");
	}

	#[test]
	fn swap_amount_is_clamped_to_the_held_balance() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(100)),
			(AssetClass::Gold, dec!(0)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		// Allocation says move $50, but only $30 is actually held.
		let balances = [(AssetClass::StableYield, dec!(30))].into_iter().collect();

		let swaps = swaps_for(&current, &target, dec!(100), &balances);
		assert_eq!(swaps.len(), 1);
		assert_eq!(swaps[0].usd_amount, dec!(30));
	}

	#[test]
	fn clamped_amounts_are_floored_to_cents() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(100)),
			(AssetClass::Gold, dec!(0)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		let balances = [(AssetClass::StableYield, dec!(12.349))].into_iter().collect();

		let swaps = swaps_for(&current, &target, dec!(100), &balances);
		assert_eq!(swaps.len(), 1);
		assert_eq!(swaps[0].usd_amount, dec!(12.34));
	}

	#[test]
	fn an_exhausted_source_does_not_spill_into_later_sinks() {
		let current = allocation(&[(AssetClass::StableYield, dec!(100))]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(20)),
			(AssetClass::Gold, dec!(50)),
			(AssetClass::Crypto, dec!(30)),
		]);
		// Balance covers only part of the first (largest) sink.
		let balances = [(AssetClass::StableYield, dec!(40))].into_iter().collect();

		let swaps = swaps_for(&current, &target, dec!(100), &balances);
		assert_eq!(swaps.len(), 1);
		assert_eq!(swaps[0].to_class, AssetClass::Gold);
		assert_eq!(swaps[0].usd_amount, dec!(40));
	}

	#[test]
	fn sub_dollar_instructions_are_filtered_and_one_dollar_survives() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(100)),
			(AssetClass::Gold, dec!(0)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);

		// Clamp produces $0.99: dropped, nothing to execute.
		let balances = [(AssetClass::StableYield, dec!(0.998))].into_iter().collect();
		assert!(swaps_for(&current, &target, dec!(100), &balances).is_empty());

		// Clamp produces exactly $1.00: kept.
		let balances = [(AssetClass::StableYield, dec!(1.004))].into_iter().collect();
		let swaps = swaps_for(&current, &target, dec!(100), &balances);
		assert_eq!(swaps.len(), 1);
		assert_eq!(swaps[0].usd_amount, dec!(1.00));
	}

	#[test]
	fn below_threshold_plan_has_no_swaps_regardless_of_balances() {
		let current = allocation(&[
			(AssetClass::StableYield, dec!(52)),
			(AssetClass::Gold, dec!(48)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(50)),
			(AssetClass::Gold, dec!(50)),
		]);
		let balances = [(AssetClass::StableYield, dec!(5200))].into_iter().collect();

		let plan = calculate_rebalance(
			&current,
			&target,
			dec!(10000),
			&balances,
			&AssetRegistry::default(),
			threshold(),
			Decimal::ONE,
		);
		assert!(!plan.needs_rebalance);
		assert_eq!(plan.drift, dec!(4));
		assert!(plan.swaps.is_empty());
		assert_eq!(plan.total_swap_value, dec!(0));
	}

	#[test]
	fn executing_the_plan_converges_to_the_target_allocation() {
		let total = dec!(1000);
		let current = allocation(&[
			(AssetClass::StableYield, dec!(60)),
			(AssetClass::Gold, dec!(40)),
		]);
		let target = allocation(&[
			(AssetClass::StableYield, dec!(40)),
			(AssetClass::Gold, dec!(20)),
			(AssetClass::DefiYield, dec!(25)),
			(AssetClass::Crypto, dec!(15)),
		]);
		let mut balances: HashMap<AssetClass, Decimal> = [
			(AssetClass::StableYield, dec!(600)),
			(AssetClass::Gold, dec!(400)),
		]
		.into_iter()
		.collect();

		let plan = calculate_rebalance(
			&current,
			&target,
			total,
			&balances,
			&AssetRegistry::default(),
			threshold(),
			Decimal::ONE,
		);
		assert!(plan.needs_rebalance);

		// Simulate execution at par and recompute the allocation.
		for swap in &plan.swaps {
			*balances.entry(swap.from_class).or_default() -= swap.usd_amount;
			*balances.entry(swap.to_class).or_default() += swap.usd_amount;
		}
		let after: Allocation = balances
			.iter()
			.map(|(class, value)| (*class, value / total * dec!(100)))
			.collect();

		assert!(drift(&after, &target) < dec!(0.5));
	}
}
