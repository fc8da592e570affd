use rust_decimal::Decimal;

/// Format a USD amount for log output, always with two decimal places.
pub fn format_usd(amount: Decimal) -> String {
	format!("${:.2}", amount)
}
