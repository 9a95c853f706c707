//! Formatting helpers for log output.

/// Decimal places of the fee-paying assets shown by the daemon.
pub const DEFAULT_ASSET_DECIMALS: u32 = 18;

/// Renders a base-unit amount with `decimals` fractional digits, without the
/// rounding a float conversion would introduce.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
	if decimals == 0 {
		return amount.to_string();
	}
	let Some(scale) = 10u128.checked_pow(decimals) else {
		return format!("0.{:0>width$}", amount, width = decimals as usize);
	};
	format!(
		"{}.{:0>width$}",
		amount / scale,
		amount % scale,
		width = decimals as usize
	)
}
