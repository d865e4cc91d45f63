//! Exponential backoff delay calculation for the retry engine.

use std::time::Duration;

/// Raw (pre-jitter) delay for 1-indexed retry number `n`:
/// `initial_delay * backoff_multiplier^(n - 1)`, saturating instead of
/// overflowing for large `n` or large multipliers.
pub fn raw_delay(initial_delay: Duration, backoff_multiplier: f64, n: usize) -> Duration {
    let exponent = n.saturating_sub(1) as i32;
    let factor = backoff_multiplier.powi(exponent);
    let millis = initial_delay.as_millis() as f64 * factor;

    if !millis.is_finite() || millis < 0.0 {
        return Duration::from_millis(u64::MAX);
    }
    Duration::from_millis(millis.min(u64::MAX as f64) as u64)
}
