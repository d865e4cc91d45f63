//! Jitter applied to retry backoff delays to prevent thundering herd.
//!
//! `apply` draws `raw * (0.5 + U[0,1))`, putting the jittered delay in
//! `[raw/2, raw)`.

use rand::Rng;
use std::time::Duration;

/// Apply the standard jitter window using the thread-local RNG.
pub fn apply(raw: Duration) -> Duration {
    apply_with_rng(raw, &mut rand::thread_rng())
}

/// Apply the jitter window with a caller-supplied RNG, for deterministic tests.
pub fn apply_with_rng<R: Rng>(raw: Duration, rng: &mut R) -> Duration {
    let factor = 0.5 + 0.5 * rng.gen::<f64>();
    let millis = raw.as_millis() as f64 * factor;
    Duration::from_millis(millis.round() as u64)
}
