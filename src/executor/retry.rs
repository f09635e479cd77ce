//! Exponential backoff with full jitter (spec §4.4: "retries after
//! `base · factor^(attempt-1)` with full jitter, up to max-attempts"),
//! composed from the `backoff` crate the way the teacher's
//! `infrastructure::claude::retry` hand-rolls the same curve without it.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;

/// The undithered `base · factor^(attempt-1)` delay for a failed `attempt`
/// (1-indexed), advanced through the `backoff` crate's curve rather than
/// computed by hand.
fn undithered_delay(base_ms: u64, factor: f64, attempt: u32) -> Duration {
    let mut curve = ExponentialBackoff {
        current_interval: Duration::from_millis(base_ms),
        initial_interval: Duration::from_millis(base_ms),
        multiplier: factor,
        randomization_factor: 0.0,
        max_interval: Duration::from_secs(3600),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };

    let mut delay = Duration::from_millis(base_ms);
    for _ in 1..attempt {
        delay = curve.next_backoff().unwrap_or(delay);
    }
    delay
}

/// A uniform random delay in `[0, undithered_delay]` (AWS-style "full
/// jitter"), as opposed to `backoff`'s own additive jitter.
pub(crate) fn full_jitter_delay(base_ms: u64, factor: f64, attempt: u32) -> Duration {
    let ceiling = undithered_delay(base_ms, factor, attempt);
    if ceiling.is_zero() {
        return ceiling;
    }
    let fraction: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(ceiling.as_secs_f64() * fraction)
}
