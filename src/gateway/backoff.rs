//! Exponential backoff with jitter, capped, for the [`Reconnector`](super::reconnector::Reconnector).

use std::time::Duration;

use rand::Rng;

/// Base delay for attempt 0.
pub const BASE: Duration = Duration::from_secs(1);
/// Delay never exceeds this, before jitter is added.
pub const MAX: Duration = Duration::from_secs(60);
/// Fraction of the capped exponential delay added as uniform jitter.
pub const JITTER: f64 = 0.5;
/// Attempt at which the exponential term saturates `MAX` even before jitter.
const MAX_EXPONENT: u32 = 6;

/// Computes `delay(attempt) = min(BASE * 2^min(attempt, 6), MAX) + U(0, JITTER * that)`.
///
/// Jitter is drawn from the thread-local CSPRNG-backed `rand` generator, so
/// concurrent callers at the same attempt do not share a value.
#[must_use]
pub fn delay(attempt: u32) -> Duration {
    let exponent = attempt.min(MAX_EXPONENT);
    let exponential = BASE.saturating_mul(1u32 << exponent);
    let capped = exponential.min(MAX);

    let jitter_span = capped.mul_f64(JITTER);
    let jitter = rand::thread_rng().gen_range(0.0..=1.0);
    capped + jitter_span.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_base_and_capped_jitter_bounds() {
        for attempt in 0..20 {
            let d = delay(attempt);
            assert!(d >= BASE, "attempt {attempt} delay {d:?} below BASE");
            let max_with_jitter = MAX.mul_f64(1.0 + JITTER);
            assert!(
                d <= max_with_jitter,
                "attempt {attempt} delay {d:?} above {max_with_jitter:?}"
            );
        }
    }

    #[test]
    fn delay_saturates_at_max_for_high_attempts() {
        for attempt in 6..12 {
            let d = delay(attempt);
            assert!(d >= MAX, "attempt {attempt} delay {d:?} should be >= MAX");
        }
    }

    #[test]
    fn delay_is_not_deterministic_across_samples() {
        let samples: std::collections::HashSet<Duration> =
            (0..100).map(|_| delay(2)).collect();
        assert!(
            samples.len() >= 5,
            "expected jitter variety, got {} distinct values",
            samples.len()
        );
    }
}
