//! Timing jitter for sensitive operations
//!
//! A fixed delay would itself become a fingerprint, so the jitter is a
//! bounded random variable drawn fresh for every call.

use rand::Rng;
use std::time::Duration;

/// lower jitter bound in microseconds
pub const JITTER_MIN_MICROS: u64 = 50;

/// upper jitter bound in microseconds
pub const JITTER_MAX_MICROS: u64 = 2_000;

/// sleep for a bounded random interval
///
/// with `randomize` false only a scheduler yield is performed, for
/// callers that want the ordering perturbation without the delay.
pub fn jitter(randomize: bool) {
    if randomize {
        let micros = rand::thread_rng().gen_range(JITTER_MIN_MICROS..=JITTER_MAX_MICROS);
        std::thread::sleep(Duration::from_micros(micros));
    } else {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn jitter_is_bounded() {
        let start = Instant::now();
        for _ in 0..10 {
            jitter(true);
        }
        // 10 sleeps of at most 2ms each; generous slack for slow CI
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn non_randomized_jitter_returns_quickly() {
        let start = Instant::now();
        for _ in 0..100 {
            jitter(false);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
