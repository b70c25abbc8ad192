//! Scenario S6 (spec.md §8): decorrelated jitter delays stay within
//! `[base_delay, cap]` across a large sample and are not degenerate
//! constants. The per-sample bounds are already covered at the unit level
//! (`retry::tests::decorrelated_jitter_stays_in_bounds`); this exercises
//! the same property through the public `next_delay` entry point with the
//! scenario's own parameters.

use outbox_throttle_core::{JitterType, RetryConfig};
use std::time::Duration;

#[test]
fn ten_thousand_samples_stay_within_bounds_and_vary() {
    let config = RetryConfig {
        retry_max: 8,
        backoff_cap_seconds: 3,
        base_delay_ms: 100,
        jitter_ms: 1000,
        jitter_type: JitterType::Decorrelated,
    };

    let mut min_seen = Duration::from_secs(3);
    let mut max_seen = Duration::from_millis(100);
    let mut distinct = std::collections::HashSet::new();

    for _ in 0..10_000 {
        let delay = outbox_throttle_core::retry::next_delay(&config, 5, None);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_secs(3));
        min_seen = min_seen.min(delay);
        max_seen = max_seen.max(delay);
        distinct.insert(delay.as_millis());
    }

    assert!(distinct.len() > 1, "decorrelated jitter must not be a degenerate constant");
}
