//! Scenario S5 (spec.md §8): a tick under bad signals (error rate above
//! threshold) halves the rate; recovery ticks under good signals increase
//! it additively by one step per tick.

use outbox_throttle_core::{Breaker, BreakerConfig, Controller, ControllerConfig, Pacer, Window};
use std::time::Duration;

#[test]
fn bad_signals_halve_then_good_signals_ramp_additively() {
    let config = ControllerConfig {
        initial_rate: 20,
        min_rate: 1,
        max_rate: 100,
        additive_step: 1,
        multiplicative_factor: 0.5,
        error_threshold: 0.05,
        latency_threshold_ms: 400,
        ..ControllerConfig::default()
    };
    let controller = Controller::new(config);
    let window = Window::new(Duration::from_secs(30));
    let breaker = Breaker::new(BreakerConfig::default());
    let pacer = Pacer::new(config.initial_rate);

    for _ in 0..9 {
        window.record(10, true);
    }
    window.record(10, false);
    assert_eq!(window.error_rate(), 0.1);

    let new_rate = controller.tick(&window, &breaker, &pacer);
    assert_eq!(new_rate, 10, "rate should halve under a 10% error rate");

    // Recovery: a full window of all-success ticks should ramp additively.
    let window = Window::new(Duration::from_secs(30));
    let mut rate = controller.current_rate();
    for _ in 0..5 {
        window.record(10, true);
        let next = controller.tick(&window, &breaker, &pacer);
        assert_eq!(next, rate + 1);
        rate = next;
    }
}
