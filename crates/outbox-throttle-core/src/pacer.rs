//! Token-bucket pacer (spec.md §4.1).
//!
//! Shapes emission to at most `rate` tokens/sec, with burst capacity equal
//! to `rate` (the bucket holds at most one second's worth of tokens). Rate
//! changes take effect immediately for future refills; already-accumulated
//! tokens carry over, clamped to the new capacity.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::gauge;

/// Poll interval used by `acquire` while waiting for a token to refill.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Bucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate: u32) -> Self {
        let rate = rate.max(1) as f64;
        Self {
            capacity: rate,
            rate,
            tokens: rate,
            last_refill: Instant::now(),
        }
    }

    /// Refills tokens based on elapsed time, clamping clock skew to zero.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn set_rate(&mut self, rate: u32) {
        let rate = rate.max(1) as f64;
        self.refill(Instant::now());
        self.rate = rate;
        self.capacity = rate;
        self.tokens = self.tokens.min(self.capacity).max(0.0);
    }

    fn available(&mut self) -> u32 {
        self.refill(Instant::now());
        self.tokens.floor() as u32
    }
}

/// A thread-safe token-bucket pacer shared across all dispatcher workers.
///
/// `acquire` cooperatively blocks (via a short polling sleep, per spec.md
/// §9 "Cooperative sleep") until a token is available. `rate` must never be
/// zero; `set_rate` clamps any input below 1 up to 1.
pub struct Pacer {
    bucket: Mutex<Bucket>,
    #[cfg(feature = "metrics")]
    name: String,
}

impl Pacer {
    pub fn new(initial_rate: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket::new(initial_rate)),
            #[cfg(feature = "metrics")]
            name: "default".to_string(),
        }
    }

    /// Blocks until exactly one token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let acquired = {
                let mut bucket = self.bucket.lock().unwrap();
                bucket.try_take()
            };
            if acquired {
                return;
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Non-blocking attempt to acquire one token.
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().unwrap().try_take()
    }

    /// Atomically resets `rate` and `capacity`; `tokens` is clamped.
    pub fn set_rate(&self, rate: u32) {
        self.bucket.lock().unwrap().set_rate(rate);

        #[cfg(feature = "metrics")]
        gauge!("outbox_throttle_pacer_rate", "pacer" => self.name.clone()).set(rate.max(1) as f64);
    }

    /// Current configured rate (tokens added per second).
    pub fn rate(&self) -> u32 {
        self.bucket.lock().unwrap().rate as u32
    }

    /// Current integer token count after a lazy refill.
    pub fn available_tokens(&self) -> u32 {
        self.bucket.lock().unwrap().available()
    }
}
