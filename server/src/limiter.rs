//! Token-bucket rate limiting for inbound frames.

use std::time::Instant;

/// Allows `rate` frames per `per` seconds, with bursts up to `rate`.
///
/// Each connection owns two of these: one for position updates and one for
/// everything else. A limiter built with `enabled == false` accepts every
/// frame, so callers never need to branch on configuration themselves.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    per: f64,
    allowance: f64,
    last_check: Instant,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(rate: f64, per: f64, enabled: bool) -> Self {
        Self {
            rate,
            per,
            allowance: rate,
            last_check: Instant::now(),
            enabled,
        }
    }

    /// Charges one frame against the bucket and reports whether it is
    /// within budget. A rejected frame is not charged, so the refill
    /// clock keeps running while a client is over the limit.
    pub fn check(&mut self) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_check).as_secs_f64();
        self.last_check = now;
        self.allowance += elapsed * (self.rate / self.per);
        if self.allowance > self.rate {
            self.allowance = self.rate;
        }
        if self.allowance < 1.0 {
            false
        } else {
            self.allowance -= 1.0;
            true
        }
    }
}
