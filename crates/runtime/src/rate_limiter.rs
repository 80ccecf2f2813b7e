//! Token bucket rate limiter shared by all workers of an engine.
//!
//! Allows `rate` acquisitions per second with bursts of up to `capacity`.
//! Refill is computed lazily on every call from the elapsed time since the
//! previous call, under a single lock.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ConfigError;

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained tokens per second.
    pub rate_per_sec: f64,
    /// Bucket capacity (maximum burst).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 10.0,
            burst: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rate_per_sec.is_finite() && self.rate_per_sec > 0.0) {
            return Err(ConfigError::new(
                "rate_per_sec",
                "must be a finite positive number",
            ));
        }
        if self.burst == 0 {
            return Err(ConfigError::new("burst", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    /// May go negative: a `wait` reserves its token before sleeping.
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = f64::from(config.burst);
        Ok(Self {
            rate: config.rate_per_sec,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Wait until a token is available and consume it.
    ///
    /// The token is reserved up front and the caller sleeps for exactly the
    /// deficit, so concurrent waiters are admitted in call order. Dropping the
    /// future mid-sleep forfeits the reserved token.
    pub async fn wait(&self) {
        let delay = {
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket);
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                None
            } else {
                let deficit = -bucket.tokens / self.rate;
                Some(Duration::try_from_secs_f64(deficit).unwrap_or(Duration::MAX))
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (never negative).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens.max(0.0)
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
