// src/limiter.rs

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Token-bucket gate shared by every transfer in a queue, bounding their
/// aggregate throughput. A rate of 0 disables throttling entirely.
#[derive(Debug, Clone)]
pub struct SpeedLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    /// Bytes per second; 0 means unlimited.
    rate: u64,
    /// Burst size: one second's worth of tokens.
    capacity: u64,
    tokens: u64,
    last_refill: Instant,
}

impl SpeedLimiter {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(Bucket::new(rate_bytes_per_sec))),
        }
    }

    /// Changes the speed limit at runtime. 0 means unlimited.
    pub async fn set_rate(&self, rate_bytes_per_sec: u64) {
        *self.bucket.lock().await = Bucket::new(rate_bytes_per_sec);
    }

    pub async fn rate(&self) -> u64 {
        self.bucket.lock().await.rate
    }

    /// Takes `amount` tokens, waiting for the bucket to refill when it runs
    /// dry. Requests larger than the burst size are charged one burst.
    pub async fn acquire(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.rate == 0 {
                    return;
                }
                bucket.refill();
                let need = amount.min(bucket.capacity);
                if bucket.tokens >= need {
                    bucket.tokens -= need;
                    return;
                }
                let missing = need - bucket.tokens;
                Duration::from_secs_f64(missing as f64 / bucket.rate as f64)
            };
            // The lock must not be held across the sleep.
            tokio::time::sleep(wait).await;
        }
    }
}

impl Bucket {
    fn new(rate: u64) -> Self {
        let capacity = if rate == 0 { u64::MAX } else { rate };
        Self {
            rate,
            capacity,
            // Start full so short transfers are not penalized.
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let minted = (elapsed.as_secs_f64() * self.rate as f64) as u64;
        if minted > 0 {
            self.tokens = (self.tokens + minted).min(self.capacity);
            self.last_refill = now;
        }
    }
}
