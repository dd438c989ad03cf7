//! Token-bucket rate limiting for model-provider calls.
//!
//! Each provider name maps to one process-wide [`TokenBucket`]. A bucket
//! holds up to `burst` tokens and refills at `requests_per_second`; every
//! outbound request takes one token. Waiting for a token is a suspension
//! point; a cancelled turn drops the wait along with the provider call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A refilling token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket of `burst` tokens refilling at `requests_per_second`.
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate: requests_per_second.max(f64::MIN_POSITIVE),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    /// Take a token if one is available, otherwise report how long until
    /// the next one.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.rate))
        }
    }

    /// Wait for a token. Dropping the future (a cancelled turn racing it
    /// in `select!`) abandons the wait without taking a token.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_take() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

static LIMITERS: OnceLock<Mutex<HashMap<String, Arc<TokenBucket>>>> = OnceLock::new();

/// The process-wide bucket for `provider`, created from `config` on first use.
pub fn limiter_for(provider: &str, config: &RateLimitConfig) -> Result<Arc<TokenBucket>> {
    let registry = LIMITERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut limiters = registry
        .lock()
        .map_err(|_| anyhow!("rate limiter registry poisoned"))?;
    Ok(limiters
        .entry(provider.to_string())
        .or_insert_with(|| Arc::new(TokenBucket::from_config(config)))
        .clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::error::GenerateError;
    use crate::retriever::cancellable;

    #[test]
    fn test_burst_then_empty() {
        let bucket = TokenBucket::new(0.001, 3);
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_err());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(200.0, 1);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_acquire_is_cancellable() {
        let bucket = TokenBucket::new(0.001, 1);
        assert!(bucket.try_take().is_ok());
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let result = cancellable(&cancel, async {
            bucket.acquire().await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(GenerateError::Cancelled)));
    }

    #[test]
    fn test_limiter_registry_shares_buckets() {
        let config = RateLimitConfig::default();
        let a = limiter_for("registry-test", &config).unwrap();
        let b = limiter_for("registry-test", &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
