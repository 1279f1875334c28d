//! Token bucket rate limiter for outgoing API calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
struct Bucket {
  tokens: f64,
  last_refill: Instant,
}

/// Token bucket gate shared by every request a client makes.
///
/// The bucket holds at most `capacity` tokens and refills continuously at
/// `capacity / period`. Each request consumes one token; when the bucket is
/// empty the caller sleeps until one token's worth of time has passed.
#[derive(Debug)]
pub struct RateLimiter {
  capacity: u32,
  period: Duration,
  bucket: Mutex<Bucket>,
}

impl RateLimiter {
  /// Create a limiter allowing `capacity` requests per `period`, starting full.
  pub fn new(capacity: u32, period: Duration) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      period,
      bucket: Mutex::new(Bucket {
        tokens: f64::from(capacity),
        last_refill: Instant::now(),
      }),
    }
  }

  pub fn capacity(&self) -> u32 {
    self.capacity
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  /// Wait until a token is available and consume it.
  ///
  /// Callers queue on a single lock that is held for the whole
  /// refill-check-consume sequence, including any wait, so no two callers
  /// ever observe the same token count.
  pub async fn acquire(&self) {
    let mut bucket = self.bucket.lock().await;
    self.refill(&mut bucket, Instant::now());

    if bucket.tokens < 1.0 {
      let per_token = self.period.as_secs_f64() / f64::from(self.capacity);
      let wait = Duration::from_secs_f64((1.0 - bucket.tokens) * per_token);
      warn!(wait_seconds = wait.as_secs_f64(), "Rate limit reached, waiting for a token");

      tokio::time::sleep(wait).await;

      // The token that accrued during the wait is consumed by this caller.
      bucket.tokens = 0.0;
      bucket.last_refill = Instant::now();
    } else {
      bucket.tokens -= 1.0;
      debug!(remaining = bucket.tokens, "Rate limiter token acquired");
    }
  }

  /// Current token count after applying the refill owed up to now.
  pub async fn available_tokens(&self) -> f64 {
    let mut bucket = self.bucket.lock().await;
    self.refill(&mut bucket, Instant::now());
    bucket.tokens
  }

  fn refill(&self, bucket: &mut Bucket, now: Instant) {
    if self.period.is_zero() {
      bucket.tokens = f64::from(self.capacity);
      bucket.last_refill = now;
      return;
    }

    let elapsed = now.saturating_duration_since(bucket.last_refill);
    if elapsed.is_zero() {
      return;
    }

    let added = elapsed.as_secs_f64() / self.period.as_secs_f64() * f64::from(self.capacity);
    bucket.tokens = (bucket.tokens + added).min(f64::from(self.capacity));
    bucket.last_refill = now;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn test_third_acquire_waits_for_refill() {
    let limiter = RateLimiter::new(2, Duration::from_secs(60));
    let start = Instant::now();

    limiter.acquire().await;
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.acquire().await;
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(30), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(31), "waited {:?}", waited);
  }

  #[tokio::test(start_paused = true)]
  async fn test_tokens_stay_within_bounds() {
    let limiter = RateLimiter::new(3, Duration::from_secs(10));
    let advances = [0u64, 1, 7, 0, 0, 0, 25, 2, 0, 4, 0, 0, 0, 60, 0];

    for secs in advances {
      tokio::time::advance(Duration::from_secs(secs)).await;
      limiter.acquire().await;

      let tokens = limiter.available_tokens().await;
      assert!(tokens >= 0.0, "tokens went negative: {}", tokens);
      assert!(tokens <= 3.0, "tokens exceeded capacity: {}", tokens);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_refill_is_clamped_to_capacity() {
    let limiter = RateLimiter::new(5, Duration::from_secs(1));
    limiter.acquire().await;

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(limiter.available_tokens().await, 5.0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_callers_are_serialized() {
    let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(10)));
    let start = Instant::now();

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire().await })
      })
      .collect();

    for handle in handles {
      handle.await.unwrap();
    }

    // Two immediate tokens, then one every 5 seconds.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(11), "elapsed {:?}", elapsed);
  }
}
