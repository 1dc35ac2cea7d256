use minerva_contract::ProviderError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared by all callers of one provider capability.
///
/// Sustained rate is `per_minute / 60` tokens per second with `burst`
/// instantaneous capacity. Callers queue; a caller whose wait would exceed
/// its deadline-derived cap gets a transport error instead of blocking.
pub struct RateLimiter {
    state: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: f64::from(per_minute.max(1)) / 60.0,
        }
    }

    /// Take one token, waiting up to `max_wait` for refill.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), ProviderError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };

            if Instant::now() + wait > deadline {
                return Err(ProviderError::Transport(
                    "rate limiter wait would exceed call deadline".to_string(),
                ));
            }
            tokio::time::sleep(wait).await;
        }
    }
}
