//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use docflow_engine::DocumentService;
use docflow_storage::InMemoryStorage;
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request tracker: (request count, window start time).
type IpTracker = HashMap<IpAddr, (u64, Instant)>;

/// In-memory per-IP rate limiter.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    /// Maximum requests per window.
    pub(crate) max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self::with_window(max_requests, Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }

    pub(crate) fn with_window(max_requests: u64, window: Duration) -> Self {
        Self {
            tracker: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Check if a request from the given IP is allowed.
    /// Returns Ok(()) if allowed, Err(retry_after_secs) if rate limited.
    ///
    /// Tracking a new IP first drops every entry whose window has expired,
    /// so the map holds at most the IPs seen within one window.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut tracker = self.tracker.lock().await;
        let now = Instant::now();

        if !tracker.contains_key(&ip) {
            let window = self.window;
            tracker.retain(|_, (_, start)| now.duration_since(*start) < window);
        }

        let entry = tracker.entry(ip).or_insert((0, now));

        let mut elapsed = now.duration_since(entry.1);
        if elapsed >= self.window {
            entry.0 = 0;
            entry.1 = now;
            elapsed = Duration::ZERO;
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(self.window.saturating_sub(elapsed).as_secs())
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    async fn tracked_ips(&self) -> usize {
        self.tracker.lock().await.len()
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) service: DocumentService<InMemoryStorage>,
    /// Per-IP rate limiter. None = unlimited.
    pub(crate) rate_limiter: Option<RateLimiter>,
    /// Optional API key for authentication. None = no auth required.
    pub(crate) api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_rejects_past_max_per_ip() {
        let limiter = RateLimiter::new(2);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).await.is_ok());
        assert!(limiter.check(a).await.is_ok());
        let retry_after = limiter.check(a).await.unwrap_err();
        assert!(retry_after <= RATE_LIMIT_WINDOW_SECS);

        assert!(limiter.check(b).await.is_ok());
    }

    #[tokio::test]
    async fn expired_windows_are_evicted_on_insert() {
        let limiter = RateLimiter::with_window(5, Duration::from_millis(50));
        for last in 1..=20u8 {
            let ip = IpAddr::from([10, 0, 0, last]);
            assert!(limiter.check(ip).await.is_ok());
        }
        assert_eq!(limiter.tracked_ips().await, 20);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check("10.0.1.1".parse().unwrap()).await.is_ok());
        assert_eq!(limiter.tracked_ips().await, 1);
    }
}
