//! Login rate limiting
//! Fixed-window attempt counter keyed by client address

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::{Duration, Instant};

static RATE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s*/\s*(\d+\s*)?(second|minute|hour|day)s?\s*$")
        .expect("valid rate spec regex")
});

pub struct LoginRateLimiter {
    /// client -> (window_start, attempts)
    windows: DashMap<String, (Instant, u32)>,
    limit: u32,
    window: Duration,
}

impl LoginRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Parse a limit such as `10/minute`, `100/hour` or `5/30 seconds`
    pub fn from_spec(spec: &str) -> Option<Self> {
        let lowered = spec.to_lowercase();
        let caps = RATE_SPEC.captures(&lowered)?;
        let limit: u32 = caps.get(1)?.as_str().parse().ok()?;
        let multiplier: u64 = match caps.get(2) {
            Some(m) => m.as_str().trim().parse().ok()?,
            None => 1,
        };
        let unit: u64 = match caps.get(3)?.as_str() {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            _ => 86400,
        };
        if limit == 0 || multiplier == 0 {
            return None;
        }
        let window = unit.checked_mul(multiplier)?;
        Some(Self::new(limit, Duration::from_secs(window)))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one attempt. `Err` carries the seconds until the window resets.
    pub fn check(&self, client: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = self.windows.entry(client.to_string()).or_insert((now, 0));
        let (started, attempts) = entry.value_mut();

        if now.duration_since(*started) >= self.window {
            *started = now;
            *attempts = 0;
        }

        if *attempts >= self.limit {
            let remaining = self.window.saturating_sub(now.duration_since(*started));
            let retry_after = remaining.as_secs().max(1);
            tracing::warn!("Login rate limit hit for {} (retry in {}s)", client, retry_after);
            return Err(retry_after);
        }

        *attempts += 1;
        Ok(())
    }

    /// Cleanup expired windows
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.windows.retain(|_, (started, _)| {
            if now.duration_since(*started) >= self.window {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec() {
        let limiter = LoginRateLimiter::from_spec("10/minute").unwrap();
        assert_eq!(limiter.limit(), 10);
        assert_eq!(limiter.window, Duration::from_secs(60));

        let limiter = LoginRateLimiter::from_spec("5 / 30 seconds").unwrap();
        assert_eq!(limiter.window, Duration::from_secs(30));

        assert_eq!(LoginRateLimiter::from_spec("3/Day").unwrap().window, Duration::from_secs(86400));
        assert!(LoginRateLimiter::from_spec("lots").is_none());
        assert!(LoginRateLimiter::from_spec("0/minute").is_none());
    }

    #[test]
    fn test_from_spec_rejects_overflowing_window() {
        assert!(LoginRateLimiter::from_spec("1/99999999999999999 days").is_none());
        assert!(LoginRateLimiter::from_spec("1/99999999999999999999999 seconds").is_none());

        let limiter = LoginRateLimiter::from_spec("1/999 Days").unwrap();
        assert_eq!(limiter.window, Duration::from_secs(999 * 86400));
    }

    #[test]
    fn test_limit_per_client() {
        let limiter = LoginRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());

        let retry_after = limiter.check("10.0.0.1").unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);

        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[test]
    fn test_window_resets() {
        let limiter = LoginRateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.check("c").is_ok());
        assert!(limiter.check("c").is_err());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(limiter.cleanup_expired(), 1);
        assert!(limiter.check("c").is_ok());
    }
}
