//! Per-server rate accounting.
//!
//! One [`RateCounter`] per server: a sliding 60-second admission window and
//! a live concurrency count. Counters are never shared across servers; the
//! whole table sits behind a single mutex because every operation is a few
//! integer updates.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use warden_types::policy::RateLimitConfig;

/// Length of the admission window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Runtime rate state for one server.
#[derive(Debug)]
struct RateCounter {
    /// When the current window opened.
    window_start: Instant,
    /// Admission attempts within the current window.
    window_count: u32,
    /// Calls currently in flight.
    concurrent: u32,
}

impl RateCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_count: 0,
            concurrent: 0,
        }
    }
}

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDenial {
    /// The per-minute window is exhausted.
    WindowExceeded {
        /// The configured requests-per-minute limit.
        limit: u32,
    },
    /// Too many calls already in flight.
    ConcurrencyExceeded {
        /// The configured concurrency cap.
        limit: u32,
    },
}

/// Admission counters for all servers.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<String, RateCounter>>,
}

impl RateLimiter {
    /// An empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit one call for `server` under `limits`.
    ///
    /// The window counter is consumed even when the result is a denial, so
    /// a flooding caller keeps being refused. The window is checked before
    /// concurrency so a flooded but idle server still reports a clear
    /// window denial. Concurrency is only tested here, never incremented —
    /// that happens in [`RateLimiter::begin`] once the whole policy
    /// pipeline has accepted the call.
    pub fn admit(&self, server: &str, limits: RateLimitConfig) -> Result<(), RateDenial> {
        let mut counters = self.counters.lock().expect("rate counter lock poisoned");
        let counter = counters
            .entry(server.to_string())
            .or_insert_with(RateCounter::new);

        if counter.window_start.elapsed() >= WINDOW {
            counter.window_start = Instant::now();
            counter.window_count = 0;
        }
        counter.window_count += 1;
        if counter.window_count > limits.requests_per_minute {
            return Err(RateDenial::WindowExceeded {
                limit: limits.requests_per_minute,
            });
        }

        if counter.concurrent >= limits.max_concurrent {
            return Err(RateDenial::ConcurrencyExceeded {
                limit: limits.max_concurrent,
            });
        }

        Ok(())
    }

    /// Mark one call in flight.
    pub fn begin(&self, server: &str) {
        let mut counters = self.counters.lock().expect("rate counter lock poisoned");
        counters
            .entry(server.to_string())
            .or_insert_with(RateCounter::new)
            .concurrent += 1;
    }

    /// Mark one call finished. Saturates at zero.
    pub fn end(&self, server: &str) {
        let mut counters = self.counters.lock().expect("rate counter lock poisoned");
        if let Some(counter) = counters.get_mut(server) {
            counter.concurrent = counter.concurrent.saturating_sub(1);
        }
    }

    /// Current in-flight count for a server.
    pub fn concurrent(&self, server: &str) -> u32 {
        let counters = self.counters.lock().expect("rate counter lock poisoned");
        counters.get(server).map(|c| c.concurrent).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rpm: u32, conc: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: rpm,
            max_concurrent: conc,
        }
    }

    #[test]
    fn nth_request_admitted_next_denied() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.admit("memory", limits(5, 10)).is_ok());
        }
        assert_eq!(
            limiter.admit("memory", limits(5, 10)),
            Err(RateDenial::WindowExceeded { limit: 5 })
        );
    }

    #[test]
    fn concurrency_cap_refuses_when_saturated() {
        let limiter = RateLimiter::new();
        limiter.begin("memory");
        limiter.begin("memory");
        assert_eq!(
            limiter.admit("memory", limits(100, 2)),
            Err(RateDenial::ConcurrencyExceeded { limit: 2 })
        );

        limiter.end("memory");
        assert!(limiter.admit("memory", limits(100, 2)).is_ok());
    }

    #[test]
    fn end_never_goes_negative() {
        let limiter = RateLimiter::new();
        limiter.end("memory");
        limiter.end("memory");
        assert_eq!(limiter.concurrent("memory"), 0);
    }

    #[test]
    fn counters_are_per_server() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.admit("memory", limits(3, 1)).unwrap();
        }
        assert!(limiter.admit("memory", limits(3, 1)).is_err());
        assert!(limiter.admit("helpscout", limits(3, 1)).is_ok());
    }

    #[test]
    fn window_denial_takes_precedence_over_concurrency() {
        let limiter = RateLimiter::new();
        limiter.begin("memory");
        limiter.admit("memory", limits(1, 1)).unwrap();
        // Both limits are now exhausted; the window denial wins.
        assert_eq!(
            limiter.admit("memory", limits(1, 1)),
            Err(RateDenial::WindowExceeded { limit: 1 })
        );
    }
}
