//! Per-client request limiting for the search endpoint.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter keyed by client address.
pub struct RateLimiter {
    /// Requests allowed per window; zero disables limiting.
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::from_secs(60))
    }

    /// Records a request from `client`. Returns how long to wait when the
    /// client has used up its window.
    pub fn check(&self, client: &str) -> Result<(), Duration> {
        if self.max_requests == 0 {
            return Ok(());
        }

        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);

        let mut window = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if window.count >= self.max_requests {
            return Err(self
                .window
                .saturating_sub(now.duration_since(window.started)));
        }
        window.count += 1;
        Ok(())
    }

    /// Number of clients with an open window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
