//! Rate Limiting for toolmesh
//!
//! This module provides the per-client rate limiter that guards the
//! coordinator's tool-call endpoint. It is the first gate in the request
//! pipeline: rejected traffic never reaches the registry or a backend.
//!
//! # Algorithm
//!
//! Fixed window per client key. Each key owns a [`RateWindow`] holding a
//! counter and the instant its window started. A request is admitted while
//! the counter is below the budget; once the window length has elapsed the
//! counter resets on the next request.
//!
//! # Locking
//!
//! - The key map is behind a `RwLock` held only to look up, insert or evict
//!   a window
//! - Each window has its own `Mutex`, so two clients never contend
//! - Idle windows are evicted during periodic cleanup after `entry_ttl`
//!
//! # Example
//!
//! ```
//! use toolmesh_common::rate_limit::{RateLimiter, RateLimitConfig};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_secs(60)));
//!
//! assert!(limiter.check_rate_limit("10.0.0.7").await.is_allowed());
//! assert!(limiter.check_rate_limit("10.0.0.7").await.is_allowed());
//! assert!(!limiter.check_rate_limit("10.0.0.7").await.is_allowed());
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::config::RateLimitSettings;

/// Configuration for rate limiting.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Requests admitted per client per window
    pub requests_per_window: u32,
    /// Window length
    pub window: Duration,
    /// Interval for cleaning up idle windows
    pub cleanup_interval: Duration,
    /// Idle time after which a window is evicted
    pub entry_ttl: Duration,
    /// When false every request is admitted
    pub enabled: bool,
}

impl RateLimitConfig {
    /// Creates an enabled configuration with default cleanup settings.
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300),
            enabled: true,
        }
    }

    /// Budget of `rpm` requests per one-minute window.
    pub fn per_minute(rpm: u32) -> Self {
        Self::new(rpm, Duration::from_secs(60))
    }

    /// Configuration that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(u32::MAX, Duration::from_secs(60))
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        let mut config = Self::new(
            settings.requests_per_window,
            Duration::from_secs(settings.window_secs),
        );
        config.entry_ttl = Duration::from_secs(settings.entry_ttl_secs);
        config
    }
}

impl Default for RateLimitConfig {
    /// Rate limiting disabled.
    fn default() -> Self {
        Self::disabled()
    }
}

/// Result of a rate limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed,
    /// Request is rate limited
    RateLimited {
        /// Time until the client's window rolls over
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::RateLimited { retry_after } => Some(*retry_after),
        }
    }
}

/// Fixed-window counter for one client key.
#[derive(Debug)]
struct RateWindow {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// Counts the request if the budget allows, rolling the window first.
    fn try_acquire(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= config.window {
            self.window_start = now;
            self.count = 0;
        }
        self.last_seen = now;

        if self.count < config.requests_per_window {
            self.count += 1;
            true
        } else {
            false
        }
    }

    fn time_until_reset(&self, config: &RateLimitConfig, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start);
        config.window.saturating_sub(elapsed)
    }
}

/// Per-client fixed-window rate limiter.
///
/// Cloning is cheap and yields a handle to the same windows.
#[derive(Clone)]
pub struct RateLimiter {
    pub config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>>,
    last_cleanup: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
            last_cleanup: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    /// Checks and counts a request from `client_key`.
    pub async fn check_rate_limit(&self, client_key: &str) -> RateLimitResult {
        self.check_rate_limit_at(client_key, Instant::now()).await
    }

    /// Same as [`check_rate_limit`](Self::check_rate_limit) with an explicit clock.
    pub async fn check_rate_limit_at(&self, client_key: &str, now: Instant) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed;
        }

        self.maybe_cleanup(now).await;

        let window = self.window_for(client_key, now).await;
        let mut window = window.lock().await;

        if window.try_acquire(&self.config, now) {
            RateLimitResult::Allowed
        } else {
            RateLimitResult::RateLimited {
                retry_after: window.time_until_reset(&self.config, now),
            }
        }
    }

    async fn window_for(&self, client_key: &str, now: Instant) -> Arc<Mutex<RateWindow>> {
        if let Some(window) = self.windows.read().await.get(client_key) {
            return Arc::clone(window);
        }

        let mut windows = self.windows.write().await;
        Arc::clone(
            windows
                .entry(client_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(now)))),
        )
    }

    async fn maybe_cleanup(&self, now: Instant) {
        let mut last_cleanup = self.last_cleanup.lock().await;
        if now.saturating_duration_since(*last_cleanup) < self.config.cleanup_interval {
            return;
        }
        *last_cleanup = now;
        drop(last_cleanup);

        let evicted = self.cleanup_stale_entries(now).await;
        if evicted > 0 {
            tracing::debug!("Evicted {} idle rate limit windows", evicted);
        }
    }

    /// Drops windows idle for longer than `entry_ttl`, returning how many.
    ///
    /// Windows locked by an in-flight check are kept.
    pub async fn cleanup_stale_entries(&self, now: Instant) -> usize {
        let mut windows = self.windows.write().await;
        let before = windows.len();
        let ttl = self.config.entry_ttl;
        windows.retain(|_, window| match window.try_lock() {
            Ok(window) => now.saturating_duration_since(window.last_seen) < ttl,
            Err(_) => true,
        });
        before - windows.len()
    }

    /// Number of client keys currently tracked.
    pub async fn tracked_client_count(&self) -> usize {
        self.windows.read().await.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
