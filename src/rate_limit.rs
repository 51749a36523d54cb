use std::collections::HashMap;

use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Expired windows are swept once the table grows past this many keys, at most
/// once per window.
const PRUNE_THRESHOLD: usize = 4096;

/// Hard cap on tracked keys. Unknown keys are rejected while the table is full.
const MAX_TRACKED_KEYS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the caller's current window ends.
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    hits: u32,
}

#[derive(Debug, Default)]
struct Table {
    windows: HashMap<String, Window>,
    next_prune_at: Option<Instant>,
}

impl Table {
    fn prune_due(&self, now: Instant) -> bool {
        self.next_prune_at.is_none_or(|at| now >= at)
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started_at) < window);
        self.next_prune_at = Some(now + window);
    }
}

/// Fixed-window attempt counter keyed by source address.
///
/// Every attempt counts, whether or not the request behind it succeeds.
#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    max_keys: usize,
    table: Mutex<Table>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            max_keys: MAX_TRACKED_KEYS,
            table: Mutex::new(Table::default()),
        }
    }

    #[cfg(test)]
    fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now()).await
    }

    pub async fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut table = self.table.lock().await;

        let sweep_at = PRUNE_THRESHOLD.min(self.max_keys);
        if table.windows.len() >= sweep_at && table.prune_due(now) {
            table.prune(now, self.window);
        }

        if table.windows.len() >= self.max_keys && !table.windows.contains_key(key) {
            let reset_after = table
                .next_prune_at
                .map_or(self.window, |at| at.saturating_duration_since(now));
            return RateLimitDecision {
                allowed: false,
                limit: self.max,
                remaining: 0,
                reset_after,
            };
        }

        let entry = table.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            hits: 0,
        });
        if now.saturating_duration_since(entry.started_at) >= self.window {
            *entry = Window {
                started_at: now,
                hits: 0,
            };
        }

        let reset_after = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started_at));

        if entry.hits >= self.max {
            return RateLimitDecision {
                allowed: false,
                limit: self.max,
                remaining: 0,
                reset_after,
            };
        }

        entry.hits += 1;
        RateLimitDecision {
            allowed: true,
            limit: self.max,
            remaining: self.max - entry.hits,
            reset_after,
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.table.lock().await.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_max_attempts_then_rejects_until_window_ends() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        for expected_remaining in [2, 1, 0] {
            let d = limiter.check_at("10.0.0.1", t0).await;
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
            assert_eq!(d.limit, 3);
        }

        let d = limiter
            .check_at("10.0.0.1", t0 + Duration::from_secs(59))
            .await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_after, Duration::from_secs(1));

        let d = limiter
            .check_at("10.0.0.1", t0 + Duration::from_secs(60))
            .await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
        assert_eq!(d.reset_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn keys_are_limited_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(limiter.check_at("a", t0).await.allowed);
        assert!(!limiter.check_at("a", t0).await.allowed);
        assert!(limiter.check_at("b", t0).await.allowed);
    }

    #[tokio::test]
    async fn expired_windows_are_pruned_when_table_is_large() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();

        for i in 0..PRUNE_THRESHOLD {
            limiter.check_at(&format!("k{i}"), t0).await;
        }
        assert_eq!(limiter.tracked_keys().await, PRUNE_THRESHOLD);

        limiter
            .check_at("fresh", t0 + Duration::from_secs(11))
            .await;
        assert_eq!(limiter.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn sweeps_run_at_most_once_per_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();

        for i in 0..PRUNE_THRESHOLD {
            limiter.check_at(&format!("k{i}"), t0).await;
        }

        // Sweeps here, frees nothing, and schedules the next sweep for t0+11s.
        limiter.check_at("a", t0 + Duration::from_secs(1)).await;
        assert_eq!(limiter.tracked_keys().await, PRUNE_THRESHOLD + 1);

        // The t0 windows have expired, but the next sweep is not due yet.
        limiter.check_at("b", t0 + Duration::from_secs(10)).await;
        assert_eq!(limiter.tracked_keys().await, PRUNE_THRESHOLD + 2);

        // Only "b" survives the sweep, then "c" is added.
        limiter.check_at("c", t0 + Duration::from_secs(11)).await;
        assert_eq!(limiter.tracked_keys().await, 2);
    }

    #[tokio::test]
    async fn full_table_rejects_unknown_keys_until_next_sweep() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10)).with_max_keys(2);
        let t0 = Instant::now();

        assert!(limiter.check_at("a", t0).await.allowed);
        assert!(limiter.check_at("b", t0).await.allowed);

        let d = limiter.check_at("c", t0 + Duration::from_secs(1)).await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_after, Duration::from_secs(10));

        // Known keys keep their budget while the table is full.
        assert!(limiter.check_at("a", t0 + Duration::from_secs(1)).await.allowed);
        assert_eq!(limiter.tracked_keys().await, 2);

        assert!(limiter.check_at("c", t0 + Duration::from_secs(11)).await.allowed);
        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
