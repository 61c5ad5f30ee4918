//! Sliding-window rate limiting, one window per upstream server.
//!
//! Each window is a queue of admission timestamps behind its own lock, so
//! calls to different servers never contend. The outer map lock is only
//! taken to look up or create a window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};

/// Length of the rolling admission window, in seconds.
pub const WINDOW_SECS: i64 = 60;

fn window_len() -> Duration {
    Duration::seconds(WINDOW_SECS)
}

type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

#[derive(Default)]
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn window(&self, server_name: &str) -> Window {
        if let Some(w) = self.windows.read().get(server_name) {
            return w.clone();
        }
        self.windows
            .write()
            .entry(server_name.to_string())
            .or_default()
            .clone()
    }

    /// Try to admit one call for `server_name` at `now`.
    ///
    /// Prunes admissions older than `now - 60s`, then either rejects with
    /// the current in-window count (when it has reached `limit`) or records
    /// the admission and returns the remaining budget.
    pub fn try_admit(
        &self,
        server_name: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, u32> {
        let admissions = self.window(server_name);
        let mut admissions = admissions.lock();

        let cutoff = now - window_len();
        while admissions.front().is_some_and(|t| *t <= cutoff) {
            admissions.pop_front();
        }

        let count = admissions.len() as u32;
        if count >= limit {
            return Err(count);
        }
        admissions.push_back(now);
        Ok(limit - count - 1)
    }

    /// Number of servers with a rate window.
    pub fn active_windows(&self) -> usize {
        self.windows.read().len()
    }

    /// Total admissions within the last 60 seconds across all servers.
    /// Read-only; does not prune.
    pub fn recent_total(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - window_len();
        let windows = self.windows.read();
        windows
            .values()
            .map(|w| w.lock().iter().filter(|t| **t > cutoff).count())
            .sum()
    }

    /// Drop all windows (test/reset support).
    pub fn clear(&self) {
        self.windows.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let now = t0();
        assert_eq!(limiter.try_admit("srv", 2, now), Ok(1));
        assert_eq!(limiter.try_admit("srv", 2, now), Ok(0));
        assert_eq!(limiter.try_admit("srv", 2, now), Err(2));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new();
        let now = t0();
        assert!(limiter.try_admit("srv", 1, now).is_ok());
        assert!(limiter.try_admit("srv", 1, now).is_err());
        // 61 seconds later the earlier admission has aged out.
        let later = now + Duration::seconds(61);
        assert!(limiter.try_admit("srv", 1, later).is_ok());
    }

    #[test]
    fn admission_at_exact_cutoff_is_pruned() {
        let limiter = RateLimiter::new();
        let now = t0();
        assert!(limiter.try_admit("srv", 1, now).is_ok());
        let at_cutoff = now + Duration::seconds(WINDOW_SECS);
        assert!(limiter.try_admit("srv", 1, at_cutoff).is_ok());
    }

    #[test]
    fn servers_do_not_share_windows() {
        let limiter = RateLimiter::new();
        let now = t0();
        assert!(limiter.try_admit("a", 1, now).is_ok());
        assert!(limiter.try_admit("b", 1, now).is_ok());
        assert!(limiter.try_admit("a", 1, now).is_err());
        assert_eq!(limiter.active_windows(), 2);
    }

    #[test]
    fn recent_total_counts_across_servers() {
        let limiter = RateLimiter::new();
        let now = t0();
        limiter.try_admit("a", 10, now).unwrap();
        limiter.try_admit("a", 10, now).unwrap();
        limiter.try_admit("b", 10, now).unwrap();
        assert_eq!(limiter.recent_total(now), 3);
        assert_eq!(limiter.recent_total(now + Duration::seconds(61)), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let limiter = RateLimiter::new();
        limiter.try_admit("a", 1, t0()).unwrap();
        limiter.clear();
        assert_eq!(limiter.active_windows(), 0);
        assert!(limiter.try_admit("a", 1, t0()).is_ok());
    }
}
