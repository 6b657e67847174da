//! # Rate Limiter
//!
//! Sliding-window limiter protecting query handlers: one global window plus
//! one window per request kind. `check_in` atomically tests both and records
//! the request only when both accept.

use crate::entities::Timestamp;
use std::collections::{BTreeMap, VecDeque};

/// One window: at most `limit` accepted requests per `window_secs`.
///
/// A zero `window_secs` disables the window (always accepts); a zero `limit`
/// rejects everything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimit {
    pub window_secs: f64,
    pub limit: usize,
}

impl RateLimit {
    #[must_use]
    pub fn new(window_secs: f64, limit: usize) -> Self {
        Self { window_secs, limit }
    }
}

#[derive(Debug)]
struct LimiterWindow {
    size: f64,
    limit: usize,
    // Newest first; holds at most `limit` entries.
    timestamps: VecDeque<Timestamp>,
}

impl LimiterWindow {
    fn new(limit: RateLimit) -> Self {
        Self {
            size: limit.window_secs,
            limit: limit.limit,
            timestamps: VecDeque::new(),
        }
    }

    fn check(&self, time: Timestamp) -> bool {
        if self.size == 0.0 {
            return true;
        }
        if self.limit == 0 {
            return false;
        }
        match self.timestamps.back() {
            Some(oldest) => {
                self.timestamps.len() < self.limit || time.elapsed_since(*oldest) > self.size
            }
            None => true,
        }
    }

    fn insert(&mut self, time: Timestamp) {
        if self.size == 0.0 {
            return;
        }
        if self.timestamps.len() == self.limit {
            self.timestamps.pop_back();
        }
        self.timestamps.push_front(time);
    }
}

/// Sliding-window limiter keyed by request kind.
///
/// Request kinds without a configured per-kind limit are gated by the global
/// window only.
#[derive(Debug)]
pub struct RateLimiter<RequestId: Ord + Copy> {
    global_limit: RateLimit,
    request_limits: BTreeMap<RequestId, RateLimit>,
    global_window: LimiterWindow,
    request_windows: BTreeMap<RequestId, LimiterWindow>,
}

impl<RequestId: Ord + Copy> RateLimiter<RequestId> {
    #[must_use]
    pub fn new(global_limit: RateLimit, request_limits: BTreeMap<RequestId, RateLimit>) -> Self {
        Self {
            global_limit,
            request_limits,
            global_window: LimiterWindow::new(global_limit),
            request_windows: BTreeMap::new(),
        }
    }

    /// Test the global and per-kind windows; on acceptance record the
    /// request in both.
    pub fn check_in(&mut self, request: RequestId, time: Timestamp) -> bool {
        if self.check_global(time) && self.check_request(request, time) {
            self.global_window.insert(time);
            if let Some(window) = self.request_windows.get_mut(&request) {
                window.insert(time);
            }
            true
        } else {
            false
        }
    }

    fn check_global(&self, time: Timestamp) -> bool {
        if self.global_limit.window_secs == 0.0 {
            return true;
        }
        self.global_window.check(time)
    }

    fn check_request(&mut self, request: RequestId, time: Timestamp) -> bool {
        let Some(limit) = self.request_limits.get(&request).copied() else {
            return true;
        };
        self.request_windows
            .entry(request)
            .or_insert_with(|| LimiterWindow::new(limit))
            .check(time)
    }
}
