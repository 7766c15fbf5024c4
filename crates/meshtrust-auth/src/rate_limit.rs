//! Local backoff for remotes that keep failing handshakes.
//!
//! Counts `BadSignature`/`Malformed` failures per remote host in a fixed
//! window; a host that exceeds the budget is refused for a cooldown. Keys are
//! hosts without ports (see `Connection::remote_host`). Purely local: it never
//! touches the trust store.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use meshtrust_core::AuthConfig;

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

/// Per-host handshake failure limiter.
#[derive(Debug)]
pub struct FailureLimiter {
    max_failures: u32,
    window: Duration,
    cooldown: Duration,
    entries: DashMap<String, FailureWindow>,
}

impl FailureLimiter {
    pub fn new(max_failures: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            max_failures,
            window,
            cooldown,
            entries: DashMap::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.max_failures, config.failure_window(), config.cooldown())
    }

    /// Whether `addr` may attempt a handshake now.
    pub fn check(&self, addr: &str) -> Result<(), Duration> {
        self.check_at(addr, Instant::now())
    }

    /// `Err(remaining)` while the address is cooling down.
    pub fn check_at(&self, addr: &str, now: Instant) -> Result<(), Duration> {
        match self.entries.get(addr).and_then(|e| e.blocked_until) {
            Some(until) if now < until => Err(until - now),
            _ => Ok(()),
        }
    }

    /// Count a failure. Returns true if this failure started a cooldown.
    pub fn record_failure(&self, addr: &str) -> bool {
        self.record_failure_at(addr, Instant::now())
    }

    pub fn record_failure_at(&self, addr: &str, now: Instant) -> bool {
        let mut entry = self.entries.entry(addr.to_string()).or_insert(FailureWindow {
            count: 0,
            window_start: now,
            blocked_until: None,
        });

        if entry.blocked_until.is_some_and(|until| now >= until) {
            entry.blocked_until = None;
            entry.count = 0;
            entry.window_start = now;
        }
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count > self.max_failures && entry.blocked_until.is_none() {
            entry.blocked_until = Some(now + self.cooldown);
            tracing::warn!(
                remote = %addr,
                failures = entry.count,
                cooldown_secs = self.cooldown.as_secs(),
                "handshake failure limit exceeded, cooling down"
            );
            return true;
        }
        false
    }

    /// Current failure count for an address within its window.
    pub fn failures(&self, addr: &str) -> u32 {
        self.entries.get(addr).map(|e| e.count).unwrap_or(0)
    }

    /// Drop entries whose window and cooldown have both elapsed.
    pub fn cleanup_expired(&self) {
        self.cleanup_expired_at(Instant::now());
    }

    pub fn cleanup_expired_at(&self, now: Instant) {
        let window = self.window;
        self.entries.retain(|_, e| {
            let cooling = e.blocked_until.is_some_and(|until| now < until);
            cooling || now.duration_since(e.window_start) < window
        });
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}
