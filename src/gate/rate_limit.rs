//! Sliding-window address admission gate
//!
//! Each admitted transaction hash is recorded in its address's window. Once an
//! address has more than `max_events` distinct hashes inside the window it is
//! blacklisted; the call that crosses the threshold is still admitted, every
//! later call is rejected. Allow-listed addresses bypass the window entirely.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    Blacklisted(String),
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitError::Blacklisted(addr) => write!(f, "{} in blacklist", addr),
        }
    }
}

impl std::error::Error for RateLimitError {}

#[derive(Debug, Default)]
struct AddressWindow {
    /// tx hash -> last seen timestamp
    seen: HashMap<String, i64>,
}

impl AddressWindow {
    fn evict_before(&mut self, cutoff_timestamp: i64) {
        self.seen.retain(|_, ts| *ts > cutoff_timestamp);
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, AddressWindow>,
    blacklist: HashSet<String>,
}

#[derive(Debug)]
pub struct AddressRateLimiter {
    window_secs: i64,
    max_events: usize,
    allow_list: HashSet<String>,
    state: Mutex<LimiterState>,
}

impl AddressRateLimiter {
    pub fn new(window_secs: i64, max_events: usize) -> Self {
        Self {
            window_secs,
            max_events,
            allow_list: HashSet::new(),
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn with_allow_list<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Admit `tx_hash` for `address` at unix time `now`
    pub fn check(&self, address: &str, tx_hash: &str, now: i64) -> Result<(), RateLimitError> {
        if self.allow_list.contains(address) {
            return Ok(());
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.blacklist.contains(address) {
            return Err(RateLimitError::Blacklisted(address.to_string()));
        }

        let window = state.windows.entry(address.to_string()).or_default();
        window.seen.insert(tx_hash.to_string(), now);
        window.evict_before(now - self.window_secs);
        let count = window.seen.len();

        if count > self.max_events {
            state.windows.remove(address);
            state.blacklist.insert(address.to_string());
            log::warn!(
                "🚫 Address {} blacklisted: {} events in {}s window",
                address,
                count,
                self.window_secs
            );
        }

        Ok(())
    }

    /// Admit `tx_hash` for `address` at the current wall-clock time
    pub fn check_now(&self, address: &str, tx_hash: &str) -> Result<(), RateLimitError> {
        self.check(address, tx_hash, chrono::Utc::now().timestamp())
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blacklist.contains(address)
    }

    /// Drop windows with no entries newer than the window
    pub fn cleanup(&self, now: i64) {
        let cutoff = now - self.window_secs;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.windows.retain(|_, window| {
            window.evict_before(cutoff);
            !window.seen.is_empty()
        });
    }

    pub fn cleanup_now(&self) {
        self.cleanup(chrono::Utc::now().timestamp());
    }

    pub fn tracked_addresses(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.windows.len()
    }
}
