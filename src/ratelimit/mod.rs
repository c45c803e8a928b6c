//! Sliding window rate limiting
//!
//! Tracks per-key admitted-request timestamps and decides admit/deny within a
//! rolling window. A request admitted at `t` stops counting against the limit
//! exactly one window-duration later, regardless of alignment; this is a true
//! sliding window, not fixed buckets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::ExecutionContext;
use crate::error::ConfigError;

/// Backing store selector. Only the in-process store ships; the selector
/// exists so configurations stay explicit about where counts live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStore {
    #[default]
    Memory,
}

/// Per-step key derivation override, applied to the execution context.
pub type IdentifierFn = dyn Fn(&ExecutionContext) -> String + Send + Sync;

/// Rate limit configuration for one pipeline step.
///
/// The window string is parsed once here, at setup time; a malformed window
/// never reaches check time.
#[derive(Clone)]
pub struct RateLimitConfig {
    max_requests: u64,
    window: String,
    window_ms: u64,
    store: RateLimitStore,
    identifier: Option<Arc<IdentifierFn>>,
}

impl RateLimitConfig {
    /// Validates `max_requests >= 1` and parses `window` (`"30s"`, `"5m"`,
    /// `"1h"`, `"1d"`).
    pub fn new(max_requests: u64, window: &str) -> Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::InvalidMaxRequests);
        }
        let window_ms = parse_window(window)?;
        Ok(Self {
            max_requests,
            window: window.to_string(),
            window_ms,
            store: RateLimitStore::default(),
            identifier: None,
        })
    }

    /// Derive the limiter key from the context instead of the default
    /// user/IP/anonymous precedence.
    pub fn with_identifier(
        mut self,
        identifier: impl Fn(&ExecutionContext) -> String + Send + Sync + 'static,
    ) -> Self {
        self.identifier = Some(Arc::new(identifier));
        self
    }

    pub fn with_store(mut self, store: RateLimitStore) -> Self {
        self.store = store;
        self
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> &str {
        &self.window
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub(crate) fn identifier(&self) -> Option<&Arc<IdentifierFn>> {
        self.identifier.as_ref()
    }

    /// Cache key: steps with identical configuration share one limiter.
    pub(crate) fn limiter_key(&self) -> String {
        format!("{:?}:{}:{}", self.store, self.max_requests, self.window_ms)
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("window_ms", &self.window_ms)
            .field("store", &self.store)
            .field("identifier", &self.identifier.is_some())
            .finish()
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which the oldest retained admission exits the
    /// window
    pub reset_at: u64,
}

/// Per-key sliding window over admitted-request timestamps (epoch millis).
///
/// The read-prune-append cycle for a key is serialized behind the store
/// mutex, so concurrent invocations cannot overcount or undercount
/// admissions. Eviction is lazy: stale timestamps for a key are dropped the
/// next time that key is checked, so a key's record never grows unbounded
/// across time even though it is never proactively swept.
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, Vec<u64>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record one request for `key`.
    pub fn check(&self, key: &str, max_requests: u64, window_ms: u64) -> RateLimitDecision {
        self.check_at(key, max_requests, window_ms, now_ms())
    }

    fn check_at(
        &self,
        key: &str,
        max_requests: u64,
        window_ms: u64,
        now: u64,
    ) -> RateLimitDecision {
        let mut windows = self.windows.lock().unwrap();
        let timestamps = windows.entry(key.to_string()).or_default();

        let window_start = now.saturating_sub(window_ms);
        timestamps.retain(|&ts| ts > window_start);

        let count = timestamps.len() as u64;
        if count >= max_requests {
            let reset_at = timestamps
                .first()
                .map(|&oldest| oldest + window_ms)
                .unwrap_or(now + window_ms);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        timestamps.push(now);
        let reset_at = timestamps
            .first()
            .map(|&oldest| oldest + window_ms)
            .unwrap_or(now + window_ms);
        RateLimitDecision {
            allowed: true,
            remaining: max_requests.saturating_sub(count + 1),
            reset_at,
        }
    }

    /// Forget all admissions for `key`.
    pub fn reset(&self, key: &str) {
        self.windows.lock().unwrap().remove(key);
    }

    /// Number of keys currently tracked (stale keys included until their
    /// next check).
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parse a window string into milliseconds.
///
/// Accepts `<positive integer><unit>` with unit `s`, `m`, `h` or `d`
/// (case-insensitive, optional internal whitespace). Anything else is a
/// configuration error.
pub fn parse_window(window: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidWindow(window.to_string());

    let trimmed = window.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(digits_end);

    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(invalid()),
    };

    value.checked_mul(multiplier).ok_or_else(invalid)
}
