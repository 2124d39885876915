//! Pool configuration types

use std::time::Duration;

use dsm_core::{DsmError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls idle/active bounds, acquire behaviour and connection lifetime.
/// The bounds must satisfy `min_idle <= max_idle <= max_active`; see
/// [`PoolConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of idle connections the pool tries to keep warm
    min_idle: usize,
    /// Maximum number of idle connections kept for reuse (defaults to `max_active`)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_idle: Option<usize>,
    /// Maximum number of connections borrowed at once
    max_active: usize,
    /// How long `borrow` waits for a free slot; `None` fails fast
    #[serde(skip_serializing_if = "Option::is_none")]
    acquire_timeout_ms: Option<u64>,
    /// Timeout in milliseconds before an idle connection is closed
    idle_timeout_ms: u64,
    /// Maximum lifetime of a connection in milliseconds before it's recycled
    #[serde(skip_serializing_if = "Option::is_none")]
    max_lifetime_ms: Option<u64>,
}

impl PoolConfig {
    /// Create a new pool configuration with the given idle target and active limit
    ///
    /// `max_idle` follows `max_active` until set explicitly.
    pub fn new(min_idle: usize, max_active: usize) -> Self {
        Self {
            min_idle,
            max_idle: None,
            max_active,
            acquire_timeout_ms: None,
            idle_timeout_ms: 600_000,
            max_lifetime_ms: None,
        }
    }

    /// Set the idle target
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the active limit
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Set the maximum number of idle connections
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Wait up to `timeout_ms` for a free slot instead of failing fast
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle.unwrap_or(self.max_active)
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Get the acquire timeout, `None` when borrowing fails fast
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    /// Check the `min_idle <= max_idle <= max_active` invariant
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(DsmError::Configuration(
                "max_active must be greater than 0".into(),
            ));
        }
        if self.max_idle() > self.max_active {
            return Err(DsmError::Configuration(format!(
                "max_idle ({}) cannot exceed max_active ({})",
                self.max_idle(),
                self.max_active
            )));
        }
        if self.min_idle > self.max_idle() {
            return Err(DsmError::Configuration(format!(
                "min_idle ({}) cannot exceed max_idle ({})",
                self.min_idle,
                self.max_idle()
            )));
        }
        Ok(())
    }

    /// The nearest configuration that passes [`PoolConfig::validate`]
    ///
    /// `max_active` is raised to at least 1, then `max_idle` and `min_idle`
    /// are lowered until they fit under it.
    pub fn clamped(&self) -> Self {
        let max_active = self.max_active.max(1);
        let max_idle = self.max_idle.map(|n| n.min(max_active));
        let min_idle = self.min_idle.min(max_idle.unwrap_or(max_active));
        Self {
            min_idle,
            max_idle,
            max_active,
            ..self.clone()
        }
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - min_idle: 10
    /// - max_active: 20
    /// - max_idle: same as max_active
    /// - acquire_timeout: none (fail fast)
    /// - idle_timeout: 10 minutes
    /// - max_lifetime: none
    fn default() -> Self {
        Self::new(10, 20)
    }
}
