//! Pool statistics types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of a connection pool's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently borrowed
    active: usize,
    /// Number of callers waiting for a connection
    waiting: usize,
    /// Whether the pool has been closed
    closed: bool,
}

impl PoolStats {
    pub fn new(idle: usize, active: usize, waiting: usize, closed: bool) -> Self {
        Self {
            idle,
            active,
            waiting,
            closed,
        }
    }

    /// Total number of connections (idle + active)
    pub fn total(&self) -> usize {
        self.idle + self.active
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.active as f64 / self.total() as f64
        }
    }

    /// Check if every connection the pool holds is in use
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total() > 0
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idle={} active={}", self.idle, self.active)?;
        if self.waiting > 0 {
            write!(f, " waiting={}", self.waiting)?;
        }
        if self.closed {
            write!(f, " (closed)")?;
        }
        Ok(())
    }
}
