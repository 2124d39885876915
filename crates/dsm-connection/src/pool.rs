//! Connection pooling for raw connections
//!
//! This module provides a bounded pool with configurable idle/active
//! limits, fail-fast or bounded-wait borrowing, and statistics tracking.
//!
//! # Example
//!
//! ```ignore
//! use dsm_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(1, 20)
//!     .with_max_idle(5)
//!     .with_idle_timeout_ms(300000);
//!
//! let pool = ConnectionPool::new(config, factory, params)?;
//! let conn = pool.borrow().await?;
//! // Use connection...
//! pool.release(conn).await?;
//! ```

mod config;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use pool::{ConnectionId, ConnectionPool, PoolId, PooledConnection};
pub use stats::PoolStats;
