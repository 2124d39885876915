//! DSM Connection - Pooling, sessions and the manager façade
//!
//! This crate owns the only stateful part of the data-source manager: a
//! bounded pool of raw connections, sessions that borrow from it and clean
//! up after themselves, and the settings used to build both.

mod manager;
pub mod pool;
pub mod session;
pub mod settings;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use manager::ConnectionManager;
pub use pool::{ConnectionId, ConnectionPool, PoolConfig, PoolId, PoolStats, PooledConnection};
pub use session::{CursorHandle, QueryHandle, Session, SessionId};
pub use settings::DataSourceSettings;
