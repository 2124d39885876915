//! Raw connection, prepared query and cursor traits
//!
//! These are the capabilities a backing driver provides. The pool and
//! sessions never interpret the resource behind them; they only open,
//! check and close.

use crate::{ConnectionParams, Result, Row, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// An open handle to the backing data resource
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "mock")
    fn driver_name(&self) -> &str;

    /// Prepare a query for later execution
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedQuery>>;

    /// Check that the connection is still usable
    ///
    /// Drivers that can ping the resource cheaply should override this.
    async fn is_valid(&self) -> bool {
        !self.is_closed()
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A prepared query owned by a session
#[async_trait]
pub trait PreparedQuery: Send + Sync {
    /// The query text this handle was prepared from
    fn sql(&self) -> &str;

    /// Execute a statement, returning the number of affected rows
    async fn execute(&self, params: &[Value]) -> Result<u64>;

    /// Run the query and open a cursor over its result
    async fn open_cursor(&self, params: &[Value]) -> Result<Box<dyn Cursor>>;

    /// Release the prepared query. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// An open result cursor
#[async_trait]
pub trait Cursor: Send + Sync {
    /// Column names of the result
    fn columns(&self) -> &[String];

    /// Advance the cursor; `None` once exhausted
    async fn next_row(&mut self) -> Result<Option<Row>>;

    /// Release the cursor. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Factory trait for creating new raw connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn RawConnection>>;

    /// Validate that a connection is still usable
    async fn validate(&self, conn: &dyn RawConnection) -> bool {
        conn.is_valid().await
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn RawConnection>> {
        (**self).create(params).await
    }

    async fn validate(&self, conn: &dyn RawConnection) -> bool {
        (**self).validate(conn).await
    }
}
