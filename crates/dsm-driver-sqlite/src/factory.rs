//! Connection factory for SQLite

use async_trait::async_trait;
use dsm_core::{ConnectionFactory, ConnectionParams, DsmError, RawConnection, Result};
use std::sync::Arc;

use crate::SqliteConnection;

/// Opens a [`SqliteConnection`] for each pool slot
///
/// `params.url` is the database path (or `:memory:`). Note that every
/// in-memory connection is its own database.
#[derive(Debug, Clone, Copy)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
    pub fn new() -> Self {
        tracing::debug!("SQLite connection factory initialized");
        Self
    }
}

impl Default for SqliteConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    #[tracing::instrument(skip(self, params), fields(path = %params.url))]
    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn RawConnection>> {
        if !params.driver.is_empty() && !params.driver.eq_ignore_ascii_case("sqlite") {
            return Err(DsmError::Configuration(format!(
                "SQLite factory can not open '{}' data sources",
                params.driver
            )));
        }
        if params.url.is_empty() {
            return Err(DsmError::Configuration(
                "SQLite requires a database path. Example: url = \"/path/to/database.db\"".into(),
            ));
        }

        let conn = SqliteConnection::open_with_params(params).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            e
        })?;

        tracing::info!(path = %conn.path(), "SQLite connection created");
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsm_core::{Cursor, PreparedQuery, Value};

    #[tokio::test]
    async fn test_create_in_memory() {
        let factory = SqliteConnectionFactory::new();
        let conn = factory
            .create(&ConnectionParams::new("sqlite", ":memory:"))
            .await
            .expect("create");
        assert_eq!(conn.driver_name(), "sqlite");
        assert!(factory.validate(&*conn).await);
    }

    #[tokio::test]
    async fn test_rejects_other_drivers() {
        let err = SqliteConnectionFactory::new()
            .create(&ConnectionParams::new("postgres", "postgres://localhost"))
            .await
            .err().expect("expected error");
        assert!(matches!(err, DsmError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_requires_path() {
        let err = SqliteConnectionFactory::new()
            .create(&ConnectionParams::new("sqlite", ""))
            .await
            .err().expect("expected error");
        assert!(err.to_string().contains("database path"));
    }

    #[tokio::test]
    async fn test_file_database_is_shared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.db");
        let params = ConnectionParams::new("sqlite", path.to_string_lossy());
        let factory = SqliteConnectionFactory::new();

        let writer = factory.create(&params).await.expect("writer");
        let stmt = writer
            .prepare("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)")
            .await
            .expect("prepare");
        stmt.execute(&[]).await.expect("create table");

        let reader = factory.create(&params).await.expect("reader");
        let query = reader.prepare("SELECT count(*) FROM kv").await.expect("prepare");
        let mut cursor = query.open_cursor(&[]).await.expect("cursor");
        let row = cursor.next_row().await.expect("row").expect("some");
        assert_eq!(row.get(0).and_then(Value::as_i64), Some(0));
    }
}
