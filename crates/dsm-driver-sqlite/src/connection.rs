//! SQLite connection implementation

use async_trait::async_trait;
use dsm_core::{ConnectionParams, DsmError, PreparedQuery, RawConnection, Result};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::sync::Arc;
use std::time::Duration;

use crate::query::SqliteQuery;

/// The rusqlite handle shared by a connection and its prepared queries;
/// `None` once the connection has been closed
pub(crate) type SharedConnection = Arc<Mutex<Option<RusqliteConnection>>>;

/// Run `f` against the live rusqlite connection
pub(crate) fn with_connection<T>(
    conn: &SharedConnection,
    f: impl FnOnce(&RusqliteConnection) -> Result<T>,
) -> Result<T> {
    let guard = conn.lock();
    let conn = guard
        .as_ref()
        .ok_or_else(|| DsmError::InvalidConnection("SQLite connection is closed".into()))?;
    f(conn)
}

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: SharedConnection,
    path: String,
}

impl SqliteConnection {
    /// Open a SQLite database with default options
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_params(&ConnectionParams::new("sqlite", path))
    }

    /// Open the database at `params.url`
    ///
    /// Recognised options:
    /// - `busy_timeout_ms`: how long to wait on a locked database
    /// - `foreign_keys`: `on` (default) or `off`
    pub fn open_with_params(params: &ConnectionParams) -> Result<Self> {
        let path = params.url.as_str();
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                DsmError::ConnectionCreationFailed(format!(
                    "Failed to open in-memory database: {}",
                    e
                ))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(DsmError::ConnectionCreationFailed(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                DsmError::ConnectionCreationFailed(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        let foreign_keys = match params.option("foreign_keys") {
            None => true,
            Some(v) if v.eq_ignore_ascii_case("on") || v == "1" || v == "true" => true,
            Some(v) if v.eq_ignore_ascii_case("off") || v == "0" || v == "false" => false,
            Some(v) => {
                return Err(DsmError::Configuration(format!(
                    "Invalid foreign_keys option: {}",
                    v
                )));
            }
        };
        conn.pragma_update(None, "foreign_keys", if foreign_keys { "ON" } else { "OFF" })
            .map_err(|e| {
                DsmError::ConnectionCreationFailed(format!("Failed to set foreign keys: {}", e))
            })?;

        if let Some(raw) = params.option("busy_timeout_ms") {
            let ms = raw.parse::<u64>().map_err(|_| {
                DsmError::Configuration(format!("Invalid busy_timeout_ms option: {}", raw))
            })?;
            conn.busy_timeout(Duration::from_millis(ms)).map_err(|e| {
                DsmError::ConnectionCreationFailed(format!("Failed to set busy timeout: {}", e))
            })?;
        }

        tracing::debug!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: expanded_path,
        })
    }

    /// Expand `~/` and make relative paths absolute
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or_else(|| {
                DsmError::Configuration("Unable to determine HOME directory".into())
            })?;
            home.join(rest).to_string_lossy().to_string()
        } else if path.starts_with('~') {
            return Err(DsmError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        let result = if path_buf.is_relative() {
            std::env::current_dir()?
                .join(path_buf)
                .to_string_lossy()
                .to_string()
        } else {
            expanded
        };

        Ok(result)
    }

    /// The resolved database path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run several statements at once, e.g. a schema script
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("executing SQL batch");
        with_connection(&self.conn, |conn| {
            conn.execute_batch(sql)
                .map_err(|e| DsmError::Query(format!("Failed to execute batch: {}", e)))
        })
    }
}

#[async_trait]
impl RawConnection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedQuery>> {
        // Compile once up front so syntax errors surface here; the cached
        // statement is reused on execution
        with_connection(&self.conn, |conn| {
            conn.prepare_cached(sql)
                .map(|_| ())
                .map_err(|e| DsmError::PrepareFailed(e.to_string()))
        })?;
        Ok(Box::new(SqliteQuery::new(Arc::clone(&self.conn), sql)))
    }

    async fn is_valid(&self) -> bool {
        with_connection(&self.conn, |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| DsmError::Query(e.to_string()))
        })
        .is_ok()
    }

    async fn close(&self) -> Result<()> {
        let taken = self.conn.lock().take();
        if let Some(conn) = taken {
            tracing::debug!(path = %self.path, "closing SQLite connection");
            conn.close().map_err(|(_, e)| {
                DsmError::Other(format!("Failed to close SQLite connection: {}", e))
            })?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsm_core::{Cursor, Value};

    #[tokio::test]
    async fn test_prepare_execute_and_read() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .expect("schema");

        let insert = conn.prepare("INSERT INTO t (name) VALUES (?1)").await.expect("prepare");
        assert_eq!(insert.execute(&[Value::from("a")]).await.expect("insert"), 1);
        assert_eq!(insert.execute(&[Value::from("b")]).await.expect("insert"), 1);

        let select = conn.prepare("SELECT id, name FROM t ORDER BY id").await.expect("prepare");
        let mut cursor = select.open_cursor(&[]).await.expect("cursor");
        assert_eq!(cursor.columns(), ["id".to_string(), "name".to_string()]);

        let first = cursor.next_row().await.expect("row").expect("some");
        assert_eq!(first.get_by_name("name"), Some(&Value::from("a")));
        assert!(cursor.next_row().await.expect("row").is_some());
        assert!(cursor.next_row().await.expect("row").is_none());
    }

    #[tokio::test]
    async fn test_prepare_syntax_error() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        let err = conn.prepare("SELEC nonsense").await.err().expect("expected error");
        assert!(matches!(err, DsmError::PrepareFailed(_)));
    }

    #[tokio::test]
    async fn test_close_invalidates_connection_and_queries() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        let query = conn.prepare("SELECT 1").await.expect("prepare");
        assert!(conn.is_valid().await);

        conn.close().await.expect("close");
        conn.close().await.expect("close twice");
        assert!(conn.is_closed());
        assert!(!conn.is_valid().await);

        let err = query.open_cursor(&[]).await.err().expect("expected error");
        assert!(matches!(err, DsmError::InvalidConnection(_)));
    }

    #[test]
    fn test_open_missing_parent_dir() {
        let err = SqliteConnection::open("/definitely/not/here/db.sqlite").unwrap_err();
        assert!(err.to_string().contains("Parent directory does not exist"));
    }

    #[test]
    fn test_invalid_busy_timeout_option() {
        let params =
            ConnectionParams::new("sqlite", ":memory:").with_option("busy_timeout_ms", "soon");
        let err = SqliteConnection::open_with_params(&params).unwrap_err();
        assert!(matches!(err, DsmError::Configuration(_)));
    }
}
