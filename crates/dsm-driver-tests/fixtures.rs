//! Core test fixtures for parameterized driver testing.
//!
//! Tests use the [`TestDriver`] enum to pick a backing driver and
//! [`test_manager`] to get a ready [`ConnectionManager`] over it. Every
//! driver exposes the same seeded `numbers` table holding `0`, `1` and `2`,
//! so a single test body can run against all of them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dsm_driver_tests::fixtures::{TestDriver, test_manager};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[case::mock(TestDriver::Mock)]
//! #[case::sqlite(TestDriver::Sqlite)]
//! #[tokio::test]
//! async fn test_read_numbers(#[case] driver: TestDriver) -> anyhow::Result<()> {
//!     let manager = test_manager(driver, PoolConfig::new(0, 2))?;
//!     let mut session = manager.get_session().await?;
//!     let query = session.prepare(NUMBERS_QUERY).await?;
//!     // test code...
//!     Ok(())
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;

use anyhow::{Context, Result};
use dsm_connection::testing::{MockFactory, MockLedger};
use dsm_connection::{ConnectionManager, PoolConfig};
use dsm_core::ConnectionParams;
use dsm_driver_sqlite::{SqliteConnection, SqliteConnectionFactory};
use tempfile::TempDir;

/// Query returning the seeded rows `0`, `1`, `2` in column `n`
pub const NUMBERS_QUERY: &str = "SELECT n FROM numbers ORDER BY n";

/// Statement inserting one row into `numbers`
pub const INSERT_NUMBER: &str = "INSERT INTO numbers (n) VALUES (?1)";

/// A query every driver rejects at prepare time
pub const INVALID_QUERY: &str = "INVALID STATEMENT";

const SQLITE_SCHEMA: &str = "
    CREATE TABLE numbers (n INTEGER NOT NULL);
    INSERT INTO numbers (n) VALUES (0), (1), (2);
";

/// Test driver identifier for parameterized testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestDriver {
    /// In-memory mock that records every open and close
    Mock,
    /// SQLite on a temporary database file
    Sqlite,
}

impl TestDriver {
    /// Get the driver name as a string
    pub fn name(&self) -> &'static str {
        match self {
            TestDriver::Mock => "mock",
            TestDriver::Sqlite => "sqlite",
        }
    }

    /// Get the display name
    pub fn display_name(&self) -> &'static str {
        match self {
            TestDriver::Mock => "Mock",
            TestDriver::Sqlite => "SQLite",
        }
    }
}

/// A manager plus whatever keeps its backing store alive
pub struct TestManager {
    manager: ConnectionManager,
    ledger: Option<Arc<MockLedger>>,
    _db_dir: Option<TempDir>,
}

impl TestManager {
    /// Resource counters, for the mock driver only
    pub fn ledger(&self) -> Option<&MockLedger> {
        self.ledger.as_deref()
    }
}

impl Deref for TestManager {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Connection parameters and a kept-alive temp dir for a seeded SQLite file
pub fn sqlite_database() -> Result<(ConnectionParams, TempDir)> {
    let dir = tempfile::tempdir().context("failed to create temp directory")?;
    let path = dir.path().join("dsm-test.db");
    let path = path.to_str().context("invalid SQLite path")?.to_string();

    let seed = SqliteConnection::open(&path).context("failed to create SQLite database")?;
    seed.execute_batch(SQLITE_SCHEMA)
        .context("failed to seed SQLite database")?;
    drop(seed);

    tracing::debug!(path = %path, "seeded SQLite test database");
    Ok((ConnectionParams::new("sqlite", path), dir))
}

/// Create a connection manager over the given driver
pub fn test_manager(driver: TestDriver, config: PoolConfig) -> Result<TestManager> {
    initialize_logging();
    tracing::debug!(driver = driver.name(), "creating test manager");

    match driver {
        TestDriver::Mock => {
            let factory = MockFactory::new();
            let ledger = factory.ledger();
            let params = ConnectionParams::new("mock", "mock://test");
            let manager = ConnectionManager::new(factory, params, config)
                .context("failed to create mock manager")?;
            Ok(TestManager {
                manager,
                ledger: Some(ledger),
                _db_dir: None,
            })
        }
        TestDriver::Sqlite => {
            let (params, dir) = sqlite_database()?;
            let manager = ConnectionManager::new(SqliteConnectionFactory::new(), params, config)
                .context("failed to create SQLite manager")?;
            Ok(TestManager {
                manager,
                ledger: None,
                _db_dir: Some(dir),
            })
        }
    }
}

/// Returns every test driver
pub fn all_drivers() -> Vec<TestDriver> {
    vec![TestDriver::Mock, TestDriver::Sqlite]
}

/// Initialize logging for tests if not already initialized
///
/// This sets up tracing with appropriate filters for test output.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("dsm_connection=debug,dsm_driver_tests=debug")
        });
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_names() {
        assert_eq!(TestDriver::Mock.name(), "mock");
        assert_eq!(TestDriver::Sqlite.display_name(), "SQLite");
        assert_eq!(all_drivers().len(), 2);
    }

    #[test]
    fn test_sqlite_database_is_seeded() {
        let (params, dir) = sqlite_database().expect("database");
        assert!(dir.path().join("dsm-test.db").exists());
        assert_eq!(params.driver, "sqlite");
    }
}
