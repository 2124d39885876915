//! In-memory mock driver for exercising pools and sessions
//!
//! Every resource the mock hands out reports into a shared [`MockLedger`],
//! so tests can assert exactly how many connections, queries and cursors
//! were opened and closed. Failures can be switched on per resource kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dsm_core::{
    ConnectionFactory, ConnectionParams, Cursor, DsmError, PreparedQuery, RawConnection, Result,
    Row, Value,
};

/// Counters and failure switches shared by everything a [`MockFactory`] creates
#[derive(Debug, Default)]
pub struct MockLedger {
    pub connections_created: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub queries_prepared: AtomicUsize,
    pub queries_closed: AtomicUsize,
    pub cursors_opened: AtomicUsize,
    pub cursors_closed: AtomicUsize,
    pub fail_create: AtomicBool,
    /// Connections report themselves invalid while still open
    pub fail_validation: AtomicBool,
    pub fail_connection_close: AtomicBool,
    pub fail_query_close: AtomicBool,
    pub fail_cursor_close: AtomicBool,
}

impl MockLedger {
    pub fn created(&self) -> usize {
        self.connections_created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }

    /// Queries prepared but not yet closed
    pub fn open_queries(&self) -> usize {
        self.queries_prepared.load(Ordering::SeqCst) - self.queries_closed.load(Ordering::SeqCst)
    }

    /// Cursors opened but not yet closed
    pub fn open_cursors(&self) -> usize {
        self.cursors_opened.load(Ordering::SeqCst) - self.cursors_closed.load(Ordering::SeqCst)
    }
}

/// Factory producing [`MockConnection`]s
#[derive(Debug, Default, Clone)]
pub struct MockFactory {
    ledger: Arc<MockLedger>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> Arc<MockLedger> {
        Arc::clone(&self.ledger)
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn RawConnection>> {
        if self.ledger.fail_create.load(Ordering::SeqCst) {
            return Err(DsmError::ConnectionCreationFailed(format!(
                "mock refused connection to {}",
                params.url
            )));
        }
        let id = self.ledger.connections_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection::new(id, Arc::clone(&self.ledger))))
    }
}

/// Mock connection; `prepare` rejects any query containing `INVALID`
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    closed: AtomicBool,
    ledger: Arc<MockLedger>,
}

impl MockConnection {
    pub fn new(id: usize, ledger: Arc<MockLedger>) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            ledger,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl RawConnection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedQuery>> {
        if sql.contains("INVALID") {
            return Err(DsmError::Query(format!("syntax error near '{}'", sql)));
        }
        self.ledger.queries_prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockQuery {
            sql: sql.to_string(),
            closed: AtomicBool::new(false),
            ledger: Arc::clone(&self.ledger),
        }))
    }

    async fn is_valid(&self) -> bool {
        !self.is_closed() && !self.ledger.fail_validation.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger.connections_closed.fetch_add(1, Ordering::SeqCst);
        if self.ledger.fail_connection_close.load(Ordering::SeqCst) {
            return Err(DsmError::Other(format!("mock connection {} close failed", self.id)));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock prepared query; every cursor yields three single-column rows
#[derive(Debug)]
pub struct MockQuery {
    sql: String,
    closed: AtomicBool,
    ledger: Arc<MockLedger>,
}

#[async_trait]
impl PreparedQuery for MockQuery {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute(&self, _params: &[Value]) -> Result<u64> {
        Ok(1)
    }

    async fn open_cursor(&self, params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.ledger.cursors_opened.fetch_add(1, Ordering::SeqCst);
        let offset = params.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Box::new(MockCursor {
            columns: vec!["n".to_string()].into(),
            next: offset,
            end: offset + 3,
            closed: AtomicBool::new(false),
            ledger: Arc::clone(&self.ledger),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger.queries_closed.fetch_add(1, Ordering::SeqCst);
        if self.ledger.fail_query_close.load(Ordering::SeqCst) {
            return Err(DsmError::Other("mock query close failed".into()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockCursor {
    columns: Arc<[String]>,
    next: i64,
    end: i64,
    closed: AtomicBool,
    ledger: Arc<MockLedger>,
}

#[async_trait]
impl Cursor for MockCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.is_closed() {
            return Err(DsmError::Query("cursor is closed".into()));
        }
        if self.next >= self.end {
            return Ok(None);
        }
        let row = Row::new(Arc::clone(&self.columns), vec![Value::Int64(self.next)]);
        self.next += 1;
        Ok(Some(row))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger.cursors_closed.fetch_add(1, Ordering::SeqCst);
        if self.ledger.fail_cursor_close.load(Ordering::SeqCst) {
            return Err(DsmError::Other("mock cursor close failed".into()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
