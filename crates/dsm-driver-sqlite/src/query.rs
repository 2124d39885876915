//! Prepared queries and cursors over a SQLite connection

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dsm_core::{Cursor, DsmError, PreparedQuery, Result, Row, Value};
use rusqlite::params_from_iter;

use crate::connection::{SharedConnection, with_connection};

/// A statement prepared on a [`crate::SqliteConnection`]
///
/// The compiled statement lives in rusqlite's per-connection cache; this
/// handle only remembers the text.
pub struct SqliteQuery {
    conn: SharedConnection,
    sql: String,
    closed: AtomicBool,
}

impl SqliteQuery {
    pub(crate) fn new(conn: SharedConnection, sql: &str) -> Self {
        Self {
            conn,
            sql: sql.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DsmError::Query("prepared query is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PreparedQuery for SqliteQuery {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let rusqlite_params = values_to_rusqlite(params);
        with_connection(&self.conn, |conn| {
            let mut stmt = conn
                .prepare_cached(&self.sql)
                .map_err(|e| DsmError::Query(format!("Failed to prepare statement: {}", e)))?;
            let rows_affected = stmt
                .execute(params_from_iter(rusqlite_params.iter()))
                .map_err(|e| DsmError::Query(format!("Failed to execute statement: {}", e)))?;
            tracing::debug!(affected_rows = rows_affected, "statement executed");
            Ok(rows_affected as u64)
        })
    }

    async fn open_cursor(&self, params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.ensure_open()?;
        let rusqlite_params = values_to_rusqlite(params);
        let cursor = with_connection(&self.conn, |conn| {
            let mut stmt = conn
                .prepare_cached(&self.sql)
                .map_err(|e| DsmError::Query(format!("Failed to prepare query: {}", e)))?;
            let columns: Arc<[String]> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            let mut rows = VecDeque::new();
            let mut query_rows = stmt
                .query(params_from_iter(rusqlite_params.iter()))
                .map_err(|e| DsmError::Query(format!("Failed to execute query: {}", e)))?;
            while let Some(row) = query_rows
                .next()
                .map_err(|e| DsmError::Query(format!("Failed to fetch row: {}", e)))?
            {
                let values = (0..columns.len())
                    .map(|i| rusqlite_to_value(row, i))
                    .collect::<Result<Vec<_>>>()?;
                rows.push_back(Row::new(Arc::clone(&columns), values));
            }

            tracing::debug!(row_count = rows.len(), "query executed");
            Ok(SqliteCursor {
                columns,
                rows,
                closed: AtomicBool::new(false),
            })
        })?;
        Ok(Box::new(cursor))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Rows produced by a [`SqliteQuery`], buffered when the cursor opens
pub struct SqliteCursor {
    columns: Arc<[String]>,
    rows: VecDeque<Row>,
    closed: AtomicBool,
}

#[async_trait]
impl Cursor for SqliteCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.is_closed() {
            return Err(DsmError::Query("cursor is closed".into()));
        }
        Ok(self.rows.pop_front())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| DsmError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}
