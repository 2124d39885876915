//! Session implementation

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dsm_core::{Cursor, DsmError, PreparedQuery, Result, Row, Value};

use super::handles::{CursorHandle, QueryHandle, SessionId};
use crate::pool::{ConnectionPool, PooledConnection};

/// A prepared query and the cursors opened from it
struct OpenQuery {
    query: Box<dyn PreparedQuery>,
    cursors: BTreeMap<CursorHandle, Box<dyn Cursor>>,
}

/// A borrowed connection and the resources opened through it
///
/// A session is either open or closed. Every operation except
/// [`Session::close`] and [`Session::is_open`] fails with
/// [`DsmError::SessionClosed`] once it is closed.
///
/// A session is single-owner: mutating operations take `&mut self`.
/// Dropping an open session closes it on a background task.
pub struct Session {
    id: SessionId,
    pool: Arc<ConnectionPool>,
    /// `None` once closed
    connection: Option<PooledConnection>,
    queries: BTreeMap<QueryHandle, OpenQuery>,
    next_seq: u64,
}

impl Session {
    pub(crate) fn new(pool: Arc<ConnectionPool>, connection: PooledConnection) -> Self {
        let id = SessionId::new();
        tracing::debug!(session_id = %id, connection_id = %connection.id(), "session opened");
        Self {
            id,
            pool,
            connection: Some(connection),
            queries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// The borrowed connection, while the session is open
    pub fn connection(&self) -> Option<&PooledConnection> {
        self.connection.as_ref()
    }

    /// Number of prepared queries and cursors not yet released
    pub fn outstanding(&self) -> (usize, usize) {
        let cursors = self.queries.values().map(|q| q.cursors.len()).sum();
        (self.queries.len(), cursors)
    }

    fn live_connection(&self) -> Result<&PooledConnection> {
        self.connection.as_ref().ok_or(DsmError::SessionClosed)
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn open_query(&self, handle: &QueryHandle) -> Result<&OpenQuery> {
        self.live_connection()?;
        self.queries
            .get(handle)
            .ok_or_else(|| DsmError::Query(format!("{} is not open in this session", handle)))
    }

    fn open_cursor_mut(&mut self, handle: &CursorHandle) -> Result<&mut Box<dyn Cursor>> {
        self.live_connection()?;
        self.queries
            .get_mut(&handle.query())
            .and_then(|q| q.cursors.get_mut(handle))
            .ok_or_else(|| DsmError::Query(format!("{} is not open in this session", handle)))
    }

    /// Prepare a query on the session's connection
    ///
    /// The handle stays owned by the session until released through
    /// [`Session::release_query`] or [`Session::close`].
    #[tracing::instrument(skip(self), fields(session_id = %self.id))]
    pub async fn prepare(&mut self, sql: &str) -> Result<QueryHandle> {
        let conn = self.live_connection()?;
        if !conn.is_valid().await {
            return Err(DsmError::InvalidConnection(format!(
                "connection {} is no longer usable",
                conn.id()
            )));
        }

        let query = conn.prepare(sql).await.map_err(|e| {
            tracing::debug!(error = %e, "prepare failed");
            match e {
                DsmError::PrepareFailed(_) => e,
                other => DsmError::PrepareFailed(other.to_string()),
            }
        })?;

        let handle = QueryHandle::new(self.id, self.next_seq());
        self.queries.insert(
            handle,
            OpenQuery {
                query,
                cursors: BTreeMap::new(),
            },
        );
        tracing::trace!(query = %handle, "query prepared");
        Ok(handle)
    }

    /// Execute a prepared statement, returning the affected row count
    pub async fn execute(&self, query: &QueryHandle, params: &[Value]) -> Result<u64> {
        let open = self.open_query(query)?;
        open.query.execute(params).await
    }

    /// Run a prepared query and open a cursor over its result
    pub async fn open_cursor(
        &mut self,
        query: &QueryHandle,
        params: &[Value],
    ) -> Result<CursorHandle> {
        let cursor = self.open_query(query)?.query.open_cursor(params).await?;
        let handle = CursorHandle::new(*query, self.next_seq());
        if let Some(open) = self.queries.get_mut(query) {
            open.cursors.insert(handle, cursor);
        }
        Ok(handle)
    }

    /// Read the next row from a cursor
    pub async fn fetch(&mut self, cursor: &CursorHandle) -> Result<Option<Row>> {
        self.open_cursor_mut(cursor)?.next_row().await
    }

    /// Read every remaining row from a cursor
    pub async fn fetch_all(&mut self, cursor: &CursorHandle) -> Result<Vec<Row>> {
        let cursor = self.open_cursor_mut(cursor)?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close a single cursor
    ///
    /// Releasing an unknown or already released cursor is a no-op.
    pub async fn release_cursor(&mut self, cursor: CursorHandle) -> Result<()> {
        self.live_connection()?;
        let Some(open) = self
            .queries
            .get_mut(&cursor.query())
            .and_then(|q| q.cursors.remove(&cursor))
        else {
            return Ok(());
        };
        close_cursor(cursor, open.as_ref())
            .await
            .map_err(|e| DsmError::CleanupFailed(vec![e]))
    }

    /// Close a cursor (if given) and then the query it came from
    ///
    /// Cursors still open under the query are closed too, since the query
    /// can not outlive them. Each resource gets a close attempt even if an
    /// earlier one failed; failures are returned together as
    /// `CleanupFailed`. Handles that are unknown or already released are
    /// skipped.
    #[tracing::instrument(skip(self), fields(session_id = %self.id))]
    pub async fn release_query(
        &mut self,
        query: QueryHandle,
        cursor: Option<CursorHandle>,
    ) -> Result<()> {
        self.live_connection()?;
        let mut errors = Vec::new();

        if let Some(cursor) = cursor
            && let Some(open) = self
                .queries
                .get_mut(&cursor.query())
                .and_then(|q| q.cursors.remove(&cursor))
            && let Err(e) = close_cursor(cursor, open.as_ref()).await
        {
            errors.push(e);
        }

        if let Some(open) = self.queries.remove(&query) {
            errors.extend(close_query(query, open).await);
        }

        DsmError::from_cleanup(errors)
    }

    /// Release everything and give the connection back to its pool
    ///
    /// Queries and cursors that were never released are closed here. The
    /// connection is pooled again, or closed if the pool has been closed
    /// meanwhile. Closing an already closed session does nothing.
    #[tracing::instrument(skip(self), fields(session_id = %self.id))]
    pub async fn close(&mut self) -> Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        let queries = std::mem::take(&mut self.queries);
        finish(&self.pool, connection, queries).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let queries = std::mem::take(&mut self.queries);
        let pool = Arc::clone(&self.pool);
        let id = self.id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(session_id = %id, "session dropped while open, closing in background");
                handle.spawn(async move {
                    if let Err(e) = finish(&pool, connection, queries).await {
                        tracing::warn!(session_id = %id, error = %e, "background session close failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %id,
                    queries = queries.len(),
                    "session dropped outside a runtime, discarding its connection"
                );
                drop(queries);
                pool.forget(connection);
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (queries, cursors) = self.outstanding();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("queries", &queries)
            .field("cursors", &cursors)
            .finish()
    }
}

async fn finish(
    pool: &ConnectionPool,
    connection: PooledConnection,
    queries: BTreeMap<QueryHandle, OpenQuery>,
) -> Result<()> {
    if !queries.is_empty() {
        tracing::debug!(queries = queries.len(), "releasing queries left open");
    }

    let mut errors = Vec::new();
    for (handle, open) in queries {
        errors.extend(close_query(handle, open).await);
    }

    match pool.release(connection).await {
        Ok(()) => {}
        Err(DsmError::CleanupFailed(inner)) => errors.extend(inner),
        Err(e) => errors.push(e),
    }

    DsmError::from_cleanup(errors)
}

/// Close every cursor of a query, then the query itself
async fn close_query(handle: QueryHandle, open: OpenQuery) -> Vec<DsmError> {
    let mut errors = Vec::new();
    for (cursor, resource) in open.cursors {
        if let Err(e) = close_cursor(cursor, resource.as_ref()).await {
            errors.push(e);
        }
    }
    if !open.query.is_closed()
        && let Err(e) = open.query.close().await
    {
        tracing::warn!(query = %handle, error = %e, "failed to close prepared query");
        errors.push(e);
    }
    errors
}

async fn close_cursor(handle: CursorHandle, cursor: &dyn Cursor) -> Result<()> {
    if cursor.is_closed() {
        return Ok(());
    }
    cursor.close().await.map_err(|e| {
        tracing::warn!(cursor = %handle, error = %e, "failed to close cursor");
        e
    })
}
