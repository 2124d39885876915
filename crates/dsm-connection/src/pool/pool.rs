//! Connection pool implementation

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dsm_core::{ConnectionFactory, ConnectionParams, DsmError, RawConnection, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::PoolConfig;
use super::stats::PoolStats;
use crate::session::Session;

/// Identifies a pool instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(Uuid);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a raw connection for as long as some pool tracks it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Internal wrapper for idle connections with metadata
struct IdleConnection {
    id: ConnectionId,
    connection: Arc<dyn RawConnection>,
    created_at: Instant,
    last_used_at: Instant,
}

/// Everything guarded by the pool lock
struct PoolState {
    config: PoolConfig,
    idle: VecDeque<IdleConnection>,
    active: HashSet<ConnectionId>,
    /// Slots reserved for connections the factory is still creating
    pending: usize,
    closed: bool,
}

impl PoolState {
    fn occupied(&self) -> usize {
        self.active.len() + self.pending
    }
}

/// What `try_borrow` decided while holding the lock
enum Acquire {
    Idle(IdleConnection, PoolConfig),
    Create,
}

/// What `release` decided while holding the lock
enum Disposal {
    Pooled,
    Close(Arc<dyn RawConnection>),
    Discard,
}

/// A bounded pool of raw connections
///
/// The pool keeps at most `max_idle` idle connections and lends out at
/// most `max_active` at a time. Borrowing fails fast with
/// [`DsmError::PoolExhausted`] unless an acquire timeout is configured.
///
/// A single lock guards the idle set and counters. It is never held while
/// the factory creates a connection or while a connection is closed.
pub struct ConnectionPool {
    id: PoolId,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Parameters handed to the factory
    params: ConnectionParams,
    state: Mutex<PoolState>,
    /// Signalled whenever a slot may have freed up
    released: Notify,
    /// Number of callers waiting for a connection
    waiting: AtomicUsize,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    ///
    /// Fails with a `Configuration` error when the bounds are inconsistent.
    pub fn new<F: ConnectionFactory>(
        config: PoolConfig,
        factory: F,
        params: ConnectionParams,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: PoolId(Uuid::new_v4()),
            factory: Arc::new(factory),
            params,
            state: Mutex::new(PoolState {
                config,
                idle: VecDeque::new(),
                active: HashSet::new(),
                pending: 0,
                closed: false,
            }),
            released: Notify::new(),
            waiting: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Parameters the factory is called with
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Get a copy of the current configuration
    pub fn config(&self) -> PoolConfig {
        self.state.lock().config.clone()
    }

    /// Replace the pool bounds
    ///
    /// Existing idle connections above the new `max_idle` are kept until
    /// `reset`; later borrow and release decisions use the new bounds.
    #[tracing::instrument(skip(self, config), fields(pool_id = %self.id))]
    pub fn configure(&self, config: PoolConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(
            min_idle = config.min_idle(),
            max_idle = config.max_idle(),
            max_active = config.max_active(),
            "reconfiguring pool"
        );
        self.state.lock().config = config;
        // A larger max_active may let waiters through
        self.released.notify_waiters();
        Ok(())
    }

    /// Borrow a connection from the pool
    ///
    /// This will:
    /// 1. Hand out a validated idle connection if there is one
    /// 2. Otherwise create a new connection if fewer than `max_active` are borrowed
    /// 3. Otherwise fail with `PoolExhausted`, or wait up to the configured
    ///    acquire timeout for a release
    pub async fn borrow(&self) -> Result<PooledConnection> {
        let timeout = self.state.lock().config.acquire_timeout();
        match timeout {
            None => self.try_borrow().await,
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.wait_for_slot(None)).await {
                    Ok(result) => result,
                    Err(_) => Err(DsmError::Timeout(format!(
                        "Timed out waiting for connection (timeout: {:?})",
                        timeout
                    ))),
                }
            }
        }
    }

    /// Borrow a connection, waiting for a release until `cancel` fires
    ///
    /// Ignores the configured acquire timeout; the token alone decides when
    /// to give up.
    pub async fn borrow_cancellable(&self, cancel: &CancellationToken) -> Result<PooledConnection> {
        self.wait_for_slot(Some(cancel)).await
    }

    async fn wait_for_slot(&self, cancel: Option<&CancellationToken>) -> Result<PooledConnection> {
        let _waiting = WaitingGuard::new(&self.waiting);

        loop {
            // Register interest before trying so a release in between is not missed
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_borrow().await {
                Err(DsmError::PoolExhausted { .. }) => {}
                other => return other,
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = token.cancelled() => return Err(DsmError::Cancelled),
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Non-blocking borrow
    #[tracing::instrument(skip(self), fields(pool_id = %self.id))]
    pub async fn try_borrow(&self) -> Result<PooledConnection> {
        loop {
            let acquire = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(DsmError::PoolClosed);
                }
                let max_active = state.config.max_active();
                if state.occupied() >= max_active {
                    tracing::debug!(max_active, "pool exhausted");
                    return Err(DsmError::PoolExhausted { max_active });
                }
                match state.idle.pop_front() {
                    Some(idle) => {
                        state.active.insert(idle.id);
                        Acquire::Idle(idle, state.config.clone())
                    }
                    None => {
                        state.pending += 1;
                        Acquire::Create
                    }
                }
            };

            match acquire {
                Acquire::Idle(idle, config) => {
                    let mut slot = SlotGuard::active(self, idle.id);
                    if let Some(reason) = self.reject_reason(&idle, &config).await {
                        tracing::debug!(connection_id = %idle.id, reason, "discarding idle connection");
                        drop(slot);
                        let _ = close_connection(idle.id, &idle.connection).await;
                        continue;
                    }
                    slot.disarm();
                    tracing::trace!(connection_id = %idle.id, "reusing idle connection");
                    return Ok(PooledConnection {
                        id: idle.id,
                        pool_id: self.id,
                        connection: idle.connection,
                        created_at: idle.created_at,
                    });
                }
                Acquire::Create => return self.create_active().await,
            }
        }
    }

    /// Check an idle connection before handing it out
    async fn reject_reason(
        &self,
        idle: &IdleConnection,
        config: &PoolConfig,
    ) -> Option<&'static str> {
        if let Some(max_lifetime) = config.max_lifetime()
            && idle.created_at.elapsed() > max_lifetime
        {
            return Some("max lifetime exceeded");
        }
        if idle.last_used_at.elapsed() > config.idle_timeout() {
            return Some("idle timeout exceeded");
        }
        if !self.factory.validate(&*idle.connection).await {
            return Some("validation failed");
        }
        None
    }

    /// Create a connection for a slot already reserved in `pending`
    async fn create_active(&self) -> Result<PooledConnection> {
        let mut slot = SlotGuard::pending(self);
        let connection = match self.factory.create(&self.params).await {
            Ok(connection) => connection,
            Err(e) => {
                drop(slot);
                tracing::error!(error = %e, "failed to create connection");
                return Err(creation_failed(e));
            }
        };

        let id = ConnectionId::new();
        let accepted = {
            let mut state = self.state.lock();
            state.pending -= 1;
            slot.disarm();
            if !state.closed {
                state.active.insert(id);
                tracing::debug!(connection_id = %id, active = state.active.len(), "created connection");
            }
            !state.closed
        };

        if !accepted {
            self.released.notify_one();
            let _ = close_connection(id, &connection).await;
            return Err(DsmError::PoolClosed);
        }
        Ok(PooledConnection {
            id,
            pool_id: self.id,
            connection,
            created_at: Instant::now(),
        })
    }

    /// Return a borrowed connection
    ///
    /// The connection is kept idle when there is room under `max_idle`, and
    /// closed otherwise or when the pool has been closed. A connection this
    /// pool is not currently lending out is rejected with `UnknownConnection`
    /// and left untouched.
    #[tracing::instrument(skip(self, conn), fields(pool_id = %self.id, connection_id = %conn.id))]
    pub async fn release(&self, conn: PooledConnection) -> Result<()> {
        let disposal = {
            let mut state = self.state.lock();
            if conn.pool_id != self.id || !state.active.remove(&conn.id) {
                tracing::warn!("release of a connection this pool did not lend out");
                return Err(DsmError::UnknownConnection(conn.id.to_string()));
            }

            if state.closed {
                Disposal::Close(conn.connection)
            } else if conn.connection.is_closed() {
                Disposal::Discard
            } else if state.idle.len() < state.config.max_idle() {
                state.idle.push_back(IdleConnection {
                    id: conn.id,
                    connection: conn.connection,
                    created_at: conn.created_at,
                    last_used_at: Instant::now(),
                });
                Disposal::Pooled
            } else {
                Disposal::Close(conn.connection)
            }
        };
        self.released.notify_one();

        match disposal {
            Disposal::Pooled => {
                tracing::trace!("connection returned to idle set");
                Ok(())
            }
            Disposal::Discard => {
                tracing::debug!("dropping connection closed by its driver");
                Ok(())
            }
            Disposal::Close(connection) => close_connection(conn.id, &connection)
                .await
                .map_err(|e| DsmError::CleanupFailed(vec![e])),
        }
    }

    /// Stop tracking a borrowed connection without closing it
    ///
    /// Used when a connection can not be returned through the async path.
    pub(crate) fn forget(&self, conn: PooledConnection) {
        let removed = {
            let mut state = self.state.lock();
            conn.pool_id == self.id && state.active.remove(&conn.id)
        };
        if removed {
            tracing::warn!(pool_id = %self.id, connection_id = %conn.id, "connection detached from pool without close");
            self.released.notify_one();
        }
    }

    /// Close every idle connection
    ///
    /// Borrowed connections are not affected. Every idle connection gets a
    /// close attempt; failures are collected into `CleanupFailed`.
    #[tracing::instrument(skip(self), fields(pool_id = %self.id))]
    pub async fn reset(&self) -> Result<()> {
        let drained: Vec<IdleConnection> = {
            let mut state = self.state.lock();
            state.idle.drain(..).collect()
        };
        if drained.is_empty() {
            return Ok(());
        }

        tracing::info!(count = drained.len(), "closing idle connections");
        let mut errors = Vec::new();
        for idle in drained {
            if let Err(e) = close_connection(idle.id, &idle.connection).await {
                errors.push(e);
            }
        }
        DsmError::from_cleanup(errors)
    }

    /// Reset the pool and refuse every later borrow
    ///
    /// Borrowed connections stay with their owners and are closed when
    /// released. Calling this twice is harmless.
    #[tracing::instrument(skip(self), fields(pool_id = %self.id))]
    pub async fn close(&self) -> Result<()> {
        let was_closed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.closed, true)
        };
        if !was_closed {
            tracing::info!(active = self.stats().active(), "closing pool");
            self.released.notify_waiters();
        }
        self.reset().await
    }

    /// Eagerly open connections until `min_idle` are idle
    ///
    /// Never grows the idle set beyond `max_idle`, nor the number of open
    /// connections (borrowed, being created and idle) beyond `max_active`.
    /// Returns how many connections were created.
    #[tracing::instrument(skip(self), fields(pool_id = %self.id))]
    pub async fn fill_idle(&self) -> Result<usize> {
        let mut created = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(DsmError::PoolClosed);
                }
                let target = state.config.min_idle().min(state.config.max_idle());
                let room = state
                    .config
                    .max_active()
                    .saturating_sub(state.occupied() + state.idle.len());
                if target.saturating_sub(state.idle.len()).min(room) == 0 {
                    break;
                }
                state.pending += 1;
            }

            let mut slot = SlotGuard::pending(self);
            let connection = match self.factory.create(&self.params).await {
                Ok(connection) => connection,
                Err(e) => {
                    drop(slot);
                    tracing::error!(error = %e, "failed to create idle connection");
                    return Err(creation_failed(e));
                }
            };
            let id = ConnectionId::new();
            let now = Instant::now();

            let leftover = {
                let mut state = self.state.lock();
                state.pending -= 1;
                slot.disarm();
                if state.closed || state.idle.len() >= state.config.max_idle() {
                    Some(connection)
                } else {
                    state.idle.push_back(IdleConnection {
                        id,
                        connection,
                        created_at: now,
                        last_used_at: now,
                    });
                    None
                }
            };
            self.released.notify_one();
            match leftover {
                Some(connection) => {
                    let _ = close_connection(id, &connection).await;
                    break;
                }
                None => created += 1,
            }
        }
        tracing::debug!(created, "idle set filled");
        Ok(created)
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats::new(
            state.idle.len(),
            state.active.len(),
            self.waiting.load(Ordering::SeqCst),
            state.closed,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Borrow a connection and wrap it in a session
    pub async fn session(self: &Arc<Self>) -> Result<Session> {
        let conn = self.borrow().await?;
        Ok(Session::new(Arc::clone(self), conn))
    }

    /// Like [`ConnectionPool::session`], waiting until `cancel` fires
    pub async fn session_cancellable(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        let conn = self.borrow_cancellable(cancel).await?;
        Ok(Session::new(Arc::clone(self), conn))
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn creation_failed(error: DsmError) -> DsmError {
    match error {
        DsmError::ConnectionCreationFailed(_) => error,
        other => DsmError::ConnectionCreationFailed(other.to_string()),
    }
}

async fn close_connection(id: ConnectionId, connection: &Arc<dyn RawConnection>) -> Result<()> {
    if connection.is_closed() {
        return Ok(());
    }
    connection.close().await.map_err(|e| {
        tracing::warn!(connection_id = %id, error = %e, "failed to close connection");
        e
    })
}

/// A slot taken under the lock that must be given back if the borrow is
/// abandoned before the connection reaches its caller
enum Reservation {
    Pending,
    Active(ConnectionId),
}

struct SlotGuard<'a> {
    pool: &'a ConnectionPool,
    reservation: Option<Reservation>,
}

impl<'a> SlotGuard<'a> {
    fn pending(pool: &'a ConnectionPool) -> Self {
        Self {
            pool,
            reservation: Some(Reservation::Pending),
        }
    }

    fn active(pool: &'a ConnectionPool, id: ConnectionId) -> Self {
        Self {
            pool,
            reservation: Some(Reservation::Active(id)),
        }
    }

    fn disarm(&mut self) {
        self.reservation = None;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        {
            let mut state = self.pool.state.lock();
            match reservation {
                Reservation::Pending => state.pending -= 1,
                Reservation::Active(id) => {
                    state.active.remove(&id);
                }
            }
        }
        self.pool.released.notify_one();
    }
}

/// Keeps the waiting counter accurate even when a wait is abandoned
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection borrowed from a [`ConnectionPool`]
///
/// Hand it back with [`ConnectionPool::release`]. Sessions do this for you.
pub struct PooledConnection {
    id: ConnectionId,
    pool_id: PoolId,
    connection: Arc<dyn RawConnection>,
    created_at: Instant,
}

impl PooledConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The pool this connection was borrowed from
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn RawConnection> {
        &self.connection
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl Deref for PooledConnection {
    type Target = dyn RawConnection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("driver", &self.connection.driver_name())
            .finish()
    }
}
