//! Tests for sessions and the resources they own

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dsm_core::{ConnectionParams, DsmError, Value};
use pretty_assertions::assert_eq;

use crate::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::testing::{MockFactory, MockLedger};

fn pool() -> (Arc<ConnectionPool>, Arc<MockLedger>) {
    let factory = MockFactory::new();
    let ledger = factory.ledger();
    let pool = ConnectionPool::new(
        PoolConfig::new(0, 4),
        factory,
        ConnectionParams::new("mock", "mock://local"),
    )
    .expect("valid config");
    (Arc::new(pool), ledger)
}

#[tokio::test]
async fn test_session_borrows_one_connection() {
    let (pool, _) = pool();
    let session = pool.session().await.expect("session");

    assert!(session.is_open());
    assert_eq!(pool.stats().active(), 1);
    assert_eq!(session.outstanding(), (0, 0));
    assert_eq!(session.connection().map(|c| c.pool_id()), Some(pool.id()));
}

#[tokio::test]
async fn test_prepare_and_read_cursor() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");

    let query = session.prepare("SELECT n FROM numbers").await.expect("prepare");
    assert_eq!(query.session(), session.id());

    let cursor = session.open_cursor(&query, &[Value::Int64(10)]).await.expect("cursor");
    assert_eq!(cursor.query(), query);

    let first = session.fetch(&cursor).await.expect("fetch").expect("row");
    assert_eq!(first.get_by_name("n"), Some(&Value::Int64(10)));

    let rest = session.fetch_all(&cursor).await.expect("fetch all");
    assert_eq!(rest.len(), 2);
    assert!(session.fetch(&cursor).await.expect("fetch").is_none());

    assert_eq!(session.outstanding(), (1, 1));
    assert_eq!(ledger.open_queries(), 1);
    assert_eq!(ledger.open_cursors(), 1);
}

#[tokio::test]
async fn test_execute_prepared_statement() {
    let (pool, _) = pool();
    let mut session = pool.session().await.expect("session");
    let stmt = session.prepare("DELETE FROM jobs").await.expect("prepare");

    assert_eq!(session.execute(&stmt, &[]).await.expect("execute"), 1);
}

#[tokio::test]
async fn test_prepare_failure_keeps_session_open() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");

    let err = session.prepare("INVALID QUERY").await.unwrap_err();
    assert!(matches!(err, DsmError::PrepareFailed(_)));
    assert!(err.to_string().contains("syntax error"));

    assert!(session.is_open());
    assert_eq!(session.outstanding(), (0, 0));
    assert_eq!(ledger.open_queries(), 0);
    session.prepare("SELECT 1").await.expect("prepare after failure");
}

#[tokio::test]
async fn test_prepare_on_invalid_connection() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");

    ledger.fail_validation.store(true, Ordering::SeqCst);
    let err = session.prepare("SELECT 1").await.unwrap_err();
    assert!(matches!(err, DsmError::InvalidConnection(_)));
    assert_eq!(ledger.open_queries(), 0);
}

#[tokio::test]
async fn test_release_query_with_cursor() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    let query = session.prepare("SELECT n FROM numbers").await.expect("prepare");
    let cursor = session.open_cursor(&query, &[]).await.expect("cursor");

    session.release_query(query, Some(cursor)).await.expect("release");

    assert_eq!(session.outstanding(), (0, 0));
    assert_eq!(ledger.open_queries(), 0);
    assert_eq!(ledger.open_cursors(), 0);
    assert!(session.is_open());

    let err = session.fetch(&cursor).await.unwrap_err();
    assert!(matches!(err, DsmError::Query(_)));
}

#[tokio::test]
async fn test_release_query_closes_remaining_cursors() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    let query = session.prepare("SELECT n FROM numbers").await.expect("prepare");
    let first = session.open_cursor(&query, &[]).await.expect("cursor 1");
    let _second = session.open_cursor(&query, &[]).await.expect("cursor 2");

    session.release_query(query, Some(first)).await.expect("release");
    assert_eq!(ledger.open_cursors(), 0);
    assert_eq!(ledger.open_queries(), 0);
}

#[tokio::test]
async fn test_release_query_without_cursor() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    let keep = session.prepare("SELECT 1").await.expect("prepare 1");
    let drop_me = session.prepare("SELECT 2").await.expect("prepare 2");

    session.release_query(drop_me, None).await.expect("release");
    assert_eq!(session.outstanding(), (1, 0));
    assert_eq!(ledger.open_queries(), 1);
    session.execute(&keep, &[]).await.expect("other query still usable");
}

#[tokio::test]
async fn test_release_unknown_handles_is_noop() {
    let (pool, ledger) = pool();
    let mut other = pool.session().await.expect("other session");
    let foreign = other.prepare("SELECT 1").await.expect("prepare");

    let mut session = pool.session().await.expect("session");
    session.release_query(foreign, None).await.expect("noop");
    assert_eq!(ledger.open_queries(), 1);

    // Releasing twice is also a no-op
    other.release_query(foreign, None).await.expect("release");
    other.release_query(foreign, None).await.expect("release again");
    assert_eq!(ledger.open_queries(), 0);
}

#[tokio::test]
async fn test_release_cursor_keeps_query() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    let query = session.prepare("SELECT n FROM numbers").await.expect("prepare");
    let cursor = session.open_cursor(&query, &[]).await.expect("cursor");

    session.release_cursor(cursor).await.expect("release cursor");
    assert_eq!(session.outstanding(), (1, 0));
    assert_eq!(ledger.open_cursors(), 0);
    assert_eq!(ledger.open_queries(), 1);
}

#[tokio::test]
async fn test_release_query_reports_every_failure() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    let query = session.prepare("SELECT n FROM numbers").await.expect("prepare");
    let cursor = session.open_cursor(&query, &[]).await.expect("cursor");

    ledger.fail_cursor_close.store(true, Ordering::SeqCst);
    ledger.fail_query_close.store(true, Ordering::SeqCst);
    let err = session.release_query(query, Some(cursor)).await.unwrap_err();

    // Both closes were attempted and both failures surfaced
    assert_eq!(err.cleanup_errors().len(), 2);
    assert_eq!(ledger.open_cursors(), 0);
    assert_eq!(ledger.open_queries(), 0);
    assert_eq!(session.outstanding(), (0, 0));
}

#[tokio::test]
async fn test_close_releases_everything() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    let q1 = session.prepare("SELECT n FROM a").await.expect("prepare 1");
    let q2 = session.prepare("SELECT n FROM b").await.expect("prepare 2");
    session.open_cursor(&q1, &[]).await.expect("cursor 1");
    session.open_cursor(&q2, &[]).await.expect("cursor 2");

    session.close().await.expect("close");

    assert!(!session.is_open());
    assert_eq!(ledger.open_queries(), 0);
    assert_eq!(ledger.open_cursors(), 0);
    assert_eq!(ledger.closed(), 0);
    assert_eq!(pool.stats(), PoolStats::new(1, 0, 0, false));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (pool, _) = pool();
    let mut session = pool.session().await.expect("session");

    session.close().await.expect("close");
    session.close().await.expect("close again");
    assert_eq!(pool.stats().idle(), 1);
}

#[tokio::test]
async fn test_operations_after_close() {
    let (pool, _) = pool();
    let mut session = pool.session().await.expect("session");
    let query = session.prepare("SELECT 1").await.expect("prepare");
    session.close().await.expect("close");

    assert!(matches!(session.prepare("SELECT 1").await, Err(DsmError::SessionClosed)));
    assert!(matches!(session.execute(&query, &[]).await, Err(DsmError::SessionClosed)));
    assert!(matches!(
        session.open_cursor(&query, &[]).await,
        Err(DsmError::SessionClosed)
    ));
    assert!(matches!(
        session.release_query(query, None).await,
        Err(DsmError::SessionClosed)
    ));
    assert!(session.connection().is_none());
}

#[tokio::test]
async fn test_close_still_returns_connection_on_cleanup_failure() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    session.prepare("SELECT 1").await.expect("prepare");

    ledger.fail_query_close.store(true, Ordering::SeqCst);
    let err = session.close().await.unwrap_err();

    assert_eq!(err.cleanup_errors().len(), 1);
    assert!(!session.is_open());
    assert_eq!(pool.stats(), PoolStats::new(1, 0, 0, false));
}

#[tokio::test]
async fn test_close_after_pool_closed() {
    let (pool, ledger) = pool();
    let mut session = pool.session().await.expect("session");
    pool.close().await.expect("close pool");

    session.close().await.expect("close session");
    assert_eq!(ledger.closed(), 1);
    assert_eq!(pool.stats(), PoolStats::new(0, 0, 0, true));
}

#[tokio::test]
async fn test_dropped_session_is_closed_in_background() {
    let (pool, ledger) = pool();
    {
        let mut session = pool.session().await.expect("session");
        let query = session.prepare("SELECT n FROM numbers").await.expect("prepare");
        session.open_cursor(&query, &[]).await.expect("cursor");
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.stats(), PoolStats::new(1, 0, 0, false));
    assert_eq!(ledger.open_queries(), 0);
    assert_eq!(ledger.open_cursors(), 0);
}

#[test]
fn test_dropped_session_outside_runtime_is_forgotten() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let (pool, ledger) = pool();
    let session = runtime.block_on(pool.session()).expect("session");

    drop(runtime);
    drop(session);

    assert_eq!(pool.stats().active(), 0);
    assert_eq!(pool.stats().idle(), 0);
    assert_eq!(ledger.closed(), 0);
}
