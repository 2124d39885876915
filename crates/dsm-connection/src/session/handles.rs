//! Opaque handles for resources owned by a session

use std::fmt;

use uuid::Uuid;

/// Identifies a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A prepared query issued by a session
///
/// Only meaningful to the session that issued it; any other session treats
/// it as already released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHandle {
    session: SessionId,
    seq: u64,
}

impl QueryHandle {
    pub(crate) fn new(session: SessionId, seq: u64) -> Self {
        Self { session, seq }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query#{}", self.seq)
    }
}

/// A cursor opened from a prepared query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorHandle {
    query: QueryHandle,
    seq: u64,
}

impl CursorHandle {
    pub(crate) fn new(query: QueryHandle, seq: u64) -> Self {
        Self { query, seq }
    }

    /// The query this cursor depends on
    pub fn query(&self) -> QueryHandle {
        self.query
    }
}

impl fmt::Display for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/cursor#{}", self.query, self.seq)
    }
}
