//! Sessions over borrowed connections
//!
//! A session wraps one connection borrowed from a [`ConnectionPool`] and
//! owns every prepared query and cursor opened through it. Closing the
//! session releases them all and hands the connection back.
//!
//! # Example
//!
//! ```ignore
//! let mut session = pool.session().await?;
//! let query = session.prepare("SELECT id FROM users").await?;
//! let cursor = session.open_cursor(&query, &[]).await?;
//! let rows = session.fetch_all(&cursor).await?;
//! session.release_query(query, Some(cursor)).await?;
//! session.close().await?;
//! ```
//!
//! [`ConnectionPool`]: crate::pool::ConnectionPool

mod handles;
mod session;

#[cfg(test)]
mod tests;

pub use handles::{CursorHandle, QueryHandle, SessionId};
pub use session::Session;
