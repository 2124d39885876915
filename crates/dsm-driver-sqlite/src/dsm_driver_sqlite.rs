//! SQLite driver for the data-source manager

mod connection;
mod factory;
mod query;

pub use connection::SqliteConnection;
pub use factory::SqliteConnectionFactory;
pub use query::{SqliteCursor, SqliteQuery};
