//! DSM Core - Core abstractions for the pooled data-source manager
//!
//! This crate provides the traits and types the pool depends on without
//! knowing anything about a concrete backing resource:
//!
//! - `RawConnection` - An open handle to the backing resource
//! - `PreparedQuery` / `Cursor` - Dependent resources opened through a connection
//! - `ConnectionFactory` - Creates raw connections from `ConnectionParams`
//! - `DsmError` - The error taxonomy shared by every crate

mod connection;
mod error;
mod types;

pub use connection::*;
pub use error::*;
pub use types::*;
