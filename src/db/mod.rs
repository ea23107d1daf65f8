//! SQLite storage engine.
//!
//! Every public operation checks a connection out of a bounded r2d2 pool,
//! runs on a blocking worker and retries busy/locked failures. Each
//! operation is atomic: either all of its rows are written or none.

mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;
pub mod retry;

pub use connection::{ConnectionPool, Database};
pub use models::{
    Context, EventRecord, NewContext, NewEvent, SessionRecord, SessionSummary,
    DEFAULT_CONTEXT_COLOR,
};
pub use retry::RetryPolicy;
