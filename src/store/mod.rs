//! Duplicate index — persistence for first-seen codes.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlIndex;
pub use traits::{DuplicateIndex, IndexEntry, InsertOutcome};
