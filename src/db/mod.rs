//! Database access: the connection pool and the per-family record store.

pub mod pool;
pub mod store;

pub use pool::{ConnectionPool, PoolStats};
pub use store::{ClaimCas, FieldPatch, RecordStore};
