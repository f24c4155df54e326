//! Connection pooling for the kanban data gateway.
//!
//! One bounded [`Pool`] per backend, grouped in a [`PoolManager`]. A pool
//! hands out [`Lease`]s; concurrency is bounded by a semaphore so that
//! `in_use <= max_size` always holds. Connections are created lazily and
//! evicted when found dead, stale, marked broken or left inside a
//! transaction.

pub mod connection;
pub mod manager;
pub mod pool;
pub mod transaction;

pub use connection::{BackendConnection, Connector, NativeError, Row, SqlValue, Statement};
pub use manager::PoolManager;
pub use pool::{Lease, Pool, PoolConfig, PoolStats};
pub use transaction::Transaction;
