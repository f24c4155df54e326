//! Backend adapters for the kanban data gateway.
//!
//! One [`BackendAdapter`] per backing store turns operations into SQL built
//! with the dialect-aware [`QueryBuilder`](query::QueryBuilder), runs it over
//! a leased connection and classifies native failures into the gateway's
//! error taxonomy.

pub mod adapter;
pub mod erp;
pub mod error;
pub mod general;
pub mod ids;
pub mod query;
pub mod schema;
pub mod secondary;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use adapter::{BackendAdapter, RawResult, Session, SessionTx, StepInput};
pub use erp::ErpAdapter;
pub use error::{classify, CONFLICT, NOT_FOUND, PERMISSION_DENIED};
pub use general::GeneralAdapter;
pub use query::{Dialect, IdentifierPolicy, QueryBuilder, QueryError};
pub use secondary::SecondaryAdapter;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, SqlxErrorExt};
