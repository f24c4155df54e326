//! The seam between the gateway and native database drivers.
//!
//! Drivers live behind [`Connector`] and [`BackendConnection`]. Statements go
//! in as SQL text plus typed bind values, rows come back as JSON objects, and
//! failures come back as [`NativeError`] for adapters to classify.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// A bind value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl SqlValue {
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => Value::from(*f),
            SqlValue::Text(s) => Value::from(s.as_str()),
            SqlValue::Bool(b) => Value::Bool(*b),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// SQL text with positional bind values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// A result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// A failure reported by a driver, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Driver-specific code (SQLSTATE, SQL Server error number, SQLite code).
    pub code: Option<String>,
    pub message: String,
    /// The transport is gone; the connection must not be reused.
    pub connection_lost: bool,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        NativeError {
            code: None,
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        NativeError {
            code: Some(code.into()),
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        NativeError {
            code: None,
            message: message.into(),
            connection_lost: true,
        }
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for NativeError {}

/// One open connection to a backend.
#[async_trait]
pub trait BackendConnection: Send {
    /// Run a statement that returns rows.
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, NativeError>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, NativeError>;

    /// Cheap liveness check.
    async fn ping(&mut self) -> Result<(), NativeError>;

    /// Open a transaction. Drivers without transactions refuse.
    async fn begin(&mut self) -> Result<(), NativeError> {
        Err(NativeError::new("transactions are not supported by this connection"))
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        Err(NativeError::new("no transaction to commit"))
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        Err(NativeError::new("no transaction to roll back"))
    }

    /// Queue a rollback without awaiting it; used when a transaction guard
    /// is dropped. The rollback runs before the next statement.
    fn start_rollback(&mut self) {}

    /// A transaction is open or a rollback is still queued. Pools never
    /// idle such a connection.
    fn in_transaction(&self) -> bool {
        false
    }

    async fn close(self: Box<Self>) {}
}

/// Opens new connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, NativeError>;
}
