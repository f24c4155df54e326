//! A SQLx-backed SQLite [`Connector`].

use std::str::FromStr;

use async_trait::async_trait;
use kanban_pool::{BackendConnection, Connector, NativeError, Row, SqlValue, Statement};
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _, Sqlite, TypeInfo, ValueRef};

/// Extension trait for converting `sqlx::Error` into a [`NativeError`].
pub trait SqlxErrorExt {
    fn into_native(self) -> NativeError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_native(self) -> NativeError {
        match &self {
            sqlx::Error::Database(db) => match db.code() {
                Some(code) => NativeError::with_code(code.into_owned(), db.message()),
                None => NativeError::new(db.message()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => NativeError::connection_lost(self.to_string()),
            _ => NativeError::new(self.to_string()),
        }
    }
}

/// Opens SQLite connections and applies bootstrap DDL to each.
///
/// ```ignore
/// let connector = SqliteConnector::new("sqlite://general.db")?
///     .with_schema(kanban_data::schema::GENERAL);
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
    schema: Vec<String>,
}

impl SqliteConnector {
    pub fn new(url: &str) -> Result<Self, NativeError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(SqlxErrorExt::into_native)?
            .create_if_missing(true)
            .foreign_keys(true)
            .disable_statement_logging();
        Ok(SqliteConnector {
            options,
            schema: Vec::new(),
        })
    }

    pub fn with_schema<S: AsRef<str>>(mut self, statements: &[S]) -> Self {
        self.schema
            .extend(statements.iter().map(|s| s.as_ref().to_string()));
        self
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, NativeError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| NativeError::connection_lost(e.to_string()))?;
        let mut conn = SqliteBackendConnection {
            conn,
            in_tx: false,
            rollback_pending: false,
        };
        crate::schema::bootstrap(&mut conn, self.schema.as_slice()).await?;
        Ok(Box::new(conn))
    }
}

pub struct SqliteBackendConnection {
    conn: SqliteConnection,
    in_tx: bool,
    rollback_pending: bool,
}

impl SqliteBackendConnection {
    async fn run(&mut self, sql: &'static str) -> Result<(), NativeError> {
        sqlx::query(sql)
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(SqlxErrorExt::into_native)
    }

    /// Roll back a transaction whose guard was dropped unfinished.
    async fn settle(&mut self) -> Result<(), NativeError> {
        if self.rollback_pending {
            self.run("ROLLBACK").await?;
            self.rollback_pending = false;
            self.in_tx = false;
        }
        Ok(())
    }
}

fn bind_all<'q>(statement: &'q Statement) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), |q, value| match value {
            SqlValue::Null => q.bind(None::<String>),
            SqlValue::Int(i) => q.bind(*i),
            SqlValue::Float(f) => q.bind(*f),
            SqlValue::Text(s) => q.bind(s.as_str()),
            SqlValue::Bool(b) => q.bind(*b),
        })
}

fn decode_row(row: &SqliteRow) -> Result<Row, NativeError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx).map_err(SqlxErrorExt::into_native)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(
                    row.try_get::<i64, _>(idx)
                        .map_err(SqlxErrorExt::into_native)?,
                ),
                "REAL" => Value::from(
                    row.try_get::<f64, _>(idx)
                        .map_err(SqlxErrorExt::into_native)?,
                ),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(idx).map_err(SqlxErrorExt::into_native)?;
                    Value::from(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
                }
                _ => Value::from(
                    row.try_get::<String, _>(idx)
                        .map_err(SqlxErrorExt::into_native)?,
                ),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[async_trait]
impl BackendConnection for SqliteBackendConnection {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, NativeError> {
        self.settle().await?;
        let rows = bind_all(statement)
            .fetch_all(&mut self.conn)
            .await
            .map_err(SqlxErrorExt::into_native)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, NativeError> {
        self.settle().await?;
        let done = bind_all(statement)
            .execute(&mut self.conn)
            .await
            .map_err(SqlxErrorExt::into_native)?;
        Ok(done.rows_affected())
    }

    async fn ping(&mut self) -> Result<(), NativeError> {
        self.settle().await?;
        self.conn
            .ping()
            .await
            .map_err(|e| NativeError::connection_lost(e.to_string()))
    }

    /// `BEGIN IMMEDIATE` takes the write lock up front, so concurrent writers
    /// queue on the busy timeout instead of failing at their first write.
    async fn begin(&mut self) -> Result<(), NativeError> {
        self.settle().await?;
        if self.in_tx {
            return Err(NativeError::new("a transaction is already open"));
        }
        self.run("BEGIN IMMEDIATE").await?;
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        if !self.in_tx {
            return Err(NativeError::new("no transaction to commit"));
        }
        self.run("COMMIT").await?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        if !self.in_tx {
            return Err(NativeError::new("no transaction to roll back"));
        }
        self.run("ROLLBACK").await?;
        self.in_tx = false;
        self.rollback_pending = false;
        Ok(())
    }

    fn start_rollback(&mut self) {
        if self.in_tx {
            self.rollback_pending = true;
        }
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn close(self: Box<Self>) {
        let this = *self;
        if let Err(err) = this.conn.close().await {
            tracing::debug!(error = %err, "Error closing SQLite connection");
        }
    }
}
