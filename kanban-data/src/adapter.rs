use async_trait::async_trait;
use kanban_core::{AuthContext, BackendId, GatewayError, GatewayResult, OperationDescriptor, TypedParams};
use kanban_pool::{BackendConnection, Row, Statement, Transaction};
use serde_json::Value;

use crate::error::classify;
use crate::query::{Dialect, QueryBuilder};

/// What a step of an invocation gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub params: &'a TypedParams,
    /// Results of the steps that already ran, in execution order.
    pub prior: &'a [RawResult],
    pub auth: &'a AuthContext,
}

impl<'a> StepInput<'a> {
    pub fn new(params: &'a TypedParams, prior: &'a [RawResult], auth: &'a AuthContext) -> Self {
        StepInput { params, prior, auth }
    }

    /// The hand-off value of the immediately preceding step.
    pub fn handoff(&self) -> Option<&'a Value> {
        self.prior.last().and_then(|r| r.handoff.as_ref())
    }

    pub(crate) fn require_handoff(&self, operation: &str) -> GatewayResult<&'a Value> {
        self.handoff().ok_or_else(|| {
            GatewayError::internal(format!("'{operation}' step expected a hand-off from the previous step"))
        })
    }
}

/// The normalised outcome of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    /// Payload contributed to the caller-visible result.
    pub data: Value,
    /// Value passed to the next step only.
    pub handoff: Option<Value>,
    pub rows_affected: u64,
}

impl RawResult {
    pub fn new(data: Value) -> Self {
        RawResult {
            data,
            handoff: None,
            rows_affected: 0,
        }
    }

    pub fn rows(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    pub fn handoff(mut self, value: Value) -> Self {
        self.handoff = Some(value);
        self
    }
}

/// Executes operations against one backend over a leased connection.
///
/// Adapters hold no connection state and never retry or cache; they turn
/// an operation plus parameters into statements and turn the native outcome
/// into a [`RawResult`] or a classified [`GatewayError`].
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend(&self) -> BackendId;

    /// Names of the operations this adapter can run a step for.
    fn operations(&self) -> &[&'static str];

    fn supports(&self, operation: &str) -> bool {
        self.operations().contains(&operation)
    }

    async fn execute(
        &self,
        descriptor: &OperationDescriptor,
        conn: &mut dyn BackendConnection,
        input: StepInput<'_>,
    ) -> GatewayResult<RawResult>;
}

pub(crate) fn unsupported(backend: BackendId, operation: &str) -> GatewayError {
    GatewayError::internal(format!("backend '{backend}' has no step for operation '{operation}'"))
}

/// A leased connection bound to its backend and dialect.
///
/// Every native failure is classified on the way out.
pub struct Session<'c> {
    conn: &'c mut dyn BackendConnection,
    backend: BackendId,
    dialect: Dialect,
}

impl<'c> Session<'c> {
    pub fn new(conn: &'c mut dyn BackendConnection, backend: BackendId, dialect: Dialect) -> Self {
        Session { conn, backend, dialect }
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// A builder preset to this session's dialect.
    pub fn select(&self, table: &str) -> QueryBuilder {
        QueryBuilder::select(table).dialect(self.dialect)
    }

    pub fn insert(&self, table: &str) -> QueryBuilder {
        QueryBuilder::insert(table).dialect(self.dialect)
    }

    pub fn update(&self, table: &str) -> QueryBuilder {
        QueryBuilder::update(table).dialect(self.dialect)
    }

    pub fn delete(&self, table: &str) -> QueryBuilder {
        QueryBuilder::delete(table).dialect(self.dialect)
    }

    pub async fn query(&mut self, statement: &Statement) -> GatewayResult<Vec<Row>> {
        tracing::trace!(backend = %self.backend, sql = %statement.sql, "query");
        self.conn
            .query(statement)
            .await
            .map_err(|e| classify(self.backend, self.dialect, &e))
    }

    pub async fn query_opt(&mut self, statement: &Statement) -> GatewayResult<Option<Row>> {
        Ok(self.query(statement).await?.into_iter().next())
    }

    pub async fn execute(&mut self, statement: &Statement) -> GatewayResult<u64> {
        tracing::trace!(backend = %self.backend, sql = %statement.sql, "execute");
        self.conn
            .execute(statement)
            .await
            .map_err(|e| classify(self.backend, self.dialect, &e))
    }

    pub async fn exists(&mut self, statement: &Statement) -> GatewayResult<bool> {
        Ok(self.query_opt(statement).await?.is_some())
    }

    /// Open a transaction on this session's connection.
    pub async fn transaction(&mut self) -> GatewayResult<SessionTx<'_>> {
        let (backend, dialect) = (self.backend, self.dialect);
        let tx = Transaction::begin(&mut *self.conn)
            .await
            .map_err(|e| classify(backend, dialect, &e))?;
        Ok(SessionTx { tx, backend, dialect })
    }
}

/// A [`Session`] scope inside a transaction.
///
/// ```ignore
/// let mut tx = s.transaction().await?;
/// let outcome = self.apply(&mut tx.session(), items).await;
/// let counts = tx.finish(outcome).await?;
/// ```
pub struct SessionTx<'c> {
    tx: Transaction<'c>,
    backend: BackendId,
    dialect: Dialect,
}

impl<'c> SessionTx<'c> {
    pub fn session(&mut self) -> Session<'_> {
        Session::new(self.tx.connection(), self.backend, self.dialect)
    }

    /// Commit when `outcome` is a success, roll back otherwise.
    ///
    /// A failed commit replaces the success; a failed rollback is logged and
    /// the original error is kept.
    pub async fn finish<T>(self, outcome: GatewayResult<T>) -> GatewayResult<T> {
        let (backend, dialect) = (self.backend, self.dialect);
        let settled = self.tx.finish(outcome.is_ok()).await;
        match (outcome, settled) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(classify(backend, dialect, &e)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(e)) => {
                tracing::warn!(backend = %backend, error = %e, "Rollback failed");
                Err(err)
            }
        }
    }
}

pub(crate) fn rows_to_json(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}
