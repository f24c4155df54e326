//! The secondary store: purchase orders.

use async_trait::async_trait;
use kanban_core::{BackendId, GatewayResult, OperationDescriptor, TypedParams};
use kanban_pool::BackendConnection;
use serde_json::{json, Value};

use crate::adapter::{rows_to_json, unsupported, BackendAdapter, RawResult, Session, StepInput};
use crate::error::{conflict, not_found};
use crate::ids;
use crate::query::Dialect;

const BACKEND: BackendId = BackendId::Secondary;

pub const ORDER_OPEN: i64 = 0;
pub const ORDER_CLOSED: i64 = 1;

const ORDER_NO_ATTEMPTS: usize = 8;

const OPERATIONS: &[&str] = &["list_orders", "create_order", "close_order", "reorder_article"];
const ORDER_COLUMNS: &[&str] = &["order_no", "art_no", "status", "timestamp"];

#[derive(Debug, Clone, Default)]
pub struct SecondaryAdapter {
    dialect: Dialect,
}

impl SecondaryAdapter {
    pub fn new(dialect: Dialect) -> Self {
        SecondaryAdapter { dialect }
    }

    async fn list_orders(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let mut query = s.select("orders").columns(ORDER_COLUMNS);
        if let Some(status) = p.int("status") {
            query = query.where_eq("status", status);
        }
        let rows = s.query(&query.order_by("timestamp", false).build()?).await?;
        let count = rows.len() as u64;
        Ok(RawResult::new(json!({ "orders": rows_to_json(rows) })).rows(count))
    }

    async fn free_order_no(&self, s: &mut Session<'_>) -> GatewayResult<String> {
        for _ in 0..ORDER_NO_ATTEMPTS {
            let candidate = ids::random_order_no();
            let stmt = s
                .select("orders")
                .columns(&["order_no"])
                .where_eq("order_no", candidate.as_str())
                .build()?;
            if !s.exists(&stmt).await? {
                return Ok(candidate);
            }
        }
        Err(conflict(BACKEND, "No free order number found"))
    }

    async fn insert_order(&self, s: &mut Session<'_>, art_no: &str) -> GatewayResult<RawResult> {
        let order_no = self.free_order_no(s).await?;
        let stmt = s
            .insert("orders")
            .set("order_no", order_no.as_str())
            .set("art_no", art_no)
            .set("status", ORDER_OPEN)
            .build()?;
        let rows = s.execute(&stmt).await?;
        tracing::info!(order_no = %order_no, art_no, "Order created");
        Ok(RawResult::new(json!({
            "order_no": order_no,
            "art_no": art_no,
            "status": ORDER_OPEN,
        }))
        .rows(rows))
    }

    async fn create_order(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let art_no = p.require_str("art_no")?;
        self.insert_order(s, art_no).await
    }

    async fn close_order(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let order_no = p.require_str("order_no")?;
        let stmt = s
            .update("orders")
            .set("status", ORDER_CLOSED)
            .where_eq("order_no", order_no)
            .build()?;
        let rows = s.execute(&stmt).await?;
        if rows == 0 {
            return Err(not_found(BACKEND, "Order not found"));
        }
        Ok(RawResult::new(json!({ "order_no": order_no, "status": ORDER_CLOSED })).rows(rows))
    }

    /// Second step of a reorder. One open order per article at a time.
    async fn reorder_article(&self, s: &mut Session<'_>, input: StepInput<'_>) -> GatewayResult<RawResult> {
        let article = input.require_handoff("reorder_article")?;
        let art_no = match article.get("art_no").and_then(Value::as_str) {
            Some(art_no) => art_no.to_string(),
            None => input.params.require_str("art_no")?.to_string(),
        };

        let stmt = s
            .select("orders")
            .columns(&["order_no"])
            .where_eq("art_no", art_no.as_str())
            .where_eq("status", ORDER_OPEN)
            .limit(1)
            .build()?;
        if let Some(open) = s.query_opt(&stmt).await? {
            let order_no = open.get("order_no").and_then(Value::as_str).unwrap_or_default();
            return Err(conflict(
                BACKEND,
                format!("Article {art_no} already has open order {order_no}"),
            ));
        }
        self.insert_order(s, &art_no).await
    }
}

#[async_trait]
impl BackendAdapter for SecondaryAdapter {
    fn backend(&self) -> BackendId {
        BACKEND
    }

    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    async fn execute(
        &self,
        descriptor: &OperationDescriptor,
        conn: &mut dyn BackendConnection,
        input: StepInput<'_>,
    ) -> GatewayResult<RawResult> {
        let mut s = Session::new(conn, BACKEND, self.dialect);
        match descriptor.name {
            "list_orders" => self.list_orders(&mut s, input.params).await,
            "create_order" => self.create_order(&mut s, input.params).await,
            "close_order" => self.close_order(&mut s, input.params).await,
            "reorder_article" => self.reorder_article(&mut s, input).await,
            other => Err(unsupported(BACKEND, other)),
        }
    }
}
