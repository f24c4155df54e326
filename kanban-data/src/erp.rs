//! The ERP item master (Navision `<company>$Item` table).

use async_trait::async_trait;
use kanban_core::{BackendId, GatewayResult, OperationDescriptor, TypedParams};
use kanban_pool::{BackendConnection, Row};
use serde_json::{json, Value};

use crate::adapter::{unsupported, BackendAdapter, RawResult, Session, StepInput};
use crate::error::not_found;
use crate::query::{Dialect, IdentifierPolicy, QueryBuilder};

const BACKEND: BackendId = BackendId::Erp;

const OPERATIONS: &[&str] = &["lookup_erp_item", "sync_articles"];

#[derive(Debug, Clone)]
pub struct ErpAdapter {
    company: String,
    dialect: Dialect,
}

impl ErpAdapter {
    /// `company` prefixes the item table, e.g. `OTEC` reads `OTEC$Item`.
    pub fn new(company: impl Into<String>, dialect: Dialect) -> Self {
        ErpAdapter {
            company: company.into(),
            dialect,
        }
    }

    /// `dbo.<company>$Item` on SQL Server; a bare `<company>$Item` on a mirror.
    pub fn item_table(&self) -> String {
        match self.dialect {
            Dialect::MsSql => format!("dbo.{}$Item", self.company),
            _ => format!("{}$Item", self.company),
        }
    }

    fn items(&self) -> QueryBuilder {
        QueryBuilder::select(&self.item_table())
            .dialect(self.dialect)
            .identifier_policy(IdentifierPolicy::Quote)
            .columns(&["No_", "Description"])
    }

    async fn lookup_erp_item(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let art_no = p.require_str("art_no")?;
        let stmt = self.items().where_eq("No_", art_no).limit(1).build()?;
        match s.query_opt(&stmt).await? {
            Some(row) => Ok(RawResult::new(item(&row)).rows(1)),
            None => Err(not_found(BACKEND, "Item not found")),
        }
    }

    async fn sync_articles(&self, s: &mut Session<'_>) -> GatewayResult<RawResult> {
        let stmt = self.items().order_by("No_", true).build()?;
        let items: Vec<Value> = s.query(&stmt).await?.iter().map(item).collect();
        tracing::debug!(company = %self.company, fetched = items.len(), "Fetched ERP items");
        let fetched = items.len();
        Ok(RawResult::new(json!({ "fetched": fetched }))
            .rows(fetched as u64)
            .handoff(json!({ "items": items })))
    }
}

fn item(row: &Row) -> Value {
    let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::trim).unwrap_or_default();
    json!({ "art_no": text("No_"), "description": text("Description") })
}

#[async_trait]
impl BackendAdapter for ErpAdapter {
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
            "lookup_erp_item" => self.lookup_erp_item(&mut s, input.params).await,
            "sync_articles" => self.sync_articles(&mut s).await,
            other => Err(unsupported(BACKEND, other)),
        }
    }
}
