//! The general-purpose store: articles, RFID kanban tags and stock levels.

use async_trait::async_trait;
use kanban_core::{BackendId, GatewayResult, OperationDescriptor, TypedParams};
use kanban_pool::{BackendConnection, SqlValue, Statement};
use serde_json::{json, Value};

use crate::adapter::{rows_to_json, unsupported, BackendAdapter, RawResult, Session, StepInput};
use crate::error::{conflict, not_found};
use crate::ids;
use crate::query::Dialect;

const BACKEND: BackendId = BackendId::General;

/// Supplier assigned to articles first seen during an ERP sync.
pub const DEFAULT_SUPPLIER: &str = "OKB";

/// Random draws before `generate_tag_id` gives up.
const TAG_ID_ATTEMPTS: usize = 16;

const OPERATIONS: &[&str] = &[
    "list_articles",
    "get_article",
    "update_article_supplier",
    "list_tags",
    "create_tag",
    "update_tag",
    "set_tag_status",
    "delete_tag",
    "generate_tag_id",
    "reserve_stock",
    "post_receipt",
    "sync_articles",
    "reorder_article",
];

const ARTICLE_COLUMNS: &[&str] = &["art_no", "art_supplier", "description", "created_at"];
const TAG_COLUMNS: &[&str] = &["tag_id", "art_no", "status", "created_at", "updated_at"];

#[derive(Debug, Clone, Default)]
pub struct GeneralAdapter {
    dialect: Dialect,
}

impl GeneralAdapter {
    pub fn new(dialect: Dialect) -> Self {
        GeneralAdapter { dialect }
    }

    async fn list_articles(&self, s: &mut Session<'_>) -> GatewayResult<RawResult> {
        let stmt = s.select("articles").columns(ARTICLE_COLUMNS).order_by("art_no", true).build()?;
        let rows = s.query(&stmt).await?;
        let count = rows.len() as u64;
        Ok(RawResult::new(json!({ "articles": rows_to_json(rows) })).rows(count))
    }

    async fn find_article(&self, s: &mut Session<'_>, art_no: &str) -> GatewayResult<Option<Value>> {
        let stmt = s
            .select("articles")
            .columns(ARTICLE_COLUMNS)
            .where_eq("art_no", art_no)
            .build()?;
        Ok(s.query_opt(&stmt).await?.map(Value::Object))
    }

    async fn get_article(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let art_no = p.require_str("art_no")?;
        match self.find_article(s, art_no).await? {
            Some(article) => Ok(RawResult::new(article).rows(1)),
            None => Err(not_found(BACKEND, "Article not found")),
        }
    }

    async fn update_article_supplier(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let art_no = p.require_str("art_no")?;
        let supplier = p.require_str("art_supplier")?;
        let stmt = s
            .update("articles")
            .set("art_supplier", supplier)
            .where_eq("art_no", art_no)
            .build()?;
        let rows = s.execute(&stmt).await?;
        if rows == 0 {
            return Err(not_found(BACKEND, "Article not found"));
        }
        Ok(RawResult::new(json!({ "art_no": art_no, "art_supplier": supplier })).rows(rows))
    }

    async fn list_tags(&self, s: &mut Session<'_>) -> GatewayResult<RawResult> {
        let stmt = Statement::new(
            "SELECT t.tag_id, t.art_no, t.status, t.created_at, t.updated_at, \
             a.description, a.art_supplier \
             FROM tags t LEFT JOIN articles a ON a.art_no = t.art_no \
             ORDER BY t.tag_id",
        );
        let rows = s.query(&stmt).await?;
        let count = rows.len() as u64;
        Ok(RawResult::new(json!({ "tags": rows_to_json(rows) })).rows(count))
    }

    async fn tag_exists(&self, s: &mut Session<'_>, tag_id: &str) -> GatewayResult<bool> {
        let stmt = s.select("tags").columns(&["tag_id"]).where_eq("tag_id", tag_id).build()?;
        s.exists(&stmt).await
    }

    async fn article_exists(&self, s: &mut Session<'_>, art_no: &str) -> GatewayResult<bool> {
        let stmt = s.select("articles").columns(&["art_no"]).where_eq("art_no", art_no).build()?;
        s.exists(&stmt).await
    }

    async fn find_tag(&self, s: &mut Session<'_>, tag_id: &str) -> GatewayResult<Option<Value>> {
        let stmt = s.select("tags").columns(TAG_COLUMNS).where_eq("tag_id", tag_id).build()?;
        Ok(s.query_opt(&stmt).await?.map(Value::Object))
    }

    async fn create_tag(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let tag_id = p.require_str("tag_id")?;
        let art_no = p.require_str("art_no")?;
        let status = p.int("status").unwrap_or(0);

        if self.tag_exists(s, tag_id).await? {
            return Err(conflict(BACKEND, "Tag already exists"));
        }
        if !self.article_exists(s, art_no).await? {
            return Err(not_found(BACKEND, "Article not found"));
        }
        let stmt = s
            .insert("tags")
            .set("tag_id", tag_id)
            .set("art_no", art_no)
            .set("status", status)
            .build()?;
        let rows = s.execute(&stmt).await?;
        Ok(RawResult::new(json!({ "tag_id": tag_id, "art_no": art_no, "status": status })).rows(rows))
    }

    async fn update_tag(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let tag_id = p.require_str("tag_id")?;
        if !self.tag_exists(s, tag_id).await? {
            return Err(not_found(BACKEND, "Tag not found"));
        }

        let mut update = s.update("tags").where_eq("tag_id", tag_id);
        let mut changed = false;
        if let Some(art_no) = p.str("art_no") {
            if !self.article_exists(s, art_no).await? {
                return Err(not_found(BACKEND, "Article not found"));
            }
            update = update.set("art_no", art_no);
            changed = true;
        }
        if let Some(status) = p.int("status") {
            update = update.set("status", status);
            changed = true;
        }

        let rows = if changed { s.execute(&update.build()?).await? } else { 0 };
        let tag = self
            .find_tag(s, tag_id)
            .await?
            .ok_or_else(|| not_found(BACKEND, "Tag not found"))?;
        Ok(RawResult::new(tag).rows(rows))
    }

    async fn set_tag_status(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let tag_id = p.require_str("tag_id")?;
        let status = p.require_int("status")?;
        let stmt = s
            .update("tags")
            .set("status", status)
            .where_eq("tag_id", tag_id)
            .build()?;
        let rows = s.execute(&stmt).await?;
        if rows == 0 {
            return Err(not_found(BACKEND, "Tag not found"));
        }
        Ok(RawResult::new(json!({ "tag_id": tag_id, "status": status })).rows(rows))
    }

    async fn delete_tag(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let tag_id = p.require_str("tag_id")?;
        let stmt = s.delete("tags").where_eq("tag_id", tag_id).build()?;
        let rows = s.execute(&stmt).await?;
        if rows == 0 {
            return Err(not_found(BACKEND, "Tag not found"));
        }
        Ok(RawResult::new(json!({ "tag_id": tag_id, "deleted": true })).rows(rows))
    }

    async fn generate_tag_id(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        if let Some(preferred) = p.str("preferred_tag_id") {
            let preferred = preferred.to_ascii_uppercase();
            if !self.tag_exists(s, &preferred).await? {
                return Ok(RawResult::new(json!({ "tag_id": preferred })));
            }
        }
        for _ in 0..TAG_ID_ATTEMPTS {
            let candidate = ids::random_tag_id();
            if !self.tag_exists(s, &candidate).await? {
                return Ok(RawResult::new(json!({ "tag_id": candidate })));
            }
        }
        Err(conflict(BACKEND, "No free tag id found"))
    }

    /// Availability check only: `reserved` says whether `qty` is on hand.
    /// Nothing is held back, so concurrent callers may both see `true`.
    async fn reserve_stock(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let sku = p.require_str("sku")?;
        let qty = p.require_int("qty")?;
        let stmt = s.select("stock").columns(&["quantity"]).where_eq("sku", sku).build()?;
        let available = s
            .query_opt(&stmt)
            .await?
            .and_then(|row| row.get("quantity").and_then(Value::as_i64))
            .unwrap_or(0);
        Ok(RawResult::new(json!({
            "sku": sku,
            "qty": qty,
            "available": available,
            "reserved": available >= qty,
        })))
    }

    async fn post_receipt(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let sku = p.require_str("sku")?;
        let qty = p.require_int("qty")?;
        let mut tx = s.transaction().await?;
        let outcome = self.add_stock(&mut tx.session(), sku, qty).await;
        let (quantity, rows) = tx.finish(outcome).await?;
        Ok(RawResult::new(json!({ "sku": sku, "quantity": quantity })).rows(rows))
    }

    /// Add `qty` to the stock of `sku`, creating the row on first receipt.
    async fn add_stock(&self, s: &mut Session<'_>, sku: &str, qty: i64) -> GatewayResult<(i64, u64)> {
        let add = Statement {
            sql: format!(
                "UPDATE stock SET quantity = quantity + {} WHERE sku = {}",
                self.dialect.placeholder(1),
                self.dialect.placeholder(2)
            ),
            params: vec![SqlValue::Int(qty), SqlValue::from(sku)],
        };
        let mut rows = s.execute(&add).await?;
        if rows == 0 {
            let stmt = s.insert("stock").set("sku", sku).set("quantity", qty).build()?;
            rows = s.execute(&stmt).await?;
        }
        let stmt = s.select("stock").columns(&["quantity"]).where_eq("sku", sku).build()?;
        let quantity = s
            .query_opt(&stmt)
            .await?
            .and_then(|row| row.get("quantity").and_then(Value::as_i64))
            .unwrap_or(qty);
        Ok((quantity, rows))
    }

    /// Upsert the ERP items handed over by the previous step, all or nothing.
    async fn sync_articles(&self, s: &mut Session<'_>, input: StepInput<'_>) -> GatewayResult<RawResult> {
        let handoff = input.require_handoff("sync_articles")?;
        let items = handoff
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut tx = s.transaction().await?;
        let outcome = self.upsert_articles(&mut tx.session(), items).await;
        let (created, updated) = tx.finish(outcome).await?;

        tracing::info!(fetched = items.len(), created, updated, "Articles synchronised");
        Ok(RawResult::new(json!({
            "fetched": items.len(),
            "created": created,
            "updated": updated,
        }))
        .rows(created + updated))
    }

    async fn upsert_articles(&self, s: &mut Session<'_>, items: &[Value]) -> GatewayResult<(u64, u64)> {
        let (mut created, mut updated) = (0u64, 0u64);
        for item in items {
            let Some(art_no) = item.get("art_no").and_then(Value::as_str) else {
                continue;
            };
            let description = item.get("description").and_then(Value::as_str).unwrap_or_default();
            let stmt = s
                .select("articles")
                .columns(&["description"])
                .where_eq("art_no", art_no)
                .build()?;
            match s.query_opt(&stmt).await? {
                None => {
                    let stmt = s
                        .insert("articles")
                        .set("art_no", art_no)
                        .set("art_supplier", DEFAULT_SUPPLIER)
                        .set("description", description)
                        .build()?;
                    s.execute(&stmt).await?;
                    created += 1;
                }
                Some(row) if row.get("description").and_then(Value::as_str) != Some(description) => {
                    let stmt = s
                        .update("articles")
                        .set("description", description)
                        .where_eq("art_no", art_no)
                        .build()?;
                    s.execute(&stmt).await?;
                    updated += 1;
                }
                Some(_) => {}
            }
        }
        Ok((created, updated))
    }

    /// First step of a reorder: the article must exist; its master data is handed on.
    async fn reorder_article(&self, s: &mut Session<'_>, p: &TypedParams) -> GatewayResult<RawResult> {
        let art_no = p.require_str("art_no")?;
        let article = self
            .find_article(s, art_no)
            .await?
            .ok_or_else(|| not_found(BACKEND, "Article not found"))?;
        let data = json!({
            "art_no": article.get("art_no"),
            "art_supplier": article.get("art_supplier"),
            "description": article.get("description"),
        });
        Ok(RawResult::new(data.clone()).handoff(data))
    }
}

#[async_trait]
impl BackendAdapter for GeneralAdapter {
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
        let p = input.params;
        match descriptor.name {
            "list_articles" => self.list_articles(&mut s).await,
            "get_article" => self.get_article(&mut s, p).await,
            "update_article_supplier" => self.update_article_supplier(&mut s, p).await,
            "list_tags" => self.list_tags(&mut s).await,
            "create_tag" => self.create_tag(&mut s, p).await,
            "update_tag" => self.update_tag(&mut s, p).await,
            "set_tag_status" => self.set_tag_status(&mut s, p).await,
            "delete_tag" => self.delete_tag(&mut s, p).await,
            "generate_tag_id" => self.generate_tag_id(&mut s, p).await,
            "reserve_stock" => self.reserve_stock(&mut s, p).await,
            "post_receipt" => self.post_receipt(&mut s, p).await,
            "sync_articles" => self.sync_articles(&mut s, input).await,
            "reorder_article" => self.reorder_article(&mut s, p).await,
            other => Err(unsupported(BACKEND, other)),
        }
    }
}
