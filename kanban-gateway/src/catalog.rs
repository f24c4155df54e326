//! The business operations served by the gateway.

use std::time::Duration;

use kanban_core::{CachePolicy, ConfigError, FieldSpec, OperationDescriptor, ParamSchema, Registry};
use serde_json::json;

use kanban_core::BackendId::{Erp, General, Secondary};

const SUPPLIERS: &[&str] = &["OKB", "RKB", "SW"];

fn art_no() -> FieldSpec {
    FieldSpec::string("art_no").required().len(1, 50)
}

fn tag_id() -> FieldSpec {
    FieldSpec::string("tag_id").required().len(1, 24)
}

fn tag_status() -> FieldSpec {
    FieldSpec::integer("status").range(0, 1)
}

fn sku() -> FieldSpec {
    FieldSpec::string("sku").required().len(1, 50)
}

fn qty() -> FieldSpec {
    FieldSpec::integer("qty").required().range(1, 100_000)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

pub fn descriptors() -> Vec<OperationDescriptor> {
    vec![
        // Articles
        OperationDescriptor::new("list_articles", &[General])
            .summary("List all articles")
            .idempotent()
            .cache(CachePolicy::cacheable(secs(30), &["articles"])),
        OperationDescriptor::new("get_article", &[General])
            .summary("Fetch one article")
            .params(ParamSchema::new(vec![art_no()]))
            .idempotent()
            .cache(CachePolicy::cacheable(secs(30), &["articles"])),
        OperationDescriptor::new("update_article_supplier", &[General])
            .summary("Change the supplier of an article")
            .params(ParamSchema::new(vec![
                art_no(),
                FieldSpec::string("art_supplier").required().one_of(SUPPLIERS),
            ]))
            .idempotent()
            .cache(CachePolicy::invalidates(&["articles"])),
        // Tags
        OperationDescriptor::new("list_tags", &[General])
            .summary("List RFID tags with their article")
            .idempotent()
            .cache(CachePolicy::cacheable(secs(10), &["tags", "articles"])),
        OperationDescriptor::new("create_tag", &[General])
            .summary("Bind a new RFID tag to an article")
            .params(ParamSchema::new(vec![tag_id(), art_no(), tag_status().default(json!(0))]))
            .cache(CachePolicy::invalidates(&["tags"])),
        OperationDescriptor::new("update_tag", &[General])
            .summary("Rebind a tag or change its status")
            .params(ParamSchema::new(vec![
                tag_id(),
                FieldSpec::string("art_no").len(1, 50),
                tag_status(),
            ]))
            .idempotent()
            .cache(CachePolicy::invalidates(&["tags"])),
        OperationDescriptor::new("set_tag_status", &[General])
            .summary("Mark a kanban box empty (0) or full (1)")
            .params(ParamSchema::new(vec![tag_id(), tag_status().required()]))
            .idempotent()
            .cache(CachePolicy::invalidates(&["tags"])),
        OperationDescriptor::new("delete_tag", &[General])
            .summary("Remove a tag")
            .params(ParamSchema::new(vec![tag_id()]))
            .cache(CachePolicy::invalidates(&["tags"])),
        OperationDescriptor::new("generate_tag_id", &[General])
            .summary("Propose an unused 24-character tag id")
            .params(ParamSchema::new(vec![FieldSpec::string("preferred_tag_id").len(24, 24).hex()]))
            .idempotent(),
        // Stock
        OperationDescriptor::new("reserve_stock", &[General])
            .summary("Check whether a quantity is on hand (availability check, holds nothing back)")
            .params(ParamSchema::new(vec![sku(), qty()]))
            .idempotent()
            .cache(CachePolicy::cacheable(secs(15), &["stock"])),
        OperationDescriptor::new("post_receipt", &[General])
            .summary("Book received goods into stock")
            .params(ParamSchema::new(vec![sku(), qty()]))
            .cache(CachePolicy::invalidates(&["stock"])),
        // Orders
        OperationDescriptor::new("list_orders", &[Secondary])
            .summary("List purchase orders")
            .params(ParamSchema::new(vec![tag_status()]))
            .idempotent()
            .cache(CachePolicy::cacheable(secs(10), &["orders"])),
        OperationDescriptor::new("create_order", &[Secondary])
            .summary("Open a purchase order for an article")
            .params(ParamSchema::new(vec![art_no()]))
            .cache(CachePolicy::invalidates(&["orders"])),
        OperationDescriptor::new("close_order", &[Secondary])
            .summary("Close a purchase order")
            .params(ParamSchema::new(vec![FieldSpec::string("order_no").required().len(10, 10)]))
            .idempotent()
            .cache(CachePolicy::invalidates(&["orders"])),
        // ERP
        OperationDescriptor::new("lookup_erp_item", &[Erp])
            .summary("Read an item from the ERP item master")
            .params(ParamSchema::new(vec![art_no()]))
            .idempotent()
            .cache(CachePolicy::cacheable(secs(300), &["erp_items"])),
        // Cross-backend
        OperationDescriptor::new("sync_articles", &[Erp, General])
            .summary("Import item numbers and descriptions from the ERP")
            .idempotent()
            .cache(CachePolicy::invalidates(&["articles"]))
            .timeout(secs(120)),
        OperationDescriptor::new("reorder_article", &[General, Secondary])
            .summary("Open a purchase order for a known article")
            .params(ParamSchema::new(vec![art_no()]))
            .cache(CachePolicy::invalidates(&["orders"])),
    ]
}

/// The default registry.
pub fn registry() -> Result<Registry, ConfigError> {
    Registry::new(descriptors())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_consistent() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 17);
        let sync = registry.get("sync_articles").unwrap();
        assert_eq!(sync.backends, vec![Erp, General]);
        assert!(sync.idempotent);
        assert!(!registry.get("create_tag").unwrap().idempotent);
    }

    #[test]
    fn create_tag_defaults_status() {
        let registry = registry().unwrap();
        let params = registry
            .get("create_tag")
            .unwrap()
            .schema
            .validate(&json!({"tag_id": "AB", "art_no": "A-1"}))
            .unwrap();
        assert_eq!(params.int("status"), Some(0));
    }
}
