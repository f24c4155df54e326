use serde_json::{Map, Value};

/// Cache key: operation name plus canonicalised parameters.
///
/// Two parameter objects that differ only in key order map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: String,
    params: String,
}

impl CacheKey {
    pub fn new(operation: &str, params: &Value) -> Self {
        CacheKey {
            operation: operation.to_string(),
            params: canonical(params).to_string(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params(&self) -> &str {
        &self.params
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.operation, self.params)
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonical(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = CacheKey::new("reserve_stock", &json!({"sku": "X1", "qty": 5}));
        let b = CacheKey::new("reserve_stock", &json!({"qty": 5, "sku": "X1"}));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"reserve_stock:{"qty":5,"sku":"X1"}"#);
    }

    #[test]
    fn null_and_empty_params_are_equivalent() {
        assert_eq!(
            CacheKey::new("list_articles", &Value::Null),
            CacheKey::new("list_articles", &json!({}))
        );
    }

    #[test]
    fn operation_is_part_of_the_key() {
        let params = json!({"art_no": "A-1"});
        assert_ne!(
            CacheKey::new("get_article", &params),
            CacheKey::new("lookup_erp_item", &params)
        );
    }
}
