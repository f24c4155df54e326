use kanban_core::{AuthContext, BackendId, ErrorKind, ResultEnvelope};
use kanban_gateway::{Gateway, GatewayBuilder};
use kanban_pool::PoolStats;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// In-process client around a built [`Gateway`].
///
/// ```ignore
/// let app = TestGateway::from_builder(builder);
/// app.invoke("reserve_stock")
///     .params(json!({"sku": "X1", "qty": 5}))
///     .send()
///     .await
///     .assert_success()
///     .assert_json_path("data.reserved", true);
/// ```
pub struct TestGateway {
    gateway: Gateway,
}

impl TestGateway {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Build the gateway, panicking on a configuration error.
    pub fn from_builder(builder: GatewayBuilder) -> Self {
        let gateway = builder
            .build()
            .unwrap_or_else(|e| panic!("gateway failed to build: {e}"));
        Self::new(gateway)
    }

    /// Start building an invocation.
    pub fn invoke(&self, operation: &str) -> TestInvocation<'_> {
        TestInvocation {
            app: self,
            operation: operation.to_string(),
            params: Value::Null,
            auth: AuthContext::new("test"),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Pool counters of `backend`, which must have a pool.
    pub fn pool_stats(&self, backend: BackendId) -> PoolStats {
        self.gateway
            .pool_stats(backend)
            .unwrap_or_else(|| panic!("no pool for backend '{backend}'"))
    }

    /// Assert every lease handed out by `backend` has come back.
    pub fn assert_leases_returned(&self, backend: BackendId) -> &Self {
        let stats = self.pool_stats(backend);
        assert_eq!(
            stats.acquired, stats.released,
            "leases outstanding on '{backend}': {stats:?}"
        );
        assert_eq!(stats.in_use, 0, "connections in use on '{backend}': {stats:?}");
        self
    }
}

/// Builder for one invocation.
pub struct TestInvocation<'a> {
    app: &'a TestGateway,
    operation: String,
    params: Value,
    auth: AuthContext,
}

impl TestInvocation<'_> {
    pub fn params(mut self, params: impl Serialize) -> Self {
        self.params = serde_json::to_value(params).unwrap();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.auth.subject = subject.to_string();
        self
    }

    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.auth = self.auth.with_roles(roles);
        self
    }

    pub async fn send(self) -> TestEnvelope {
        let envelope = self.app.gateway.invoke(&self.operation, self.params, &self.auth).await;
        let body = serde_json::to_value(&envelope).unwrap();
        TestEnvelope { envelope, body }
    }
}

// ─── JSON path resolution ───

#[derive(Debug)]
pub enum PathToken {
    Field(String),
    Index(usize),
    Len,
}

/// Split `a.b[0].len()` into tokens.
pub fn tokenize_path(path: &str) -> Vec<PathToken> {
    let mut tokens = Vec::new();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        if segment == "len()" {
            tokens.push(PathToken::Len);
            continue;
        }
        let (field, mut rest) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !field.is_empty() {
            tokens.push(PathToken::Field(field.to_string()));
        }
        while let Some(start) = rest.find('[') {
            let end = rest.find(']').expect("unclosed bracket in JSON path");
            let index = rest[start + 1..end]
                .parse()
                .expect("non-numeric array index in JSON path");
            tokens.push(PathToken::Index(index));
            rest = &rest[end + 1..];
        }
    }
    tokens
}

/// Resolve a path produced by [`tokenize_path`]; missing values are `null`.
pub fn resolve_path(root: &Value, path: &str) -> Value {
    let mut current = root.clone();
    for token in tokenize_path(path) {
        current = match token {
            PathToken::Field(name) => current.get(&name).cloned().unwrap_or(Value::Null),
            PathToken::Index(idx) => current.get(idx).cloned().unwrap_or(Value::Null),
            PathToken::Len => match &current {
                Value::Array(a) => Value::from(a.len()),
                Value::Object(o) => Value::from(o.len()),
                Value::String(s) => Value::from(s.len()),
                other => panic!("len() applied to non-collection: {other}"),
            },
        };
    }
    current
}

// ─── TestEnvelope ───

/// Result of an invocation with fluent assertions.
///
/// JSON paths resolve against the serialised envelope, so they start at
/// `status`, `data`, `error` or `meta`.
pub struct TestEnvelope {
    pub envelope: ResultEnvelope,
    pub body: Value,
}

impl TestEnvelope {
    pub fn assert_success(self) -> Self {
        assert!(self.envelope.is_success(), "Expected success\nEnvelope: {}", self.body);
        self
    }

    pub fn assert_kind(self, expected: ErrorKind) -> Self {
        assert_eq!(
            self.envelope.error_kind(),
            Some(expected),
            "Expected {expected}\nEnvelope: {}",
            self.body
        );
        self
    }

    pub fn assert_cache_hit(self, expected: bool) -> Self {
        assert_eq!(
            self.envelope.meta.cache_hit, expected,
            "Expected cacheHit={expected}\nEnvelope: {}",
            self.body
        );
        self
    }

    pub fn assert_attempts(self, expected: u32) -> Self {
        assert_eq!(
            self.envelope.meta.attempts, expected,
            "Expected {expected} attempt(s)\nEnvelope: {}",
            self.body
        );
        self
    }

    pub fn assert_source(self, expected: BackendId) -> Self {
        assert_eq!(
            self.envelope.meta.source_backend,
            Some(expected),
            "Expected source backend {expected}\nEnvelope: {}",
            self.body
        );
        self
    }

    /// Assert that a JSON path resolves to the expected value.
    ///
    /// ```ignore
    /// env.assert_json_path("data.tags.len()", 2)
    ///     .assert_json_path("meta.steps[0].backend", "general")
    ///     .assert_json_path("error.kind", "BackendRejected");
    /// ```
    pub fn assert_json_path(self, path: &str, expected: impl Into<Value>) -> Self {
        let actual = resolve_path(&self.body, path);
        let expected = expected.into();
        assert_eq!(
            actual, expected,
            "JSON path \"{path}\" assertion failed\n  Expected: {expected}\n  Actual:   {actual}\n  Envelope: {}",
            self.body
        );
        self
    }

    pub fn assert_json_path_fn(self, path: &str, predicate: impl FnOnce(&Value) -> bool) -> Self {
        let actual = resolve_path(&self.body, path);
        assert!(
            predicate(&actual),
            "JSON path \"{path}\" predicate failed\n  Value: {actual}\n  Envelope: {}",
            self.body
        );
        self
    }

    /// Extract and deserialize a value at a JSON path.
    pub fn json_path<T: DeserializeOwned>(&self, path: &str) -> T {
        let value = resolve_path(&self.body, path);
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            panic!("Failed to deserialize JSON path \"{path}\": {e}\n  Value: {value}\n  Envelope: {}", self.body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_paths() {
        let root = json!({"data": {"tags": [{"tag_id": "A"}, {"tag_id": "B"}]}, "meta": {"cacheHit": false}});
        assert_eq!(resolve_path(&root, "data.tags[1].tag_id"), json!("B"));
        assert_eq!(resolve_path(&root, "data.tags.len()"), json!(2));
        assert_eq!(resolve_path(&root, "meta.cacheHit"), json!(false));
        assert_eq!(resolve_path(&root, "error.kind"), Value::Null);
    }
}
