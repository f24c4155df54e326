//! Static operation descriptors and the registry that holds them.
//!
//! Descriptors are declared once at startup. [`Registry::new`] refuses
//! inconsistent declarations so that problems surface before the first
//! request, not during it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::backend::BackendId;
use crate::config::ConfigError;
use crate::validation::ParamSchema;

/// How the orchestrator treats the cache for an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Read-through cached under the given key spaces.
    Cacheable {
        #[serde(rename = "ttlSecs", serialize_with = "ser_secs")]
        ttl: Duration,
        #[serde(rename = "keySpaces")]
        key_spaces: Vec<String>,
    },
    /// A write that invalidates every cached entry in the given key spaces once it succeeds.
    Invalidates {
        #[serde(rename = "keySpaces")]
        key_spaces: Vec<String>,
    },
    Never,
}

fn ser_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl CachePolicy {
    pub fn cacheable(ttl: Duration, key_spaces: &[&str]) -> Self {
        CachePolicy::Cacheable {
            ttl,
            key_spaces: key_spaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn invalidates(key_spaces: &[&str]) -> Self {
        CachePolicy::Invalidates {
            key_spaces: key_spaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, CachePolicy::Cacheable { .. })
    }
}

/// Static declaration of a logical business operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub summary: &'static str,
    /// Backends touched, in acquisition and execution order.
    pub backends: Vec<BackendId>,
    #[serde(rename = "params")]
    pub schema: ParamSchema,
    pub idempotent: bool,
    #[serde(rename = "cache")]
    pub cache_policy: CachePolicy,
    /// Per-step execution timeout overriding the gateway default.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl OperationDescriptor {
    pub fn new(name: &'static str, backends: &[BackendId]) -> Self {
        OperationDescriptor {
            name,
            summary: "",
            backends: backends.to_vec(),
            schema: ParamSchema::empty(),
            idempotent: false,
            cache_policy: CachePolicy::Never,
            timeout: None,
        }
    }

    pub fn summary(mut self, summary: &'static str) -> Self {
        self.summary = summary;
        self
    }

    pub fn params(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_multi_backend(&self) -> bool {
        self.backends.len() > 1
    }

    fn check(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("operation name must not be empty".into());
        }
        if self.backends.is_empty() {
            return Err(format!("operation '{}' declares no backend", self.name));
        }
        for (i, b) in self.backends.iter().enumerate() {
            if self.backends[..i].contains(b) {
                return Err(format!("operation '{}' lists backend '{b}' twice", self.name));
            }
        }
        match &self.cache_policy {
            CachePolicy::Cacheable { ttl, key_spaces } => {
                if ttl.is_zero() {
                    return Err(format!("cacheable operation '{}' has a zero TTL", self.name));
                }
                if key_spaces.is_empty() {
                    return Err(format!("cacheable operation '{}' declares no key space", self.name));
                }
            }
            CachePolicy::Invalidates { key_spaces } if key_spaces.is_empty() => {
                return Err(format!(
                    "operation '{}' invalidates an empty key-space set",
                    self.name
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Immutable lookup table of operation descriptors, shared by reference.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, OperationDescriptor>>,
}

impl Registry {
    /// Build the registry, rejecting duplicate names, malformed descriptors
    /// and backend orders that contradict each other.
    ///
    /// Leases are taken in descriptor order, so two operations that acquire
    /// the same pair of backends in opposite orders could each hold one pool
    /// while waiting on the other.
    pub fn new(descriptors: Vec<OperationDescriptor>) -> Result<Self, ConfigError> {
        let mut map = HashMap::with_capacity(descriptors.len());
        let mut problems = Vec::new();
        let mut orders: BTreeMap<(BackendId, BackendId), &'static str> = BTreeMap::new();
        for d in descriptors {
            if let Err(msg) = d.check() {
                problems.push(msg);
                continue;
            }
            if map.contains_key(d.name) {
                problems.push(format!("operation '{}' is declared twice", d.name));
                continue;
            }
            for (i, &first) in d.backends.iter().enumerate() {
                for &then in &d.backends[i + 1..] {
                    if let Some(other) = orders.get(&(then, first)) {
                        problems.push(format!(
                            "operation '{}' acquires '{first}' before '{then}', \
                             but '{other}' acquires them the other way round",
                            d.name
                        ));
                    } else {
                        orders.entry((first, then)).or_insert(d.name);
                    }
                }
            }
            map.insert(d.name, d);
        }
        if !problems.is_empty() {
            return Err(ConfigError::Registry(problems));
        }
        Ok(Registry {
            inner: Arc::new(map),
        })
    }

    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.inner.get(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Descriptors sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> {
        let mut all: Vec<_> = self.inner.values().collect();
        all.sort_by_key(|d| d.name);
        all.into_iter()
    }

    /// Render the registry as JSON for documentation tooling.
    pub fn export(&self) -> serde_json::Value {
        serde_json::json!({
            "operations": self.iter().collect::<Vec<_>>(),
        })
    }
}
