use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kanban_cache::{CacheStore, InMemoryStore, NoopStore};
use kanban_core::config::{
    CacheSettings, ErpSettings, OrchestratorSettings, PoolSettings, RetrySettings,
};
use kanban_core::health::HealthIndicator;
use kanban_core::{BackendId, ConfigError, GatewayConfig, Registry};
use kanban_data::{BackendAdapter, Dialect, ErpAdapter, GeneralAdapter, SecondaryAdapter};
use kanban_pool::{Connector, PoolConfig, PoolManager};

use crate::catalog;
use crate::health::PoolHealth;
use crate::metrics::GatewayMetrics;
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use crate::Gateway;

/// Assembles a [`Gateway`] from configuration, connectors and adapters.
///
/// Anything not set explicitly comes from the configuration: pool sizing
/// from `backends.<id>.*`, retry from `retry.*`, the cache from `cache.*`.
///
/// ```ignore
/// let gateway = Gateway::builder(GatewayConfig::load("dev")?)
///     .with_sqlite_connectors()?
///     .with_default_adapters()?
///     .build()?;
/// ```
pub struct GatewayBuilder {
    config: GatewayConfig,
    registry: Option<Registry>,
    connectors: HashMap<BackendId, Arc<dyn Connector>>,
    pool_configs: HashMap<BackendId, PoolConfig>,
    adapters: HashMap<BackendId, Arc<dyn BackendAdapter>>,
    cache: Option<Arc<dyn CacheStore>>,
    retry: Option<RetryPolicy>,
    execution_timeout: Option<Duration>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        GatewayBuilder {
            config,
            registry: None,
            connectors: HashMap::new(),
            pool_configs: HashMap::new(),
            adapters: HashMap::new(),
            cache: None,
            retry: None,
            execution_timeout: None,
        }
    }

    /// Replace the built-in operation catalog.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_connector(mut self, backend: BackendId, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(backend, connector);
        self
    }

    /// Override the configured pool settings of one backend.
    pub fn with_pool_config(mut self, backend: BackendId, config: PoolConfig) -> Self {
        self.pool_configs.insert(backend, config);
        self
    }

    /// Register an adapter for the backend it reports.
    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(adapter.backend(), adapter);
        self
    }

    /// The ERP, secondary and general adapters, with dialects taken from
    /// the configured backend URLs.
    pub fn with_default_adapters(self) -> Result<Self, ConfigError> {
        let erp = self.config.section::<ErpSettings>()?;
        let dialect = |backend| -> Result<Dialect, ConfigError> {
            let settings = PoolSettings::for_backend(&self.config, backend)?;
            Ok(settings.url.as_deref().map(Dialect::from_url).unwrap_or_default())
        };
        let erp_adapter = ErpAdapter::new(erp.company, dialect(BackendId::Erp)?);
        let secondary = SecondaryAdapter::new(dialect(BackendId::Secondary)?);
        let general = GeneralAdapter::new(dialect(BackendId::General)?);
        Ok(self
            .with_adapter(Arc::new(erp_adapter))
            .with_adapter(Arc::new(secondary))
            .with_adapter(Arc::new(general)))
    }

    /// SQLite connectors for every backend whose URL uses the `sqlite:` scheme,
    /// bootstrapping each store's schema on connect.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite_connectors(mut self) -> Result<Self, ConfigError> {
        use kanban_data::{schema, SqliteConnector};

        let company = self.config.section::<ErpSettings>()?.company;
        for backend in BackendId::ALL {
            let settings = PoolSettings::for_backend(&self.config, backend)?;
            let Some(url) = settings.url.filter(|u| u.starts_with("sqlite:")) else {
                continue;
            };
            let connector = SqliteConnector::new(&url)
                .map_err(|e| ConfigError::Load(format!("backends.{backend}.url: {e}")))?;
            let connector = match backend {
                BackendId::General => connector.with_schema(schema::GENERAL),
                BackendId::Secondary => connector.with_schema(schema::SECONDARY),
                BackendId::Erp => connector.with_schema(&schema::erp_mirror(&company)),
            };
            self.connectors.insert(backend, Arc::new(connector));
        }
        Ok(self)
    }

    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Validate the assembly and start the gateway.
    ///
    /// Fails when a descriptor names a backend without a pool, or a backend
    /// whose adapter cannot run that operation.
    pub fn build(self) -> Result<Gateway, ConfigError> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => catalog::registry()?,
        };
        let cache_settings = self.config.section::<CacheSettings>()?;
        let retry = match self.retry {
            Some(retry) => retry,
            None => RetryPolicy::from(&self.config.section::<RetrySettings>()?),
        };
        let execution_timeout = match self.execution_timeout {
            Some(timeout) => timeout,
            None => self.config.section::<OrchestratorSettings>()?.execution_timeout(),
        };

        let mut pools = PoolManager::new();
        for (backend, connector) in self.connectors {
            let config = match self.pool_configs.get(&backend) {
                Some(config) => config.clone(),
                None => PoolConfig::from(&PoolSettings::for_backend(&self.config, backend)?),
            };
            pools = pools.with_pool(backend, connector, config);
        }

        let mut problems = Vec::new();
        for descriptor in registry.iter() {
            for backend in &descriptor.backends {
                if !pools.contains(*backend) {
                    problems.push(format!(
                        "operation '{}' needs backend '{backend}', which has no connector",
                        descriptor.name
                    ));
                }
                match self.adapters.get(backend) {
                    Some(adapter) if adapter.supports(descriptor.name) => {}
                    Some(_) => problems.push(format!(
                        "adapter for '{backend}' does not support operation '{}'",
                        descriptor.name
                    )),
                    None => problems.push(format!(
                        "operation '{}' needs backend '{backend}', which has no adapter",
                        descriptor.name
                    )),
                }
            }
        }
        if !problems.is_empty() {
            problems.dedup();
            return Err(ConfigError::Registry(problems));
        }

        let cache: Arc<dyn CacheStore> = match self.cache {
            Some(store) => store,
            None if cache_settings.enabled => Arc::new(InMemoryStore::new()),
            None => Arc::new(NoopStore),
        };
        let metrics = GatewayMetrics::build()?;
        let sweeper = spawn_sweeper(cache.clone(), &cache_settings);

        let pools = Arc::new(pools);
        let indicators: Vec<Box<dyn HealthIndicator>> = pools
            .backends()
            .map(|backend| {
                Box::new(PoolHealth::new(backend, pools.clone(), execution_timeout)) as Box<dyn HealthIndicator>
            })
            .collect();

        tracing::info!(
            profile = self.config.profile(),
            operations = registry.len(),
            backends = indicators.len(),
            cache = cache_settings.enabled,
            "Gateway ready"
        );
        let orchestrator = Orchestrator::new(registry, pools, self.adapters, cache, retry, execution_timeout);
        Ok(Gateway {
            orchestrator,
            indicators,
            metrics,
            started: Instant::now(),
            sweeper,
        })
    }
}

/// Periodically drop expired cache entries, when a runtime is available.
fn spawn_sweeper(
    cache: Arc<dyn CacheStore>,
    settings: &CacheSettings,
) -> Option<tokio::task::JoinHandle<()>> {
    if !settings.enabled || settings.sweep_interval_secs == 0 {
        return None;
    }
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let period = Duration::from_secs(settings.sweep_interval_secs);
    Some(handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = cache.evict_expired().await;
            if evicted > 0 {
                tracing::debug!(evicted, "Expired cache entries evicted");
            }
        }
    }))
}
