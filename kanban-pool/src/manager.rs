use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kanban_core::config::{ConfigError, GatewayConfig, PoolSettings};
use kanban_core::{BackendId, GatewayError, GatewayResult};

use crate::connection::Connector;
use crate::pool::{Lease, Pool, PoolConfig, PoolStats};

/// The set of backend pools, created at startup and torn down by [`shutdown`](Self::shutdown).
///
/// Pools are independent: exhausting one never blocks another.
#[derive(Default)]
pub struct PoolManager {
    pools: BTreeMap<BackendId, Pool>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the pool for `backend`, replacing any previous one.
    pub fn with_pool(
        mut self,
        backend: BackendId,
        connector: Arc<dyn Connector>,
        config: PoolConfig,
    ) -> Self {
        tracing::debug!(backend = %backend, max_size = config.max_size, "Registering pool");
        self.pools.insert(backend, Pool::new(backend, connector, config));
        self
    }

    /// Register a pool sized from `backends.<id>.*`.
    pub fn with_configured_pool(
        self,
        config: &GatewayConfig,
        backend: BackendId,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        let settings = PoolSettings::for_backend(config, backend)?;
        Ok(self.with_pool(backend, connector, PoolConfig::from(&settings)))
    }

    pub fn contains(&self, backend: BackendId) -> bool {
        self.pools.contains_key(&backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = BackendId> + '_ {
        self.pools.keys().copied()
    }

    fn pool(&self, backend: BackendId) -> GatewayResult<&Pool> {
        self.pools
            .get(&backend)
            .ok_or_else(|| GatewayError::internal(format!("no pool registered for '{backend}'")))
    }

    /// Lease a connection to `backend`.
    ///
    /// Fails with `PoolExhausted` (fail-fast pools), `PoolTimeout` (no slot
    /// within `timeout`) or `BackendUnreachable` (connect failure, pool shut down).
    pub async fn acquire(&self, backend: BackendId, timeout: Option<Duration>) -> GatewayResult<Lease> {
        self.pool(backend)?.acquire(timeout).await
    }

    /// Return a lease. Never blocks.
    ///
    /// A lease this manager did not hand out is an `InternalFault`; it still
    /// goes back to its own pool when dropped.
    pub fn release(&self, mut lease: Lease) -> GatewayResult<()> {
        let owned = self
            .pools
            .get(&lease.backend())
            .is_some_and(|pool| pool.owns(&lease));
        if !owned {
            return Err(GatewayError::internal(format!(
                "lease {} on '{}' is not outstanding in this pool manager",
                lease.id(),
                lease.backend()
            )));
        }
        lease.reclaim()
    }

    pub fn stats(&self, backend: BackendId) -> Option<PoolStats> {
        self.pools.get(&backend).map(Pool::stats)
    }

    /// Lease a connection and ping it. Used by health checks.
    pub async fn ping(&self, backend: BackendId, timeout: Duration) -> GatewayResult<()> {
        let mut lease = self.acquire(backend, Some(timeout)).await?;
        let outcome = match tokio::time::timeout(timeout, lease.connection()?.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::unreachable(backend, e.to_string())),
            Err(_) => Err(GatewayError::unreachable(backend, "ping timed out")),
        };
        if outcome.is_err() {
            lease.mark_broken();
        }
        self.release(lease)?;
        outcome
    }

    /// Close every pool. Later acquires fail with `BackendUnreachable`.
    pub async fn shutdown(&self) {
        for pool in self.pools.values() {
            pool.shutdown().await;
        }
        tracing::info!(pools = self.pools.len(), "Connection pools shut down");
    }
}
