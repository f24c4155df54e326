//! The kanban data gateway.
//!
//! A stateless service layer between callers and three backing stores
//! (ERP, secondary, general). Callers invoke named operations with JSON
//! parameters and receive a uniform [`ResultEnvelope`].

pub mod builder;
pub mod catalog;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod retry;

use std::sync::Arc;
use std::time::Instant;

use kanban_cache::CacheStore;
use kanban_core::health::{self as probes, HealthIndicator, HealthResponse};
use kanban_core::{AuthContext, BackendId, GatewayConfig, GatewayError, GatewayResult, Registry, ResultEnvelope};
use kanban_pool::{PoolManager, PoolStats};
use serde_json::Value;

pub use builder::GatewayBuilder;
pub use metrics::GatewayMetrics;
pub use orchestrator::{Orchestrator, State};
pub use retry::RetryPolicy;

pub struct Gateway {
    orchestrator: Orchestrator,
    indicators: Vec<Box<dyn HealthIndicator>>,
    metrics: GatewayMetrics,
    started: Instant,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Invoke a named operation.
    ///
    /// Never fails outright: every outcome, including unknown operations and
    /// internal faults, is reported through the envelope.
    pub async fn invoke(&self, operation: &str, params: Value, auth: &AuthContext) -> ResultEnvelope {
        let envelope = self.orchestrator.invoke(operation, &params, auth).await;
        self.metrics.record(self.operations(), operation, &envelope);
        envelope
    }

    pub fn operations(&self) -> &Registry {
        self.orchestrator.registry()
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        self.orchestrator.pools()
    }

    pub fn pool_stats(&self, backend: BackendId) -> Option<PoolStats> {
        self.orchestrator.pools().stats(backend)
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        self.orchestrator.cache()
    }

    /// Every backend, UP only if all answer a ping.
    pub async fn health(&self) -> HealthResponse {
        probes::aggregate(&self.indicators, false, self.started).await
    }

    pub fn liveness(&self) -> HealthResponse {
        HealthResponse::alive(self.started)
    }

    pub async fn readiness(&self) -> HealthResponse {
        probes::aggregate(&self.indicators, true, self.started).await
    }

    /// Prometheus text exposition: invocation counters and latency,
    /// pool occupancy, and per-backend availability from a fresh ping.
    pub async fn metrics(&self) -> GatewayResult<String> {
        self.metrics
            .render(&self.indicators, self.orchestrator.pools())
            .await
            .map_err(|e| GatewayError::internal(format!("metrics encoding failed: {e}")))
    }

    /// Stop the cache sweeper and close every pool.
    pub async fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
        self.orchestrator.pools().shutdown().await;
        tracing::info!("Gateway shut down");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
