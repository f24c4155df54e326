//! Prometheus metrics for the gateway.
//!
//! Each [`Gateway`](crate::Gateway) owns its own [`Registry`], so several
//! gateways in one process (tests, mostly) never collide on metric names.

use std::time::Instant;

use kanban_core::health::{HealthIndicator, HealthStatus};
use kanban_core::{ConfigError, Registry as Operations, ResultEnvelope};
use kanban_pool::PoolManager;
use prometheus::{
    exponential_buckets, histogram_opts, opts, Encoder, Gauge, HistogramVec, IntCounterVec,
    IntGauge, IntGaugeVec, Registry, TextEncoder,
};

const PREFIX: &str = "kanban";

/// Label used for operation names that are not in the registry.
const UNKNOWN_OPERATION: &str = "unknown";

pub struct GatewayMetrics {
    registry: Registry,
    up: IntGauge,
    backend_available: IntGaugeVec,
    pool_connections: IntGaugeVec,
    invocations_total: IntCounterVec,
    invocation_duration_seconds: HistogramVec,
    cache_hits_total: IntCounterVec,
    generation_duration_seconds: Gauge,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let up = IntGauge::new(format!("{PREFIX}_up"), "Whether the gateway is running")?;
        let backend_available = IntGaugeVec::new(
            opts!(
                format!("{PREFIX}_backend_available"),
                "Whether the backend answered a ping (1) or not (0)"
            ),
            &["backend"],
        )?;
        let pool_connections = IntGaugeVec::new(
            opts!(
                format!("{PREFIX}_pool_connections"),
                "Pooled connections per backend, by state"
            ),
            &["backend", "state"],
        )?;
        let invocations_total = IntCounterVec::new(
            opts!(
                format!("{PREFIX}_invocations_total"),
                "Operation invocations, by outcome"
            ),
            &["operation", "outcome"],
        )?;
        let invocation_duration_seconds = HistogramVec::new(
            histogram_opts!(
                format!("{PREFIX}_invocation_duration_seconds"),
                "Operation latency in seconds",
                exponential_buckets(0.001, 2.0, 14)?
            ),
            &["operation"],
        )?;
        let cache_hits_total = IntCounterVec::new(
            opts!(
                format!("{PREFIX}_cache_hits_total"),
                "Invocations answered from the cache"
            ),
            &["operation"],
        )?;
        let generation_duration_seconds = Gauge::new(
            format!("{PREFIX}_metrics_generation_duration_seconds"),
            "Time spent gathering the previous metrics snapshot",
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(backend_available.clone()))?;
        registry.register(Box::new(pool_connections.clone()))?;
        registry.register(Box::new(invocations_total.clone()))?;
        registry.register(Box::new(invocation_duration_seconds.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(generation_duration_seconds.clone()))?;

        up.set(1);
        Ok(GatewayMetrics {
            registry,
            up,
            backend_available,
            pool_connections,
            invocations_total,
            invocation_duration_seconds,
            cache_hits_total,
            generation_duration_seconds,
        })
    }

    pub(crate) fn build() -> Result<Self, ConfigError> {
        Self::new().map_err(|e| ConfigError::Metrics(e.to_string()))
    }

    /// Count one invocation. The outcome label is `success` or the error kind.
    pub fn record(&self, operations: &Operations, operation: &str, envelope: &ResultEnvelope) {
        let operation = match operations.get(operation) {
            Some(descriptor) => descriptor.name,
            None => UNKNOWN_OPERATION,
        };
        let outcome = match envelope.error_kind() {
            Some(kind) => kind.as_str(),
            None => "success",
        };
        self.invocations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.invocation_duration_seconds
            .with_label_values(&[operation])
            .observe(envelope.meta.latency_ms as f64 / 1000.0);
        if envelope.meta.cache_hit {
            self.cache_hits_total.with_label_values(&[operation]).inc();
        }
    }

    /// Refresh the gauges and render everything in the text exposition format.
    pub async fn render(
        &self,
        indicators: &[Box<dyn HealthIndicator>],
        pools: &PoolManager,
    ) -> Result<String, prometheus::Error> {
        let start = Instant::now();

        self.up.set(1);
        for indicator in indicators {
            let available = match indicator.check().await {
                HealthStatus::Up => 1,
                HealthStatus::Down(_) => 0,
            };
            self.backend_available
                .with_label_values(&[indicator.name()])
                .set(available);
        }
        for backend in pools.backends() {
            if let Some(stats) = pools.stats(backend) {
                let name = backend.as_str();
                self.pool_connections
                    .with_label_values(&[name, "in_use"])
                    .set(stats.in_use as i64);
                self.pool_connections
                    .with_label_values(&[name, "idle"])
                    .set(stats.idle as i64);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        self.generation_duration_seconds
            .set(start.elapsed().as_secs_f64());
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
