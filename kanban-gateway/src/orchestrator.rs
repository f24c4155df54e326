//! Per-invocation state machine.
//!
//! ```text
//! Validating -> CacheCheck -> Acquiring -> Executing -> CacheUpdate -> Completed
//!     |             |             |            |
//!     +-------------+-------------+------------+--> Failed
//! ```
//!
//! `CacheCheck` runs for cacheable operations only and may complete on a hit;
//! `CacheUpdate` runs after cacheable reads and invalidating writes. Every path ends
//! in `Completed` or `Failed` with all leases returned to their pools.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use kanban_cache::{CacheEntry, CacheKey, CacheStore};
use kanban_core::validation;
use kanban_core::{
    AuthContext, BackendId, CachePolicy, GatewayError, GatewayResult, Meta, OperationDescriptor,
    PartialFailure, Registry, ResultEnvelope, StepOutcome, TypedParams,
};
use kanban_data::{BackendAdapter, RawResult, StepInput};
use kanban_pool::{Lease, PoolManager};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Validating,
    CacheCheck,
    Acquiring,
    Executing,
    CacheUpdate,
    Completed,
    Failed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Validating => "validating",
            State::CacheCheck => "cache_check",
            State::Acquiring => "acquiring",
            State::Executing => "executing",
            State::CacheUpdate => "cache_update",
            State::Completed => "completed",
            State::Failed => "failed",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Tracker {
    state: State,
}

impl Tracker {
    fn new() -> Self {
        tracing::debug!(state = %State::Validating, "Invocation started");
        Tracker {
            state: State::Validating,
        }
    }

    fn enter(&mut self, next: State) {
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

/// Why an attempt stopped.
enum Stop {
    /// A step (acquisition or execution) failed on `backend`.
    Step(BackendId, GatewayError),
    /// The gateway itself misbehaved; never retried, never partial.
    Internal(GatewayError),
}

/// Drives invocations against pools, adapters and the cache.
pub struct Orchestrator {
    registry: Registry,
    pools: Arc<PoolManager>,
    adapters: HashMap<BackendId, Arc<dyn BackendAdapter>>,
    cache: Arc<dyn CacheStore>,
    retry: RetryPolicy,
    execution_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        pools: Arc<PoolManager>,
        adapters: HashMap<BackendId, Arc<dyn BackendAdapter>>,
        cache: Arc<dyn CacheStore>,
        retry: RetryPolicy,
        execution_timeout: Duration,
    ) -> Self {
        Orchestrator {
            registry,
            pools,
            adapters,
            cache,
            retry,
            execution_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Run one operation and wrap the outcome in a [`ResultEnvelope`].
    pub async fn invoke(&self, operation: &str, params: &Value, auth: &AuthContext) -> ResultEnvelope {
        let span = tracing::info_span!("invoke", operation, subject = %auth.subject);
        async {
            let started = Instant::now();
            let mut meta = Meta::default();
            let mut tracker = Tracker::new();

            let outcome = self.drive(operation, params, auth, &mut meta, &mut tracker).await;
            meta.latency_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(data) => {
                    tracker.enter(State::Completed);
                    ResultEnvelope::success(data, meta)
                }
                Err(err) => {
                    tracker.enter(State::Failed);
                    if let GatewayError::InternalFault(_) = err {
                        tracing::error!(error = %err, "Invocation failed");
                    } else {
                        tracing::debug!(kind = %err.kind(), error = %err, "Invocation failed");
                    }
                    ResultEnvelope::failure(&err, meta)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        operation: &str,
        raw: &Value,
        auth: &AuthContext,
        meta: &mut Meta,
        tracker: &mut Tracker,
    ) -> GatewayResult<Value> {
        let params = validation::validate(&self.registry, operation, raw)?;
        let descriptor = self
            .registry
            .get(operation)
            .ok_or_else(|| GatewayError::internal(format!("operation '{operation}' vanished from the registry")))?;

        let key = CacheKey::new(descriptor.name, &params.to_value());
        let mut observed = None;
        if descriptor.cache_policy.is_cacheable() {
            tracker.enter(State::CacheCheck);
            // Observed before the read so a concurrent invalidation wins.
            let generation = self.cache.generation().await;
            if let Some(entry) = self.cache.get(&key).await {
                match serde_json::from_slice::<Value>(&entry.value) {
                    Ok(data) => {
                        tracing::debug!(key = %key, "Cache hit");
                        meta.cache_hit = true;
                        meta.source_backend = Some(entry.source);
                        return Ok(data);
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "Dropping undecodable cache entry");
                        self.cache.remove(&key).await;
                    }
                }
            }
            observed = Some(generation);
        }

        let outcome = self.execute(descriptor, &params, auth, meta, tracker).await;

        match (&descriptor.cache_policy, &outcome) {
            (CachePolicy::Cacheable { ttl, key_spaces }, Ok(data)) => {
                tracker.enter(State::CacheUpdate);
                self.populate(key, data, *ttl, key_spaces, meta, observed.unwrap_or_default())
                    .await;
            }
            (CachePolicy::Invalidates { key_spaces }, Ok(_))
            | (
                CachePolicy::Invalidates { key_spaces },
                Err(GatewayError::PartialMultiBackendFailure(_)),
            ) => {
                tracker.enter(State::CacheUpdate);
                let removed = self.cache.invalidate(key_spaces).await;
                tracing::debug!(?key_spaces, removed, "Invalidated after write");
            }
            _ => {}
        }
        outcome
    }

    async fn populate(
        &self,
        key: CacheKey,
        data: &Value,
        ttl: Duration,
        key_spaces: &[String],
        meta: &Meta,
        generation: u64,
    ) {
        let Some(source) = meta.source_backend else {
            return;
        };
        match serde_json::to_vec(data) {
            Ok(bytes) => {
                let entry = CacheEntry::new(Bytes::from(bytes), source, ttl, key_spaces, generation);
                if !self.cache.put(key, entry).await {
                    tracing::debug!("Cache population skipped");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Result not cacheable"),
        }
    }

    /// Execute every step, retrying idempotent operations from the failed step.
    async fn execute(
        &self,
        descriptor: &OperationDescriptor,
        params: &TypedParams,
        auth: &AuthContext,
        meta: &mut Meta,
        tracker: &mut Tracker,
    ) -> GatewayResult<Value> {
        let max_attempts = if descriptor.idempotent { self.retry.max_attempts } else { 1 };
        let mut backoff = self.retry.backoff();
        let mut results: Vec<RawResult> = Vec::with_capacity(descriptor.backends.len());

        loop {
            meta.attempts += 1;
            let stop = match self.attempt(descriptor, params, auth, &mut results, tracker).await {
                Ok(()) => break,
                Err(stop) => stop,
            };
            match stop {
                Stop::Step(backend, err) if err.is_transient() && meta.attempts < max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        attempt = meta.attempts,
                        backend = %backend,
                        resume_at = results.len(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Stop::Step(backend, err) => {
                    return Err(self.step_failure(descriptor, &results, backend, err, meta));
                }
                Stop::Internal(err) => {
                    meta.steps = completed_steps(descriptor, &results);
                    return Err(err);
                }
            }
        }

        meta.steps = completed_steps(descriptor, &results);
        meta.source_backend = descriptor.backends.last().copied();
        Ok(merge(results))
    }

    /// Acquire leases for the remaining backends and run their steps.
    async fn attempt(
        &self,
        descriptor: &OperationDescriptor,
        params: &TypedParams,
        auth: &AuthContext,
        results: &mut Vec<RawResult>,
        tracker: &mut Tracker,
    ) -> Result<(), Stop> {
        let remaining = &descriptor.backends[results.len()..];

        tracker.enter(State::Acquiring);
        let mut leases = Vec::with_capacity(remaining.len());
        for &backend in remaining {
            match self.pools.acquire(backend, None).await {
                Ok(lease) => leases.push(lease),
                Err(err) => {
                    self.release_all(leases).map_err(Stop::Internal)?;
                    return Err(Stop::Step(backend, err));
                }
            }
        }

        tracker.enter(State::Executing);
        let timeout = descriptor.timeout.unwrap_or(self.execution_timeout);
        let mut pending = leases.into_iter();
        let mut used = Vec::with_capacity(remaining.len());
        let mut failure = None;

        for mut lease in pending.by_ref() {
            let backend = lease.backend();
            let step = self
                .step(descriptor, &mut lease, params, results.as_slice(), auth, timeout)
                .await;
            used.push(lease);
            match step {
                Ok(raw) => results.push(raw),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
            tracing::debug!(backend = %backend, "Step succeeded");
        }

        self.release_all(used.into_iter().chain(pending))
            .map_err(Stop::Internal)?;
        match failure {
            None => Ok(()),
            Some(stop) => Err(stop),
        }
    }

    async fn step(
        &self,
        descriptor: &OperationDescriptor,
        lease: &mut Lease,
        params: &TypedParams,
        results: &[RawResult],
        auth: &AuthContext,
        timeout: Duration,
    ) -> Result<RawResult, Stop> {
        let backend = lease.backend();
        let adapter = self.adapters.get(&backend).ok_or_else(|| {
            Stop::Internal(GatewayError::internal(format!("no adapter for backend '{backend}'")))
        })?;
        let conn = lease.connection().map_err(Stop::Internal)?;
        let input = StepInput::new(params, results, auth);

        let outcome = match tokio::time::timeout(timeout, adapter.execute(descriptor, conn, input)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::unreachable(
                backend,
                format!("execution timed out after {}ms", timeout.as_millis()),
            )),
        };
        outcome.map_err(|err| {
            if err.poisons_connection() {
                lease.mark_broken();
            }
            match err {
                GatewayError::InternalFault(_) => Stop::Internal(err),
                err => Stop::Step(backend, err),
            }
        })
    }

    fn release_all(&self, leases: impl IntoIterator<Item = Lease>) -> GatewayResult<()> {
        let mut first = None;
        for lease in leases {
            if let Err(err) = self.pools.release(lease) {
                tracing::error!(error = %err, "Lease release failed");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn step_failure(
        &self,
        descriptor: &OperationDescriptor,
        results: &[RawResult],
        backend: BackendId,
        err: GatewayError,
        meta: &mut Meta,
    ) -> GatewayError {
        let completed = completed_steps(descriptor, results);
        meta.steps = completed.clone();
        meta.steps.push(StepOutcome::failed(backend, err.kind()));
        if completed.is_empty() {
            return err;
        }
        tracing::warn!(
            completed = completed.len(),
            failed_backend = %backend,
            error = %err,
            "Multi-backend operation partially applied"
        );
        GatewayError::PartialMultiBackendFailure(PartialFailure {
            operation: descriptor.name.to_string(),
            completed,
            failed_backend: backend,
            cause: Box::new(err),
        })
    }
}

fn completed_steps(descriptor: &OperationDescriptor, results: &[RawResult]) -> Vec<StepOutcome> {
    descriptor
        .backends
        .iter()
        .zip(results)
        .map(|(backend, raw)| StepOutcome::succeeded(*backend, raw.rows_affected))
        .collect()
}

/// Single-step data as is; object outputs of several steps merged in order.
fn merge(mut results: Vec<RawResult>) -> Value {
    if results.len() == 1 {
        return results.remove(0).data;
    }
    if results.iter().all(|r| r.data.is_object()) {
        let mut merged = Map::new();
        for raw in results {
            if let Value::Object(map) = raw.data {
                merged.extend(map);
            }
        }
        Value::Object(merged)
    } else {
        Value::Array(results.into_iter().map(|r| r.data).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_prefers_later_steps() {
        let merged = merge(vec![
            RawResult::new(json!({"art_no": "A-1", "fetched": 3})),
            RawResult::new(json!({"fetched": 3, "created": 1})),
        ]);
        assert_eq!(merged, json!({"art_no": "A-1", "fetched": 3, "created": 1}));
    }

    #[test]
    fn merge_keeps_single_step_data_untouched() {
        assert_eq!(merge(vec![RawResult::new(json!([1, 2]))]), json!([1, 2]));
    }

    #[test]
    fn merge_falls_back_to_a_list() {
        let merged = merge(vec![RawResult::new(json!({"a": 1})), RawResult::new(json!(7))]);
        assert_eq!(merged, json!([{"a": 1}, 7]));
    }
}
