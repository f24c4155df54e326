use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kanban_core::{BackendId, GatewayError, GatewayResult, OperationDescriptor};
use kanban_data::{BackendAdapter, RawResult, StepInput};
use kanban_pool::BackendConnection;
use serde_json::{json, Value};

enum Scripted {
    Fail(GatewayError),
    Delay(Duration),
}

#[derive(Default)]
struct OpState {
    response: Option<RawResult>,
    script: VecDeque<Scripted>,
    calls: usize,
    last_params: Option<Value>,
    last_handoff: Option<Value>,
}

/// Adapter with canned responses, for orchestrator tests.
///
/// Each operation answers with its configured response (`{}` if none).
/// `fail_next` and `delay_next` queue one-shot behaviour consumed in order
/// by the following calls.
///
/// ```ignore
/// let general = Arc::new(StubAdapter::new(BackendId::General, &["reserve_stock"]));
/// general.respond("reserve_stock", json!({"reserved": true}));
/// general.fail_next("reserve_stock", GatewayError::unreachable(BackendId::General, "reset"));
/// ```
pub struct StubAdapter {
    backend: BackendId,
    operations: Vec<&'static str>,
    ops: Mutex<HashMap<String, OpState>>,
}

impl StubAdapter {
    pub fn new(backend: BackendId, operations: &[&'static str]) -> Self {
        StubAdapter {
            backend,
            operations: operations.to_vec(),
            ops: Mutex::new(HashMap::new()),
        }
    }

    pub fn respond(&self, operation: &str, data: Value) -> &Self {
        self.respond_raw(operation, RawResult::new(data))
    }

    /// Respond with `data` and pass `handoff` to the next step.
    pub fn respond_with_handoff(&self, operation: &str, data: Value, handoff: Value) -> &Self {
        self.respond_raw(operation, RawResult::new(data).handoff(handoff))
    }

    pub fn respond_raw(&self, operation: &str, result: RawResult) -> &Self {
        self.with_op(operation, |op| op.response = Some(result));
        self
    }

    /// Fail the next call of `operation` with `err`.
    pub fn fail_next(&self, operation: &str, err: GatewayError) {
        self.with_op(operation, |op| op.script.push_back(Scripted::Fail(err)));
    }

    /// Sleep before answering the next call of `operation`.
    pub fn delay_next(&self, operation: &str, delay: Duration) {
        self.with_op(operation, |op| op.script.push_back(Scripted::Delay(delay)));
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.ops.lock().unwrap().get(operation).map_or(0, |op| op.calls)
    }

    pub fn total_calls(&self) -> usize {
        self.ops.lock().unwrap().values().map(|op| op.calls).sum()
    }

    /// Validated parameters seen by the latest call of `operation`.
    pub fn last_params(&self, operation: &str) -> Option<Value> {
        self.ops.lock().unwrap().get(operation).and_then(|op| op.last_params.clone())
    }

    /// Hand-off received by the latest call of `operation`.
    pub fn last_handoff(&self, operation: &str) -> Option<Value> {
        self.ops.lock().unwrap().get(operation).and_then(|op| op.last_handoff.clone())
    }

    fn with_op<R>(&self, operation: &str, f: impl FnOnce(&mut OpState) -> R) -> R {
        let mut ops = self.ops.lock().unwrap();
        f(ops.entry(operation.to_string()).or_default())
    }
}

#[async_trait]
impl BackendAdapter for StubAdapter {
    fn backend(&self) -> BackendId {
        self.backend
    }

    fn operations(&self) -> &[&'static str] {
        &self.operations
    }

    async fn execute(
        &self,
        descriptor: &OperationDescriptor,
        _conn: &mut dyn BackendConnection,
        input: StepInput<'_>,
    ) -> GatewayResult<RawResult> {
        let (scripted, response) = self.with_op(descriptor.name, |op| {
            op.calls += 1;
            op.last_params = Some(input.params.to_value());
            op.last_handoff = input.handoff().cloned();
            (op.script.pop_front(), op.response.clone())
        });
        match scripted {
            Some(Scripted::Fail(err)) => return Err(err),
            Some(Scripted::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }
        Ok(response.unwrap_or_else(|| RawResult::new(json!({}))))
    }
}
