use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kanban_pool::{BackendConnection, Connector, NativeError, Row, Statement};

type Handler = Arc<dyn Fn(&Statement) -> Result<Vec<Row>, NativeError> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    closed: AtomicUsize,
    pings: AtomicUsize,
    refuse: AtomicBool,
    fail_ping: AtomicBool,
    handler: Mutex<Option<Handler>>,
    statements: Mutex<Vec<String>>,
}

/// In-memory backend for pool and gateway tests.
///
/// Every connection answers statements through a shared handler (empty rows
/// by default). Counters and fault switches are shared by all clones.
///
/// ```ignore
/// let backend = FakeConnector::new();
/// backend.refuse_connections(true);
/// // ... acquire fails with BackendUnreachable
/// assert_eq!(backend.connects(), 1);
/// ```
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every statement with `handler`.
    pub fn with_handler(
        self,
        handler: impl Fn(&Statement) -> Result<Vec<Row>, NativeError> + Send + Sync + 'static,
    ) -> Self {
        *self.state.handler.lock().unwrap() = Some(Arc::new(handler));
        self
    }

    /// Make subsequent connection attempts fail with a lost-connection error.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make pings on open connections fail.
    pub fn fail_ping(&self, fail: bool) {
        self.state.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Connection attempts, refused ones included.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// SQL text of every statement run so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().unwrap().clone()
    }

    /// Boxed for `PoolManager::with_pool` and `GatewayBuilder::with_connector`.
    pub fn shared(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, NativeError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(NativeError::connection_lost("connection refused"));
        }
        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
            in_tx: false,
        }))
    }
}

pub struct FakeConnection {
    state: Arc<FakeState>,
    in_tx: bool,
}

impl FakeConnection {
    fn record(&self, sql: &str) {
        self.state.statements.lock().unwrap().push(sql.to_string());
    }

    fn run(&self, statement: &Statement) -> Result<Vec<Row>, NativeError> {
        self.state.statements.lock().unwrap().push(statement.sql.clone());
        let handler = self.state.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(statement),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl BackendConnection for FakeConnection {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, NativeError> {
        self.run(statement)
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, NativeError> {
        self.run(statement).map(|rows| rows.len() as u64)
    }

    async fn ping(&mut self) -> Result<(), NativeError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(NativeError::connection_lost("ping failed"));
        }
        Ok(())
    }

    /// Transaction control is recorded as `BEGIN`, `COMMIT` and `ROLLBACK`.
    async fn begin(&mut self) -> Result<(), NativeError> {
        self.record("BEGIN");
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        self.record("COMMIT");
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        self.record("ROLLBACK");
        self.in_tx = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn close(self: Box<Self>) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}
