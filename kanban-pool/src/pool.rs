use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use kanban_core::config::{ExhaustionPolicy, PoolSettings};
use kanban_core::{BackendId, GatewayError, GatewayResult};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::connection::{BackendConnection, Connector};

/// Sizing and liveness policy of one backend pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub exhaustion: ExhaustionPolicy,
    /// Ping idle connections before handing them out.
    pub test_on_acquire: bool,
    /// Idle connections older than this are discarded instead of reused.
    pub max_idle: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        PoolConfig {
            max_size: settings.max_size,
            acquire_timeout: settings.acquire_timeout(),
            exhaustion: settings.exhaustion,
            test_on_acquire: settings.test_on_acquire,
            max_idle: settings.max_idle(),
        }
    }
}

impl PoolConfig {
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.exhaustion = ExhaustionPolicy::FailFast;
        self
    }

    pub fn test_on_acquire(mut self, enabled: bool) -> Self {
        self.test_on_acquire = enabled;
        self
    }

    pub fn max_idle(mut self, max_idle: Option<Duration>) -> Self {
        self.max_idle = max_idle;
        self
    }
}

/// Point-in-time counters of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub backend: BackendId,
    pub max_size: usize,
    pub in_use: usize,
    pub idle: usize,
    pub acquired: u64,
    pub released: u64,
    pub created: u64,
    pub evicted: u64,
}

struct IdleConnection {
    conn: Box<dyn BackendConnection>,
    since: Instant,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    created: AtomicU64,
    evicted: AtomicU64,
}

/// State shared between a pool and its outstanding leases.
pub(crate) struct PoolShared {
    backend: BackendId,
    idle: Mutex<VecDeque<IdleConnection>>,
    outstanding: Mutex<HashSet<u64>>,
    next_lease: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PoolShared {
    fn evict(&self, conn: Box<dyn BackendConnection>, reason: &str) {
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = %self.backend, reason, "Evicting connection");
        discard(conn);
    }
}

/// Close a connection off the caller's path.
///
/// Called from `Drop` and from release, neither of which may await.
fn discard(conn: Box<dyn BackendConnection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(conn.close());
        }
        Err(_) => drop(conn),
    }
}

/// A bounded pool of connections to a single backend.
pub struct Pool {
    shared: Arc<PoolShared>,
    semaphore: Arc<Semaphore>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
}

impl Pool {
    pub fn new(backend: BackendId, connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Pool {
            shared: Arc::new(PoolShared {
                backend,
                idle: Mutex::new(VecDeque::with_capacity(config.max_size)),
                outstanding: Mutex::new(HashSet::new()),
                next_lease: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            connector,
            config,
        }
    }

    pub fn backend(&self) -> BackendId {
        self.shared.backend
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Lease a connection, waiting at most `timeout` (or the configured
    /// acquire timeout) for a free slot and a usable connection.
    ///
    /// The limit covers the whole acquisition: waiting for a permit, liveness
    /// checks of idle connections and opening a new one. Running out of time
    /// at any point fails with `PoolTimeout`.
    pub async fn acquire(&self, timeout: Option<Duration>) -> GatewayResult<Lease> {
        let backend = self.backend();
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(GatewayError::unreachable(backend, "connection pool is shut down"));
        }

        let wait = timeout.unwrap_or(self.config.acquire_timeout);
        let deadline = tokio::time::Instant::now() + wait;
        let permit = self.permit(deadline, wait).await?;
        let conn = match tokio::time::timeout_at(deadline, self.checkout()).await {
            Ok(conn) => conn?,
            Err(_) => {
                tracing::debug!(backend = %backend, "Acquire deadline passed during checkout");
                return Err(GatewayError::PoolTimeout { backend, waited: wait });
            }
        };

        let id = self.shared.next_lease.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.outstanding).insert(id);
        self.shared.counters.acquired.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = %backend, lease = id, "Connection leased");

        Ok(Lease {
            id,
            backend,
            conn: Some(conn),
            broken: false,
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    async fn permit(
        &self,
        deadline: tokio::time::Instant,
        wait: Duration,
    ) -> GatewayResult<OwnedSemaphorePermit> {
        let backend = self.backend();
        match self.config.exhaustion {
            ExhaustionPolicy::FailFast => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(GatewayError::PoolExhausted { backend }),
                Err(TryAcquireError::Closed) => Err(GatewayError::unreachable(
                    backend,
                    "connection pool is shut down",
                )),
            },
            ExhaustionPolicy::Wait => {
                match tokio::time::timeout_at(deadline, self.semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(GatewayError::unreachable(
                        backend,
                        "connection pool is shut down",
                    )),
                    Err(_) => Err(GatewayError::PoolTimeout {
                        backend,
                        waited: wait,
                    }),
                }
            }
        }
    }

    /// Reuse a healthy idle connection or open a new one.
    ///
    /// Bounded by the caller's deadline; a connection popped from the idle
    /// queue is dropped if the deadline cuts its liveness check short.
    async fn checkout(&self) -> GatewayResult<Box<dyn BackendConnection>> {
        loop {
            let candidate = lock(&self.shared.idle).pop_front();
            let Some(IdleConnection { mut conn, since }) = candidate else {
                return self.connect().await;
            };
            if self.config.max_idle.is_some_and(|max| since.elapsed() > max) {
                self.shared.evict(conn, "idle too long");
                continue;
            }
            if self.config.test_on_acquire {
                if let Err(e) = conn.ping().await {
                    tracing::debug!(backend = %self.backend(), error = %e, "Liveness check failed");
                    self.shared.evict(conn, "liveness check failed");
                    continue;
                }
            }
            return Ok(conn);
        }
    }

    async fn connect(&self) -> GatewayResult<Box<dyn BackendConnection>> {
        let backend = self.backend();
        match self.connector.connect().await {
            Ok(conn) => {
                self.shared.counters.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(backend = %backend, "Opened connection");
                Ok(conn)
            }
            Err(e) => Err(GatewayError::unreachable(backend, format!("connect failed: {e}"))),
        }
    }

    pub(crate) fn owns(&self, lease: &Lease) -> bool {
        Arc::ptr_eq(&self.shared, &lease.shared)
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            backend: self.backend(),
            max_size: self.config.max_size,
            in_use: lock(&self.shared.outstanding).len(),
            idle: lock(&self.shared.idle).len(),
            acquired: c.acquired.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            created: c.created.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
        }
    }

    /// Refuse new leases and close idle connections.
    ///
    /// Leases still outstanding close their connection when returned.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.semaphore.close();
        let drained: Vec<_> = lock(&self.shared.idle).drain(..).collect();
        let count = drained.len();
        for idle in drained {
            idle.conn.close().await;
        }
        tracing::debug!(backend = %self.backend(), closed = count, "Pool shut down");
    }
}

/// Exclusive use of one pooled connection.
///
/// Return it with [`PoolManager::release`](crate::PoolManager::release). A
/// lease dropped without release (cancelled invocation) is reclaimed by its
/// `Drop` impl.
pub struct Lease {
    id: u64,
    backend: BackendId,
    conn: Option<Box<dyn BackendConnection>>,
    broken: bool,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn connection(&mut self) -> GatewayResult<&mut dyn BackendConnection> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(GatewayError::internal(format!(
                "lease {} on '{}' has no connection",
                self.id, self.backend
            ))),
        }
    }

    /// Flag the connection as unusable; it is evicted when the lease is returned.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Return the connection to its pool. The permit goes back when the
    /// lease itself is dropped, after the connection is idle again.
    pub(crate) fn reclaim(&mut self) -> GatewayResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let shared = &self.shared;
        if !lock(&shared.outstanding).remove(&self.id) {
            discard(conn);
            return Err(GatewayError::internal(format!(
                "lease {} on '{}' is not outstanding",
                self.id, self.backend
            )));
        }
        shared.counters.released.fetch_add(1, Ordering::Relaxed);

        if self.broken {
            shared.evict(conn, "marked broken");
        } else if conn.in_transaction() {
            shared.evict(conn, "returned inside a transaction");
        } else {
            // Checked under the idle lock so a concurrent shutdown cannot miss it.
            let mut idle = lock(&shared.idle);
            if shared.closed.load(Ordering::Acquire) {
                drop(idle);
                discard(conn);
            } else {
                idle.push_back(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
            }
        }
        tracing::debug!(backend = %self.backend, lease = self.id, "Connection released");
        Ok(())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!(backend = %self.backend, lease = self.id, "Reclaiming dropped lease");
            if let Err(e) = self.reclaim() {
                tracing::error!(error = %e, "Failed to reclaim dropped lease");
            }
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("broken", &self.broken)
            .finish()
    }
}
