use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kanban_core::{BackendId, ErrorKind};
use kanban_pool::{
    BackendConnection, Connector, NativeError, PoolConfig, PoolManager, Row, Statement,
    Transaction,
};

#[derive(Default)]
struct Script {
    connects: AtomicUsize,
    pings: AtomicUsize,
    refuse_connect: AtomicBool,
    ping_fails: AtomicBool,
    ping_delay_ms: AtomicU64,
    connect_delay_ms: AtomicU64,
}

impl Script {
    fn delay(ms: &AtomicU64) -> Option<Duration> {
        match ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
    in_tx: bool,
}

#[async_trait]
impl BackendConnection for ScriptedConnection {
    async fn query(&mut self, _statement: &Statement) -> Result<Vec<Row>, NativeError> {
        Ok(Vec::new())
    }

    async fn execute(&mut self, _statement: &Statement) -> Result<u64, NativeError> {
        Ok(0)
    }

    async fn ping(&mut self) -> Result<(), NativeError> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = Script::delay(&self.script.ping_delay_ms) {
            tokio::time::sleep(delay).await;
        }
        if self.script.ping_fails.load(Ordering::SeqCst) {
            Err(NativeError::connection_lost("socket closed"))
        } else {
            Ok(())
        }
    }

    async fn begin(&mut self) -> Result<(), NativeError> {
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        self.in_tx = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }
}

struct ScriptedConnector(Arc<Script>);

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, NativeError> {
        if let Some(delay) = Script::delay(&self.0.connect_delay_ms) {
            tokio::time::sleep(delay).await;
        }
        if self.0.refuse_connect.load(Ordering::SeqCst) {
            return Err(NativeError::connection_lost("connection refused"));
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: self.0.clone(),
            in_tx: false,
        }))
    }
}

fn manager(config: PoolConfig) -> (PoolManager, Arc<Script>) {
    let script = Arc::new(Script::default());
    let manager = PoolManager::new()
        .with_pool(BackendId::General, Arc::new(ScriptedConnector(script.clone())), config.clone())
        .with_pool(BackendId::Erp, Arc::new(ScriptedConnector(script.clone())), config);
    (manager, script)
}

fn small() -> PoolConfig {
    PoolConfig::default()
        .max_size(1)
        .acquire_timeout(Duration::from_millis(50))
}

#[tokio::test]
async fn connections_are_created_lazily_and_reused() {
    let (pools, script) = manager(PoolConfig::default().max_size(2));
    assert_eq!(script.connects.load(Ordering::SeqCst), 0);

    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();

    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    let stats = pools.stats(BackendId::General).unwrap();
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.released, 2);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn second_acquire_waits_for_release() {
    let (pools, _) = manager(PoolConfig::default().max_size(1).acquire_timeout(Duration::from_secs(2)));
    let pools = Arc::new(pools);
    let first = pools.acquire(BackendId::General, None).await.unwrap();

    let waiter = {
        let pools = pools.clone();
        tokio::spawn(async move { pools.acquire(BackendId::General, None).await.map(|l| l.id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    assert_eq!(pools.stats(BackendId::General).unwrap().in_use, 1);

    pools.release(first).unwrap();
    let second = waiter.await.unwrap();
    assert!(second.is_ok());
}

#[tokio::test]
async fn second_acquire_times_out() {
    let (pools, _) = manager(small());
    let _held = pools.acquire(BackendId::General, None).await.unwrap();

    let err = pools.acquire(BackendId::General, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolTimeout);
    assert_eq!(err.backend(), Some(BackendId::General));
}

#[tokio::test]
async fn hanging_liveness_check_is_bounded_by_the_acquire_timeout() {
    let (pools, script) = manager(
        PoolConfig::default()
            .max_size(1)
            .acquire_timeout(Duration::from_millis(100))
            .test_on_acquire(true),
    );
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();

    script.ping_delay_ms.store(3_000, Ordering::SeqCst);
    let started = Instant::now();
    let err = pools.acquire(BackendId::General, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolTimeout);
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());

    // The slot is free again and the hung connection is gone.
    script.ping_delay_ms.store(0, Ordering::SeqCst);
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
    assert_eq!(pools.stats(BackendId::General).unwrap().in_use, 0);
}

#[tokio::test]
async fn slow_connect_honours_the_callers_timeout() {
    let (pools, script) = manager(PoolConfig::default().max_size(1).acquire_timeout(Duration::from_secs(2)));
    script.connect_delay_ms.store(10_000, Ordering::SeqCst);

    let started = Instant::now();
    let err = pools
        .acquire(BackendId::General, Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolTimeout);
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());

    let stats = pools.stats(BackendId::General).unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(stats.acquired, 0);
}

#[tokio::test]
async fn permit_wait_and_connect_share_one_deadline() {
    let (pools, script) = manager(PoolConfig::default().max_size(1).acquire_timeout(Duration::from_millis(300)));
    let pools = Arc::new(pools);
    let mut held = pools.acquire(BackendId::General, None).await.unwrap();
    held.mark_broken();

    script.connect_delay_ms.store(250, Ordering::SeqCst);
    let waiter = {
        let pools = pools.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = pools.acquire(BackendId::General, None).await.map(|_| ());
            (outcome, started.elapsed())
        })
    };
    // Half the budget goes on waiting for the slot; the connect needs more than what is left.
    tokio::time::sleep(Duration::from_millis(150)).await;
    pools.release(held).unwrap();

    let (outcome, elapsed) = waiter.await.unwrap();
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::PoolTimeout);
    assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
}

#[tokio::test]
async fn fail_fast_pool_reports_exhaustion() {
    let (pools, _) = manager(small().fail_fast());
    let _held = pools.acquire(BackendId::General, None).await.unwrap();

    let err = pools.acquire(BackendId::General, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
}

#[tokio::test]
async fn exhausting_one_pool_leaves_others_alone() {
    let (pools, _) = manager(small().fail_fast());
    let _held = pools.acquire(BackendId::General, None).await.unwrap();

    let erp = pools.acquire(BackendId::Erp, None).await.unwrap();
    pools.release(erp).unwrap();
}

#[tokio::test]
async fn connect_failure_is_unreachable_and_frees_the_slot() {
    let (pools, script) = manager(small());
    script.refuse_connect.store(true, Ordering::SeqCst);

    let err = pools.acquire(BackendId::General, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
    assert!(err.is_transient());

    script.refuse_connect.store(false, Ordering::SeqCst);
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();
}

#[tokio::test]
async fn broken_lease_is_evicted_and_replaced_lazily() {
    let (pools, script) = manager(small());
    let mut lease = pools.acquire(BackendId::General, None).await.unwrap();
    lease.mark_broken();
    pools.release(lease).unwrap();

    let stats = pools.stats(BackendId::General).unwrap();
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(script.connects.load(Ordering::SeqCst), 1);

    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dead_idle_connection_is_detected_on_acquire() {
    let (pools, script) = manager(small().test_on_acquire(true));
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();

    script.ping_fails.store(true, Ordering::SeqCst);
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();

    assert_eq!(script.pings.load(Ordering::SeqCst), 1);
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
    assert_eq!(pools.stats(BackendId::General).unwrap().evicted, 1);
}

#[tokio::test]
async fn stale_idle_connection_is_discarded() {
    let (pools, script) = manager(small().max_idle(Some(Duration::from_millis(10))));
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();

    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connection_left_in_a_transaction_is_not_reused() {
    let (pools, script) = manager(small());
    let mut lease = pools.acquire(BackendId::General, None).await.unwrap();
    let tx = Transaction::begin(lease.connection().unwrap()).await.unwrap();
    drop(tx);
    pools.release(lease).unwrap();

    let stats = pools.stats(BackendId::General).unwrap();
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.idle, 0);

    let mut lease = pools.acquire(BackendId::General, None).await.unwrap();
    let tx = Transaction::begin(lease.connection().unwrap()).await.unwrap();
    tx.commit().await.unwrap();
    pools.release(lease).unwrap();
    assert_eq!(pools.stats(BackendId::General).unwrap().idle, 1);
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dropped_lease_is_reclaimed() {
    let (pools, _) = manager(small());
    {
        let _lease = pools.acquire(BackendId::General, None).await.unwrap();
    }
    let stats = pools.stats(BackendId::General).unwrap();
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.idle, 1);

    let lease = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(lease).unwrap();
}

#[tokio::test]
async fn cancelled_acquire_holder_returns_its_slot() {
    let (pools, _) = manager(PoolConfig::default().max_size(1).acquire_timeout(Duration::from_secs(1)));
    let pools = Arc::new(pools);

    let task = {
        let pools = pools.clone();
        tokio::spawn(async move {
            let _lease = pools.acquire(BackendId::General, None).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();
    let _ = task.await;

    let lease = pools.acquire(BackendId::General, Some(Duration::from_millis(200))).await.unwrap();
    pools.release(lease).unwrap();
}

#[tokio::test]
async fn foreign_lease_release_is_an_internal_fault() {
    let (ours, _) = manager(small());
    let (theirs, _) = manager(small());

    let lease = theirs.acquire(BackendId::General, None).await.unwrap();
    let err = ours.release(lease).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalFault);

    let stats = theirs.stats(BackendId::General).unwrap();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn unknown_backend_is_an_internal_fault() {
    let (pools, _) = manager(small());
    let err = pools.acquire(BackendId::Secondary, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalFault);
}

#[tokio::test]
async fn ping_reports_backend_health() {
    let (pools, script) = manager(small());
    pools.ping(BackendId::General, Duration::from_millis(100)).await.unwrap();

    script.ping_fails.store(true, Ordering::SeqCst);
    let err = pools.ping(BackendId::General, Duration::from_millis(100)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
    assert_eq!(pools.stats(BackendId::General).unwrap().evicted, 1);
}

#[tokio::test]
async fn shutdown_refuses_new_leases_and_closes_returned_ones() {
    let (pools, _) = manager(PoolConfig::default().max_size(2));
    let idle = pools.acquire(BackendId::General, None).await.unwrap();
    let held = pools.acquire(BackendId::General, None).await.unwrap();
    pools.release(idle).unwrap();

    pools.shutdown().await;
    assert_eq!(pools.stats(BackendId::General).unwrap().idle, 0);

    let err = pools.acquire(BackendId::General, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnreachable);

    pools.release(held).unwrap();
    assert_eq!(pools.stats(BackendId::General).unwrap().idle, 0);
}
