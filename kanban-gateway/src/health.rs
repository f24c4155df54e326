use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use kanban_core::health::{HealthIndicator, HealthStatus};
use kanban_core::BackendId;
use kanban_pool::PoolManager;

/// Health of one backend, checked by pinging a pooled connection.
pub struct PoolHealth {
    backend: BackendId,
    pools: Arc<PoolManager>,
    timeout: Duration,
}

impl PoolHealth {
    pub fn new(backend: BackendId, pools: Arc<PoolManager>, timeout: Duration) -> Self {
        PoolHealth {
            backend,
            pools,
            timeout,
        }
    }
}

impl HealthIndicator for PoolHealth {
    fn name(&self) -> &str {
        self.backend.as_str()
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>> {
        Box::pin(async move {
            match self.pools.ping(self.backend, self.timeout).await {
                Ok(()) => HealthStatus::Up,
                Err(err) => HealthStatus::Down(err.to_string()),
            }
        })
    }
}
