//! Health checks with liveness/readiness semantics.
//!
//! | Probe       | Meaning                                               |
//! |-------------|-------------------------------------------------------|
//! | `health`    | Every indicator, UP only if all are UP                |
//! | `liveness`  | The process is running; no indicator is consulted     |
//! | `readiness` | Indicators that affect readiness, UP only if all are  |

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde::Serialize;

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down(String),
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// A named health check, e.g. one per backend pool.
pub trait HealthIndicator: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>>;

    /// Whether this check affects the readiness probe (default: `true`).
    fn affects_readiness(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckStatus {
    Up,
    Down,
}

/// A single check result in the health response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthCheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Aggregated health response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthCheckStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<HealthCheck>,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn is_up(&self) -> bool {
        self.status == HealthCheckStatus::Up
    }

    /// Liveness answer: UP while the process can answer at all.
    pub fn alive(started: Instant) -> Self {
        HealthResponse {
            status: HealthCheckStatus::Up,
            checks: Vec::new(),
            uptime_seconds: started.elapsed().as_secs(),
        }
    }
}

/// Run indicators in order and aggregate their results.
pub async fn aggregate(
    indicators: &[Box<dyn HealthIndicator>],
    readiness_only: bool,
    started: Instant,
) -> HealthResponse {
    let mut checks = Vec::with_capacity(indicators.len());
    let mut all_up = true;

    for indicator in indicators {
        if readiness_only && !indicator.affects_readiness() {
            continue;
        }
        let start = Instant::now();
        let status = indicator.check().await;
        let (status, reason) = match status {
            HealthStatus::Up => (HealthCheckStatus::Up, None),
            HealthStatus::Down(reason) => {
                all_up = false;
                (HealthCheckStatus::Down, Some(reason))
            }
        };
        checks.push(HealthCheck {
            name: indicator.name().to_string(),
            status,
            reason,
            duration_ms: start.elapsed().as_millis() as u64,
            details: None,
        });
    }

    HealthResponse {
        status: if all_up {
            HealthCheckStatus::Up
        } else {
            HealthCheckStatus::Down
        },
        checks,
        uptime_seconds: started.elapsed().as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        status: HealthStatus,
        readiness: bool,
    }

    impl HealthIndicator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>> {
            let status = self.status.clone();
            Box::pin(async move { status })
        }

        fn affects_readiness(&self) -> bool {
            self.readiness
        }
    }

    fn indicators() -> Vec<Box<dyn HealthIndicator>> {
        vec![
            Box::new(Fixed { name: "general", status: HealthStatus::Up, readiness: true }),
            Box::new(Fixed {
                name: "erp",
                status: HealthStatus::Down("connection refused".into()),
                readiness: false,
            }),
        ]
    }

    #[tokio::test]
    async fn any_down_indicator_fails_health() {
        let response = aggregate(&indicators(), false, Instant::now()).await;
        assert!(!response.is_up());
        assert_eq!(response.checks.len(), 2);
        assert_eq!(response.checks[1].reason.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn readiness_skips_non_readiness_indicators() {
        let response = aggregate(&indicators(), true, Instant::now()).await;
        assert!(response.is_up());
        assert_eq!(response.checks.len(), 1);
    }
}
