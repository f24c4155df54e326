//! Typed configuration sections.
//!
//! Each section reads its keys with defaults, then runs `garde` constraints.

use std::time::Duration;

use garde::Validate;

use super::{ConfigError, ConfigValidationDetail, GatewayConfig};
use crate::backend::BackendId;

/// Strongly-typed configuration section rooted at a fixed key prefix.
pub trait ConfigProperties: Sized {
    /// The configuration key prefix (e.g. `"retry"`).
    fn prefix() -> &'static str;

    /// Construct and validate from a `GatewayConfig`.
    fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError>;
}

fn check<T: Validate>(prefix: &str, section: &T) -> Result<(), ConfigError>
where
    T::Context: Default,
{
    section.validate().map_err(|report| {
        ConfigError::Validation(
            report
                .iter()
                .map(|(path, error)| ConfigValidationDetail {
                    key: format!("{prefix}.{path}"),
                    message: error.message().to_string(),
                })
                .collect(),
        )
    })
}

// ── Pools ───────────────────────────────────────────────────────────────

/// What a pool does when every connection is leased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Wait up to the acquire timeout, then fail with `PoolTimeout`.
    #[default]
    Wait,
    /// Fail immediately with `PoolExhausted`.
    FailFast,
}

impl std::str::FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(ExhaustionPolicy::Wait),
            "fail_fast" | "failfast" => Ok(ExhaustionPolicy::FailFast),
            other => Err(format!("unknown exhaustion policy '{other}'")),
        }
    }
}

/// `backends.<id>.*`
#[derive(Debug, Clone, Validate)]
pub struct PoolSettings {
    /// Connection URL handed to the connector. Connectors injected
    /// programmatically may ignore it.
    #[garde(length(min = 1))]
    pub url: Option<String>,
    #[garde(range(min = 1, max = 1024))]
    pub max_size: usize,
    #[garde(range(min = 1, max = 600_000))]
    pub acquire_timeout_ms: u64,
    #[garde(skip)]
    pub exhaustion: ExhaustionPolicy,
    #[garde(skip)]
    pub test_on_acquire: bool,
    /// Idle connections older than this are discarded on acquire.
    #[garde(range(min = 1))]
    pub max_idle_secs: Option<u64>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            url: None,
            max_size: 10,
            acquire_timeout_ms: 5_000,
            exhaustion: ExhaustionPolicy::Wait,
            test_on_acquire: false,
            max_idle_secs: Some(300),
        }
    }
}

impl PoolSettings {
    pub fn for_backend(config: &GatewayConfig, backend: BackendId) -> Result<Self, ConfigError> {
        let prefix = format!("backends.{backend}");
        let key = |k: &str| format!("{prefix}.{k}");
        let d = PoolSettings::default();

        let exhaustion = match config.get::<Option<String>>(&key("exhaustion")) {
            Ok(Some(raw)) => raw.parse().map_err(|message| {
                ConfigError::Validation(vec![ConfigValidationDetail {
                    key: key("exhaustion"),
                    message,
                }])
            })?,
            Ok(None) | Err(ConfigError::NotFound(_)) => d.exhaustion,
            Err(e) => return Err(e),
        };

        let settings = PoolSettings {
            url: config.get_or(&key("url"), d.url)?,
            max_size: config.get_or(&key("max_size"), d.max_size)?,
            acquire_timeout_ms: config.get_or(&key("acquire_timeout_ms"), d.acquire_timeout_ms)?,
            exhaustion,
            test_on_acquire: config.get_or(&key("test_on_acquire"), d.test_on_acquire)?,
            max_idle_secs: config.get_or(&key("max_idle_secs"), d.max_idle_secs)?,
        };
        check(&prefix, &settings)?;
        Ok(settings)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle_secs.map(Duration::from_secs)
    }
}

// ── ERP ─────────────────────────────────────────────────────────────────

/// `erp.*`
#[derive(Debug, Clone, Validate)]
pub struct ErpSettings {
    /// Company prefix of the ERP tables (`[dbo].[<company>$Item]`).
    #[garde(length(min = 1, max = 30), alphanumeric)]
    pub company: String,
}

impl Default for ErpSettings {
    fn default() -> Self {
        ErpSettings {
            company: "OTEC".to_string(),
        }
    }
}

impl ConfigProperties for ErpSettings {
    fn prefix() -> &'static str {
        "erp"
    }

    fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let settings = ErpSettings {
            company: config.get_or("erp.company", ErpSettings::default().company)?,
        };
        check(Self::prefix(), &settings)?;
        Ok(settings)
    }
}

// ── Cache ───────────────────────────────────────────────────────────────

/// `cache.*`
#[derive(Debug, Clone, Validate)]
pub struct CacheSettings {
    #[garde(skip)]
    pub enabled: bool,
    /// Period of the expired-entry sweep; 0 disables the sweeper.
    #[garde(range(max = 86_400))]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            sweep_interval_secs: 60,
        }
    }
}

impl ConfigProperties for CacheSettings {
    fn prefix() -> &'static str {
        "cache"
    }

    fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let d = CacheSettings::default();
        let settings = CacheSettings {
            enabled: config.get_or("cache.enabled", d.enabled)?,
            sweep_interval_secs: config.get_or("cache.sweep_interval_secs", d.sweep_interval_secs)?,
        };
        check(Self::prefix(), &settings)?;
        Ok(settings)
    }
}

// ── Retry ───────────────────────────────────────────────────────────────

/// `retry.*`
#[derive(Debug, Clone, Validate)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    #[garde(range(min = 1, max = 10))]
    pub max_attempts: u32,
    #[garde(range(max = 60_000))]
    pub initial_delay_ms: u64,
    #[garde(range(max = 300_000))]
    pub max_delay_ms: u64,
    #[garde(skip)]
    pub factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            factor: 2.0,
        }
    }
}

impl ConfigProperties for RetrySettings {
    fn prefix() -> &'static str {
        "retry"
    }

    fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let d = RetrySettings::default();
        let settings = RetrySettings {
            max_attempts: config.get_or("retry.max_attempts", d.max_attempts)?,
            initial_delay_ms: config.get_or("retry.initial_delay_ms", d.initial_delay_ms)?,
            max_delay_ms: config.get_or("retry.max_delay_ms", d.max_delay_ms)?,
            factor: config.get_or("retry.factor", d.factor)?,
        };
        check(Self::prefix(), &settings)?;

        let mut details = Vec::new();
        if !(1.0..=10.0).contains(&settings.factor) {
            details.push(ConfigValidationDetail {
                key: "retry.factor".into(),
                message: "must be between 1.0 and 10.0".into(),
            });
        }
        if settings.max_delay_ms < settings.initial_delay_ms {
            details.push(ConfigValidationDetail {
                key: "retry.max_delay_ms".into(),
                message: "must not be lower than retry.initial_delay_ms".into(),
            });
        }
        if !details.is_empty() {
            return Err(ConfigError::Validation(details));
        }
        Ok(settings)
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────

/// `orchestrator.*`
#[derive(Debug, Clone, Validate)]
pub struct OrchestratorSettings {
    /// Default bound on a single adapter call.
    #[garde(range(min = 1, max = 3_600_000))]
    pub execution_timeout_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            execution_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

impl ConfigProperties for OrchestratorSettings {
    fn prefix() -> &'static str {
        "orchestrator"
    }

    fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let settings = OrchestratorSettings {
            execution_timeout_ms: config.get_or(
                "orchestrator.execution_timeout_ms",
                OrchestratorSettings::default().execution_timeout_ms,
            )?,
        };
        check(Self::prefix(), &settings)?;
        Ok(settings)
    }
}

// ── Telemetry ───────────────────────────────────────────────────────────

/// `telemetry.*`
#[derive(Debug, Clone, Default)]
pub struct TelemetrySettings {
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl ConfigProperties for TelemetrySettings {
    fn prefix() -> &'static str {
        "telemetry"
    }

    fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Ok(TelemetrySettings {
            json: config.get_or("telemetry.json", false)?,
        })
    }
}
