//! Command implementations for the `kanban` CLI.

use std::error::Error;
use std::path::PathBuf;

use colored::Colorize;
use kanban_core::config::{DefaultSecretResolver, TelemetrySettings};
use kanban_core::{telemetry, GatewayConfig, ResultEnvelope};
use kanban_gateway::Gateway;

/// Backend health, `kanban health`.
pub mod health;

/// One-off invocation, `kanban invoke <op>`.
pub mod invoke;

/// Prometheus snapshot, `kanban metrics`.
pub mod metrics;

/// Registry export, `kanban operations`.
pub mod operations;

/// ERP article import, `kanban sync-articles`.
pub mod sync;

pub type CliResult = Result<(), Box<dyn Error>>;

/// Where configuration comes from.
#[derive(Debug, Clone)]
pub struct Context {
    pub config_dir: PathBuf,
    pub profile: String,
}

impl Context {
    pub fn new(config_dir: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Context {
            config_dir: config_dir.into(),
            profile: profile.into(),
        }
    }

    pub fn config(&self) -> Result<GatewayConfig, Box<dyn Error>> {
        tracing::debug!(dir = %self.config_dir.display(), profile = %self.profile, "Loading configuration");
        Ok(GatewayConfig::load_from(
            &self.config_dir,
            &self.profile,
            &DefaultSecretResolver,
        )?)
    }

    /// A gateway over the SQLite backends named in the configuration.
    pub fn gateway(&self) -> Result<Gateway, Box<dyn Error>> {
        let gateway = Gateway::builder(self.config()?)
            .with_sqlite_connectors()?
            .with_default_adapters()?
            .build()?;
        Ok(gateway)
    }
}

/// Install the tracing subscriber; an unreadable config falls back to defaults.
pub fn init_logging(ctx: &Context) {
    let settings = ctx
        .config()
        .ok()
        .and_then(|config| config.section::<TelemetrySettings>().ok())
        .unwrap_or_default();
    telemetry::init_tracing(&settings);
}

/// Print an envelope as pretty JSON followed by a one-line verdict.
pub(crate) fn print_envelope(envelope: &ResultEnvelope) -> CliResult {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    let meta = &envelope.meta;
    let timing = format!(
        "{}ms, {} attempt(s){}",
        meta.latency_ms,
        meta.attempts,
        if meta.cache_hit { ", cached" } else { "" }
    );
    match envelope.error_kind() {
        None => eprintln!("{} ({})", "OK".green().bold(), timing.dimmed()),
        Some(kind) => eprintln!("{} ({})", kind.as_str().red().bold(), timing.dimmed()),
    }
    Ok(())
}
