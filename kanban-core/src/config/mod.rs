mod loader;
pub mod secrets;
pub mod sections;
pub mod value;

use std::collections::HashMap;
use std::path::Path;

pub use secrets::{DefaultSecretResolver, SecretResolver};
pub use sections::{
    CacheSettings, ConfigProperties, ErpSettings, ExhaustionPolicy, OrchestratorSettings,
    PoolSettings, RetrySettings, TelemetrySettings,
};
pub use value::{ConfigValue, FromConfigValue};

/// Environment variable selecting the active profile.
pub const PROFILE_ENV: &str = "KANBAN_PROFILE";

/// Prefix of environment variables overlaid onto the configuration.
pub const ENV_PREFIX: &str = "KANBAN_";

/// A single validation error detail from a typed section (garde or range checks).
#[derive(Debug, Clone)]
pub struct ConfigValidationDetail {
    pub key: String,
    pub message: String,
}

/// Error type for configuration and startup checks.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested key was not found in the configuration.
    NotFound(String),
    /// The value could not be converted to the requested type.
    TypeMismatch { key: String, expected: &'static str },
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
    /// Constraint violations in a typed section.
    Validation(Vec<ConfigValidationDetail>),
    /// Operation descriptors or adapter bindings that cannot be served.
    Registry(Vec<String>),
    /// A metric could not be created or registered.
    Metrics(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Config key not found: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "Config type mismatch for '{key}': expected {expected}")
            }
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
            ConfigError::Validation(details) => {
                write!(f, "Config validation errors:")?;
                for detail in details {
                    write!(f, "\n  - {}: {}", detail.key, detail.message)?;
                }
                Ok(())
            }
            ConfigError::Registry(problems) => {
                write!(f, "Invalid operation registry:")?;
                for problem in problems {
                    write!(f, "\n  - {problem}")?;
                }
                Ok(())
            }
            ConfigError::Metrics(msg) => write!(f, "Metrics setup error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Gateway configuration loaded from YAML files, `.env` files and environment variables.
///
/// Resolution order (lowest to highest priority):
/// 1. `gateway.yaml` (base)
/// 2. `gateway-{profile}.yaml` (profile override)
/// 3. `.env` and `.env.{profile}` (loaded into the process environment)
/// 4. `KANBAN_`-prefixed environment variables, `__` separating path segments
///    (`KANBAN_BACKENDS__ERP__URL` overrides `backends.erp.url`)
///
/// `${VAR}`, `${env:VAR}` and `${file:/path}` placeholders in string values
/// are resolved after the files are read. `.env` files never overwrite
/// already-set environment variables.
///
/// Profile is determined by: `KANBAN_PROFILE` > argument > `"dev"`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    values: HashMap<String, ConfigValue>,
    profile: String,
}

impl GatewayConfig {
    /// Load configuration from the current working directory.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), profile, &DefaultSecretResolver)
    }

    /// Load configuration files from `dir` with a custom secret resolver.
    pub fn load_from(
        dir: &Path,
        profile: &str,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, ConfigError> {
        let active_profile = std::env::var(PROFILE_ENV).unwrap_or_else(|_| profile.to_string());

        let mut values = HashMap::new();
        loader::load_yaml_file(&dir.join("gateway.yaml"), &mut values)?;
        loader::load_yaml_file(&dir.join(format!("gateway-{active_profile}.yaml")), &mut values)?;

        let _ = dotenvy::from_path(dir.join(".env"));
        let _ = dotenvy::from_path(dir.join(format!(".env.{active_profile}")));

        resolve_string_values(&mut values, resolver)?;

        for (env_key, env_val) in std::env::vars() {
            if env_key == PROFILE_ENV {
                continue;
            }
            if let Some(config_key) = loader::env_to_key(ENV_PREFIX, &env_key) {
                values.insert(config_key, ConfigValue::String(env_val));
            }
        }

        tracing::debug!(profile = %active_profile, keys = values.len(), "Configuration loaded");
        Ok(GatewayConfig {
            values,
            profile: active_profile,
        })
    }

    /// Create a config from a YAML string (no files, no environment).
    pub fn from_yaml_str(yaml: &str, profile: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        loader::load_yaml_str(yaml, &mut values)?;
        Ok(GatewayConfig {
            values,
            profile: profile.to_string(),
        })
    }

    /// An empty config; every typed section falls back to its defaults.
    pub fn empty() -> Self {
        GatewayConfig {
            values: HashMap::new(),
            profile: "test".to_string(),
        }
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    /// Get a typed value for the given dot-separated key.
    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V, ConfigError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        V::from_config_value(value, key)
    }

    /// Get a typed value, or `default` when the key is absent.
    ///
    /// Unlike a plain `get().unwrap_or()`, a present but malformed value is
    /// still reported.
    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> Result<V, ConfigError> {
        match self.get(key) {
            Err(ConfigError::NotFound(_)) => Ok(default),
            other => other,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Build and validate a typed section.
    pub fn section<C: ConfigProperties>(&self) -> Result<C, ConfigError> {
        C::from_config(self)
    }
}

fn resolve_string_values(
    values: &mut HashMap<String, ConfigValue>,
    resolver: &dyn SecretResolver,
) -> Result<(), ConfigError> {
    for value in values.values_mut() {
        if let ConfigValue::String(s) = value {
            if s.contains("${") {
                *s = secrets::resolve_placeholders(s, resolver)?;
            }
        }
    }
    Ok(())
}
