use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendId;
use crate::envelope::StepOutcome;
use crate::validation::FieldError;

/// Stable, machine-readable error kind carried in every failure envelope.
///
/// Callers branch on this value; the message is for humans only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    PoolExhausted,
    PoolTimeout,
    BackendUnreachable,
    BackendRejected,
    PartialMultiBackendFailure,
    InternalFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::PoolExhausted => "PoolExhausted",
            ErrorKind::PoolTimeout => "PoolTimeout",
            ErrorKind::BackendUnreachable => "BackendUnreachable",
            ErrorKind::BackendRejected => "BackendRejected",
            ErrorKind::PartialMultiBackendFailure => "PartialMultiBackendFailure",
            ErrorKind::InternalFault => "InternalFault",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail of a multi-backend operation that stopped half-way.
///
/// `completed` lists the steps that succeeded (and may have committed) before
/// `failed_backend` failed. Nothing is rolled back.
#[derive(Debug, Clone)]
pub struct PartialFailure {
    pub operation: String,
    pub completed: Vec<StepOutcome>,
    pub failed_backend: BackendId,
    pub cause: Box<GatewayError>,
}

/// The gateway's error taxonomy.
///
/// Adapters normalise every backend-native failure into one of these variants
/// before it crosses their boundary.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Bad input. Never retried, never reaches a backend.
    Validation(Vec<FieldError>),
    /// The backend's pool had no free slot and the pool fails fast.
    PoolExhausted { backend: BackendId },
    /// No slot became free within the acquire timeout.
    PoolTimeout { backend: BackendId, waited: Duration },
    /// Connectivity loss, connect failure or execution timeout.
    BackendUnreachable { backend: BackendId, message: String },
    /// Constraint violation or business-rule failure reported by the backend.
    BackendRejected {
        backend: BackendId,
        code: Option<String>,
        message: String,
    },
    /// An earlier step of a multi-backend operation succeeded, a later one failed.
    PartialMultiBackendFailure(PartialFailure),
    /// A programming invariant was violated (e.g. releasing a lease that is not outstanding).
    InternalFault(String),
}

impl GatewayError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>, code: &str) -> Self {
        GatewayError::Validation(vec![FieldError::new(field, message, code)])
    }

    pub fn rejected(backend: BackendId, code: &str, message: impl Into<String>) -> Self {
        GatewayError::BackendRejected {
            backend,
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    pub fn unreachable(backend: BackendId, message: impl Into<String>) -> Self {
        GatewayError::BackendUnreachable {
            backend,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::InternalFault(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) => ErrorKind::ValidationError,
            GatewayError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            GatewayError::PoolTimeout { .. } => ErrorKind::PoolTimeout,
            GatewayError::BackendUnreachable { .. } => ErrorKind::BackendUnreachable,
            GatewayError::BackendRejected { .. } => ErrorKind::BackendRejected,
            GatewayError::PartialMultiBackendFailure(_) => ErrorKind::PartialMultiBackendFailure,
            GatewayError::InternalFault(_) => ErrorKind::InternalFault,
        }
    }

    /// Whether the orchestrator may transparently retry an idempotent operation.
    ///
    /// Pool contention is left to the caller's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::BackendUnreachable { .. })
    }

    /// Whether the connection that produced this error must be evicted.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, GatewayError::BackendUnreachable { .. })
    }

    /// The backend the error originated from, when there is exactly one.
    pub fn backend(&self) -> Option<BackendId> {
        match self {
            GatewayError::PoolExhausted { backend }
            | GatewayError::PoolTimeout { backend, .. }
            | GatewayError::BackendUnreachable { backend, .. }
            | GatewayError::BackendRejected { backend, .. } => Some(*backend),
            GatewayError::PartialMultiBackendFailure(p) => Some(p.failed_backend),
            GatewayError::Validation(_) | GatewayError::InternalFault(_) => None,
        }
    }

    /// Structured detail for the envelope's `error.details` field.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::Validation(errors) => serde_json::to_value(errors).ok(),
            GatewayError::BackendRejected { code: Some(code), .. } => {
                Some(serde_json::json!({ "code": code }))
            }
            GatewayError::PartialMultiBackendFailure(p) => Some(serde_json::json!({
                "completed": p.completed,
                "failedBackend": p.failed_backend,
                "cause": { "kind": p.cause.kind(), "message": p.cause.to_string() },
            })),
            _ => None,
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Validation(errors) => {
                write!(f, "Validation failed")?;
                for (i, e) in errors.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{}: {}", e.field, e.message)?;
                }
                Ok(())
            }
            GatewayError::PoolExhausted { backend } => {
                write!(f, "Connection pool for '{backend}' is exhausted")
            }
            GatewayError::PoolTimeout { backend, waited } => write!(
                f,
                "Timed out after {}ms waiting for a '{backend}' connection",
                waited.as_millis()
            ),
            GatewayError::BackendUnreachable { backend, message } => {
                write!(f, "Backend '{backend}' unreachable: {message}")
            }
            GatewayError::BackendRejected { backend, code, message } => match code {
                Some(code) => write!(f, "Backend '{backend}' rejected the request ({code}): {message}"),
                None => write!(f, "Backend '{backend}' rejected the request: {message}"),
            },
            GatewayError::PartialMultiBackendFailure(p) => {
                let done: Vec<&str> = p.completed.iter().map(|s| s.backend.as_str()).collect();
                write!(
                    f,
                    "Operation '{}' partially applied: [{}] succeeded, '{}' failed: {}",
                    p.operation,
                    done.join(", "),
                    p.failed_backend,
                    p.cause
                )
            }
            GatewayError::InternalFault(msg) => write!(f, "Internal fault: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::PartialMultiBackendFailure(p) => Some(p.cause.as_ref()),
            _ => None,
        }
    }
}

/// Convenience alias used across the workspace.
pub type GatewayResult<T> = Result<T, GatewayError>;
