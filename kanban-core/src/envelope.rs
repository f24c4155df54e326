//! The uniform response shape returned for every invocation.
//!
//! ```text
//! { status: success|failure,
//!   data: payload|null,
//!   error: {kind, message, details?}|null,
//!   meta: {sourceBackend, cacheHit, latencyMs, attempts, steps} }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendId;
use crate::error::{ErrorKind, GatewayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Outcome of one backend step of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub backend: BackendId,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StepOutcome {
    pub fn succeeded(backend: BackendId, rows_affected: u64) -> Self {
        StepOutcome {
            backend,
            status: StepStatus::Succeeded,
            rows_affected: Some(rows_affected),
            error_kind: None,
        }
    }

    pub fn failed(backend: BackendId, kind: ErrorKind) -> Self {
        StepOutcome {
            backend,
            status: StepStatus::Failed,
            rows_affected: None,
            error_kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Backend that produced the data. For cache hits, the backend that
    /// originally served the cached value.
    pub source_backend: Option<BackendId>,
    pub cache_hit: bool,
    pub latency_ms: u64,
    /// Number of execution attempts (0 when nothing was executed).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: Status,
    pub data: Option<Value>,
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

impl ResultEnvelope {
    pub fn success(data: Value, meta: Meta) -> Self {
        ResultEnvelope {
            status: Status::Success,
            data: Some(data),
            error: None,
            meta,
        }
    }

    pub fn failure(err: &GatewayError, meta: Meta) -> Self {
        ResultEnvelope {
            status: Status::Failure,
            data: None,
            error: Some(ErrorBody::from(err)),
            meta,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
