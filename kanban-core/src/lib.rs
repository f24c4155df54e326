//! Shared building blocks of the kanban data gateway.
//!
//! Everything that crosses crate boundaries lives here: backend identities,
//! the error taxonomy, the result envelope, operation descriptors, parameter
//! validation, configuration and health reporting.

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod health;
pub mod telemetry;
pub mod validation;

pub use backend::BackendId;
pub use config::{ConfigError, GatewayConfig};
pub use descriptor::{CachePolicy, OperationDescriptor, Registry};
pub use envelope::{ErrorBody, Meta, ResultEnvelope, Status, StepOutcome, StepStatus};
pub use error::{ErrorKind, GatewayError, GatewayResult, PartialFailure};
pub use validation::{FieldError, FieldSpec, FieldType, ParamSchema, TypedParams};

/// Identity of the caller as established by the surrounding web layer.
///
/// Authentication happens before the gateway is reached; the subject is
/// recorded on the invocation span and handed to adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn new(subject: impl Into<String>) -> Self {
        AuthContext {
            subject: subject.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// The context used by operator tooling (CLI, scheduled sync).
    pub fn system() -> Self {
        AuthContext::new("system").with_roles(&["admin"])
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

pub mod prelude {
    pub use crate::backend::BackendId;
    pub use crate::descriptor::{CachePolicy, OperationDescriptor, Registry};
    pub use crate::envelope::{Meta, ResultEnvelope, StepOutcome};
    pub use crate::error::{ErrorKind, GatewayError, GatewayResult};
    pub use crate::validation::{FieldSpec, ParamSchema, TypedParams};
    pub use crate::AuthContext;
}
