use kanban_core::AuthContext;
use serde_json::Value;

use super::{print_envelope, CliResult, Context};

pub async fn run(ctx: &Context, operation: &str, params: &str, subject: &str) -> CliResult {
    let params = parse_params(params)?;
    let gateway = ctx.gateway()?;
    let envelope = gateway
        .invoke(operation, params, &AuthContext::new(subject))
        .await;
    gateway.shutdown().await;

    print_envelope(&envelope)?;
    match envelope.error {
        None => Ok(()),
        Some(error) => Err(format!("{}: {}", error.kind, error.message).into()),
    }
}

/// Parse `--params`; blank input means no parameters.
pub fn parse_params(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(raw).map_err(|e| format!("--params is not valid JSON: {e}"))
}
