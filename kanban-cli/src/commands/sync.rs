use colored::Colorize;
use kanban_core::AuthContext;
use serde_json::Value;

use super::{print_envelope, CliResult, Context};

/// Run `sync_articles` as the system user and summarise the counts.
pub async fn run(ctx: &Context) -> CliResult {
    let gateway = ctx.gateway()?;
    println!("{}", "Synchronising articles from the ERP item master".bold());
    let envelope = gateway
        .invoke("sync_articles", Value::Null, &AuthContext::system())
        .await;
    gateway.shutdown().await;

    if let Some(error) = &envelope.error {
        print_envelope(&envelope)?;
        return Err(format!("{}: {}", error.kind, error.message).into());
    }
    let count = |field: &str| {
        envelope
            .data
            .as_ref()
            .and_then(|d| d.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    println!(
        "  {} fetched, {} created, {} updated",
        count("fetched"),
        count("created").to_string().green(),
        count("updated").to_string().yellow()
    );
    Ok(())
}
