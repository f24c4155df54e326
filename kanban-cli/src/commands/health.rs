use colored::Colorize;
use kanban_core::health::HealthCheckStatus;

use super::{CliResult, Context};

pub async fn run(ctx: &Context) -> CliResult {
    let gateway = ctx.gateway()?;
    let report = gateway.health().await;
    gateway.shutdown().await;

    println!("{}", "Backend health".bold());
    for check in &report.checks {
        match check.status {
            HealthCheckStatus::Up => println!("  {} {}", "UP  ".green(), check.name),
            HealthCheckStatus::Down => println!(
                "  {} {} {}",
                "DOWN".red(),
                check.name,
                check.reason.as_deref().unwrap_or_default().dimmed()
            ),
        }
    }

    if report.is_up() {
        Ok(())
    } else {
        Err("one or more backends are down".into())
    }
}
