use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kanban_cli::commands::{self, health, invoke, metrics, operations, sync, Context};

#[derive(Parser)]
#[command(name = "kanban", version, about = "Kanban gateway CLI - inspect and drive the data gateway")]
struct Cli {
    /// Configuration profile (overridden by KANBAN_PROFILE)
    #[arg(long, global = true, default_value = "dev")]
    profile: String,
    /// Directory holding gateway.yaml and .env files
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the operation registry as JSON
    Operations {
        /// Print a table instead of JSON
        #[arg(long)]
        table: bool,
    },
    /// Invoke an operation and print its result envelope
    Invoke {
        /// Operation name (see `kanban operations`)
        operation: String,
        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Subject recorded on the invocation
        #[arg(long, default_value = "cli")]
        subject: String,
    },
    /// Import item numbers and descriptions from the ERP
    SyncArticles,
    /// Ping every configured backend
    Health,
    /// Print a Prometheus metrics snapshot
    Metrics,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ctx = Context::new(cli.config_dir, cli.profile);
    commands::init_logging(&ctx);

    let result = match cli.command {
        Commands::Operations { table } => operations::run(table),
        Commands::Invoke {
            operation,
            params,
            subject,
        } => invoke::run(&ctx, &operation, &params, &subject).await,
        Commands::SyncArticles => sync::run(&ctx).await,
        Commands::Health => health::run(&ctx).await,
        Commands::Metrics => metrics::run(&ctx).await,
    };

    if let Err(e) = result {
        eprintln!("{}", colored::Colorize::red(format!("Error: {e}").as_str()));
        std::process::exit(1);
    }
}
