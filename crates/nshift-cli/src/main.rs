mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config_dir, store_path, ephemeral, bind, port, rotate_token } => {
            commands::serve(config_dir, store_path, ephemeral, bind, port, rotate_token).await
        }
        Command::Scan { schedule_id, tenant_id, trigger_source, actor_identity } => {
            commands::scan(schedule_id, tenant_id, trigger_source, actor_identity, cli.remote, cli.token).await
        }
        Command::Status => commands::status(cli.remote, cli.token).await,
        Command::Executions { schedule_id, tenant_id, limit } => {
            commands::executions(schedule_id, tenant_id, limit, cli.remote, cli.token).await
        }
        Command::Audit { schedule_id, limit } => {
            commands::audit(schedule_id, limit, cli.remote, cli.token).await
        }
    }
}
