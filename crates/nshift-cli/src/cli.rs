use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "nshift", about = "Scheduled start/stop for AWS resources", version)]
pub struct Cli {
    /// Base URL of a running nshift server. Defaults to http://localhost:8080.
    #[arg(long, env = "NIGHTSHIFT_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token for the nshift API. Falls back to ~/.nshift/token.
    #[arg(long, env = "NIGHTSHIFT_AUTH_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the nshift API server in the foreground.
    Serve {
        /// Directory of schedule/account YAML files.
        #[arg(long, env = "NIGHTSHIFT_CONFIG_DIR", default_value = "config")]
        config_dir: PathBuf,

        /// Path to the redb history/audit store. Ignored with --ephemeral.
        #[arg(long, env = "NIGHTSHIFT_STORE_PATH")]
        store_path: Option<String>,

        /// Use an in-memory store — history and audit are lost on restart.
        #[arg(long, default_value_t = false)]
        ephemeral: bool,

        #[arg(long, env = "NIGHTSHIFT_BIND", default_value = "0.0.0.0")]
        bind: String,

        #[arg(long, env = "NIGHTSHIFT_PORT", default_value_t = 8080)]
        port: u16,

        /// Rotate the auth token even if one already exists on disk.
        #[arg(long, default_value_t = false)]
        rotate_token: bool,
    },

    /// Trigger a scan. Omit --schedule-id for a full scan across every active schedule.
    Scan {
        #[arg(long)]
        schedule_id: Option<String>,

        /// Required alongside --schedule-id.
        #[arg(long)]
        tenant_id: Option<String>,

        #[arg(long, value_enum, default_value = "on-demand")]
        trigger_source: TriggerSourceArg,

        #[arg(long)]
        actor_identity: Option<String>,
    },

    /// Show active-schedule and active-account counts plus registered driver kinds.
    Status,

    /// List past executions for one schedule.
    Executions {
        schedule_id: String,

        #[arg(long)]
        tenant_id: String,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// List audit log entries, optionally scoped to one schedule.
    Audit {
        #[arg(long)]
        schedule_id: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum TriggerSourceArg {
    Periodic,
    #[value(name = "on-demand")]
    OnDemand,
}

impl TriggerSourceArg {
    pub fn as_wire(&self) -> &'static str {
        match self {
            TriggerSourceArg::Periodic => "periodic",
            TriggerSourceArg::OnDemand => "on-demand",
        }
    }
}
