// ABOUTME: fleetd CLI entry point.
// ABOUTME: Provides serve, ctl, and init subcommands.

use clap::{Parser, Subcommand};
use fleet_supervisor::{run_ctl, run_init, run_serve, Request, ServeOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "Supervisor for per-phone messaging worker processes")]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file interactively
    Init,
    /// Run the supervisor daemon
    Serve {
        /// Keep session status in memory instead of SQLite
        #[arg(long)]
        memory: bool,
        /// Log to a file in the state directory instead of stderr
        #[arg(long)]
        log_file: bool,
    },
    /// Send a command to a running daemon
    Ctl {
        #[command(subcommand)]
        op: CtlOp,
    },
}

#[derive(Subcommand)]
enum CtlOp {
    /// Register a phone and start its worker
    Start { phone: String },
    /// Stop a worker and keep it stopped
    Pause { phone: String },
    /// Restart a paused worker
    Resume { phone: String },
    /// Drop the quick-session key and restart the worker
    Reset { phone: String },
    /// Remove the worker and erase its session data
    Clear { phone: String },
    /// Show one worker
    Inspect { phone: String },
    /// Show all workers
    List,
    /// Show the stored session for a phone
    Session { phone: String },
    /// Show every stored session
    Sessions,
}

impl From<CtlOp> for Request {
    fn from(op: CtlOp) -> Self {
        match op {
            CtlOp::Start { phone } => Request::Start { phone },
            CtlOp::Pause { phone } => Request::Pause { phone },
            CtlOp::Resume { phone } => Request::Resume { phone },
            CtlOp::Reset { phone } => Request::Reset { phone },
            CtlOp::Clear { phone } => Request::Clear { phone },
            CtlOp::Inspect { phone } => Request::Inspect { phone },
            CtlOp::List => Request::List,
            CtlOp::Session { phone } => Request::Session { phone },
            CtlOp::Sessions => Request::Sessions,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { log_file: true, .. } => fleet_log::init_file("fleetd"),
        _ => fleet_log::init(),
    }

    match cli.command {
        Commands::Init => run_init(cli.config.as_deref()),
        Commands::Serve { memory, .. } => {
            run_serve(ServeOptions {
                config_path: cli.config,
                memory,
            })
            .await
        }
        Commands::Ctl { op } => run_ctl(cli.config, op.into()).await,
    }
}
