use clap::{Parser, Subcommand};
use dashpdf::{server, sweeper, worker, Orchestrator, OutputStore, ServiceConfig, WorkerCommand};
use log::info;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

#[derive(Parser)]
#[command(name = "dashpdf", version, about = "Render dashboards to PDF over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Render one URL; used by the server for its worker processes
    Render {
        /// Target dashboard URL
        url: String,
        /// `user:password`
        credentials: String,
        /// JSON-encoded worker options
        options: String,
    },
    /// Delete generated files older than the TTL, once
    Sweep {
        /// Output directory (defaults to OUTPUT_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Maximum age in seconds (defaults to OUTPUT_TTL_SECS)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Logs always go to stderr; a worker's stdout carries only its report.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = ServiceConfig::from_env()?;
            let orchestrator = Orchestrator::new(config, WorkerCommand::current_exe()?);
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(server::serve(orchestrator))
        }
        Commands::Render {
            url,
            credentials,
            options,
        } => {
            let code = worker::run_worker(&url, &credentials, &options);
            std::process::exit(code);
        }
        Commands::Sweep { dir, ttl_secs } => {
            let mut store = OutputStore::from_env()?;
            if let Some(dir) = dir {
                store.dir = dir;
            }
            if let Some(secs) = ttl_secs {
                store.ttl = Duration::from_secs(secs);
            }
            let report = sweeper::sweep(&store.dir, store.ttl, SystemTime::now());
            info!(
                "Cleanup finished: {} deleted, {} errors",
                report.deleted, report.errors
            );
            if report.errors > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
