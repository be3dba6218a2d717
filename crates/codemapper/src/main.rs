//! `mapper`: daemon launcher and control-socket client.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use codemapper::client::ControlClient;
use codemapper::config::DaemonConfig;
use codemapper_logging::{init_logging, LogConfig};
use codemapper_protocol::defaults::{DEFAULT_JOBS_LIMIT, DEFAULT_LOGS_LIMIT};

mod cli;

use cli::ScanWhen;

#[derive(Parser, Debug)]
#[command(
    name = "mapper",
    version,
    about = "Keep per-file summaries of your codebases up to date"
)]
struct Cli {
    /// Config file (defaults to ~/.codemapper/config.toml when present)
    #[arg(long, global = true, env = "CODEMAPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Control socket path, overriding the config file
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon
    Serve {
        /// Detach and return once the daemon answers
        #[arg(long)]
        background: bool,
    },

    /// Ask the daemon to shut down
    Stop,

    /// Show whether the daemon is running
    Status,

    /// Register a codebase on a schedule, or scan a directory once
    Scan {
        /// Codebase root
        path: PathBuf,

        /// Registration name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        when: WhenArgs,
    },

    /// List registered codebases
    List,

    /// Unregister a codebase
    Remove {
        name: String,
    },

    /// Scan a registered codebase now
    Run {
        name: String,
    },

    /// Show running jobs
    Ps,

    /// Show recent jobs
    Jobs {
        #[arg(short = 'n', long, default_value_t = DEFAULT_JOBS_LIMIT)]
        limit: i64,
    },

    /// Show log lines for a job id or the latest job of a codebase
    Logs {
        /// Job id or codebase name
        target: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_LOGS_LIMIT)]
        limit: i64,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct WhenArgs {
    /// Interval such as 30s, 15m, 2h or 1d
    #[arg(long, value_name = "INTERVAL")]
    every: Option<String>,

    /// Five-field cron expression, e.g. "0 9 * * 1-5"
    #[arg(long, value_name = "EXPR")]
    cron: Option<String>,

    /// Scan once without registering
    #[arg(long)]
    once: bool,
}

impl WhenArgs {
    fn into_when(self) -> ScanWhen {
        match (self.every, self.cron) {
            (Some(every), _) => ScanWhen::Every(every),
            (None, Some(cron)) => ScanWhen::Cron(cron),
            (None, None) => ScanWhen::Once,
        }
    }
}

fn run_command(args: Cli, config: DaemonConfig) -> Result<bool> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let Cli {
        config: config_path,
        command,
        ..
    } = args;
    let client = ControlClient::new(&config.socket_path);
    runtime.block_on(async move {
        match command {
            Commands::Serve { background: true } => {
                cli::serve_background(&config, config_path.as_deref()).await
            }
            Commands::Serve { background: false } => cli::serve(config).await,
            Commands::Stop => cli::stop(&client).await,
            Commands::Status => cli::status(&client, &config.pid_file).await,
            Commands::Scan { path, name, when } => {
                cli::scan(&client, &path, name, when.into_when()).await
            }
            Commands::List => cli::list(&client).await,
            Commands::Remove { name } => cli::remove(&client, name).await,
            Commands::Run { name } => cli::run(&client, name).await,
            Commands::Ps => cli::ps(&client).await,
            Commands::Jobs { limit } => cli::jobs(&client, limit).await,
            Commands::Logs { target, limit } => cli::logs(&client, target, limit).await,
        }
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_name = match cli.command {
        Commands::Serve { .. } => "daemon",
        _ => "mapper",
    };
    if let Err(e) = init_logging(LogConfig {
        app_name,
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    let mut config = match DaemonConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:?}", e);
            return ExitCode::from(1);
        }
    };
    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }

    match run_command(cli, config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}
