mod check_cmd;
mod purge_cmd;
mod serve;
mod status_cmd;
mod terminal_output;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use flowchat_config::defaults::{DEFAULT_INACTIVE_DAYS, DEFAULT_LOG_LEVEL};
use flowchat_config::{apply_all_defaults, config_file_path, load_and_prepare, load_config, log_report, validate};
use flowchat_logging::init_logger;

use terminal_output::{note_success, note_warn};

#[derive(Parser)]
#[command(name = "flowchat")]
#[command(about = "Flowchat: chat turn orchestrator for embedded workflow chat widgets")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $FLOWCHAT_CONFIG, then ~/.flowchat/flowchat.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat gateway
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind the HTTP server to
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Validate the config and print it with secrets masked
    CheckConfig,
    /// Delete sessions idle longer than the inactivity window
    PurgeSessions {
        /// Overrides `session.inactiveDays`
        #[arg(long)]
        older_than_days: Option<u32>,
    },
    /// Query a running gateway's health endpoint
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = config_file_path(cli.config.as_deref());

    match cli.command {
        Commands::Serve { port, bind } => {
            let env: HashMap<String, String> = std::env::vars().collect();
            let mut config = apply_all_defaults(load_config(&path, &env).await?, &env);
            if port.is_some() {
                config.gateway.port = port;
            }
            if bind.is_some() {
                config.gateway.bind = bind;
            }

            init_logger(
                config.logging.dir.as_deref().map(Path::new),
                config.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL),
                config.logging.json.unwrap_or(false),
            )?;

            let report = validate(&config);
            log_report(&report);
            if !report.is_valid() {
                bail!(
                    "Config at {} has {} error(s); run `flowchat check-config` for details",
                    path.display(),
                    report.errors.len()
                );
            }
            serve::run(config).await?;
        }
        Commands::CheckConfig => {
            let (config, report) = load_and_prepare(&path).await?;
            if !check_cmd::run(&config, &report)? {
                std::process::exit(1);
            }
        }
        Commands::PurgeSessions { older_than_days } => {
            init_logger(None, DEFAULT_LOG_LEVEL, false)?;
            let (config, _) = load_and_prepare(&path).await?;
            if config.session.sqlite_path.is_none() {
                note_warn("Sessions are kept in memory (no session.sqlitePath); nothing to purge");
                return Ok(());
            }
            let days = older_than_days
                .or(config.session.inactive_days)
                .unwrap_or(DEFAULT_INACTIVE_DAYS);
            let store = serve::open_store(&config.session)?;
            let removed = purge_cmd::run(store.as_ref(), days).await?;
            note_success(&format!("Removed {removed} session(s) idle for more than {days} day(s)"));
        }
        Commands::Status => {
            let (config, _) = load_and_prepare(&path).await?;
            let addr = serve::listen_addr(&config)?;
            if !status_cmd::run(addr).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
