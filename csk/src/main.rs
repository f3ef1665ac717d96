// csk/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use csk_common::config::Config;
use csk_common::error::Result as cskResult;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{exit_code_for, CliArgs, Session};

fn init_logging(config: &Config, verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("CSK_LOG")
        .from_env_lossy();

    let log_dir = config.logs_dir();
    if verbose == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
    } else if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {} (logging to stderr only)",
            "Warning:".yellow().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
    } else {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "csk.log");
        let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

        let stderr_writer = std::io::stderr.with_max_level(max_log_level);
        let file_writer = non_blocking_appender.with_max_level(max_log_level);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(stderr_writer.and(file_writer))
            .with_ansi(true)
            .without_time()
            .try_init();

        Box::leak(Box::new(guard)); // Keep guard alive

        debug!(
            "Verbose logging enabled. Writing logs to: {}/csk.log",
            log_dir.display()
        );
    }
}

#[tokio::main]
async fn main() -> cskResult<()> {
    let cli_args = CliArgs::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: Could not load config: {}", "Error".red().bold(), e);
            process::exit(exit_code_for(&e));
        }
    };
    if let Some(timeout) = cli_args.timeout {
        config.script_timeout = timeout;
    }

    init_logging(&config, cli_args.verbose);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current action...");
                cancel.cancel();
            }
        });
    }

    let session = Session {
        config,
        dry_run: cli_args.dry_run,
        no_sudo: cli_args.no_sudo,
        manifest_override: cli_args.manifest.clone(),
        cancel,
    };

    match cli_args.command.run(&session).await {
        Ok(0) => {
            debug!("Command completed successfully.");
            Ok(())
        }
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            process::exit(exit_code_for(&e));
        }
    }
}

