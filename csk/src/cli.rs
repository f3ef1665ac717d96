// csk/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use csk_common::config::parse_timeout;
use csk_common::error::{CskError, Result};
use csk_common::{Config, Manifest};
use csk_core::{default_elevator, Lifecycle};
use csk_net::HttpFetcher;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod info;
pub mod install;
pub mod status;
pub mod uninstall;
pub mod zap;

use crate::cli::info::Info;
use crate::cli::install::InstallArgs;
use crate::cli::uninstall::Uninstall;
use crate::cli::zap::Zap;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "csk", bin_name = "csk")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Show what would be done without touching the system
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Never ask for elevated privileges; privileged actions fail instead
    #[arg(long, global = true)]
    pub no_sudo: bool,

    /// Read the manifest from this file instead of the manifests directory
    #[arg(long, global = true, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Timeout for each script, e.g. "90s" or "30m"
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_timeout_arg)]
    pub timeout: Option<Duration>,

    #[command(subcommand)]
    pub command: Command,
}

fn parse_timeout_arg(raw: &str) -> std::result::Result<Duration, String> {
    parse_timeout(raw).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Info(Info),
    Install(InstallArgs),
    Uninstall(Uninstall),
    Zap(Zap),
}

impl Command {
    /// Runs the command and returns the process exit code.
    pub async fn run(&self, session: &Session) -> Result<i32> {
        match self {
            Self::Info(command) => command.run(session).await,
            Self::Install(command) => command.run(session).await,
            Self::Uninstall(command) => command.run(session).await,
            Self::Zap(command) => command.run(session).await,
        }
    }
}

/// Everything a command needs besides its own arguments.
pub struct Session {
    pub config: Config,
    pub dry_run: bool,
    pub no_sudo: bool,
    pub manifest_override: Option<PathBuf>,
    pub cancel: CancellationToken,
}

impl Session {
    /// Loads the manifest for `identifier`, or the `--manifest` file.
    pub fn load_manifest(&self, identifier: &str) -> Result<Manifest> {
        let path = match &self.manifest_override {
            Some(path) => path.clone(),
            None => self.config.manifest_path(identifier).ok_or_else(|| {
                CskError::NotFound(format!(
                    "No manifest for '{identifier}' in {}",
                    self.config.manifests_dir().display()
                ))
            })?,
        };
        debug!("Loading manifest {}", path.display());
        let manifest = Manifest::from_path(&path)?;
        if manifest.identifier() != identifier {
            return Err(CskError::ValidationError(format!(
                "Manifest {} declares identifier '{}', not '{}'",
                path.display(),
                manifest.identifier(),
                identifier
            )));
        }
        Ok(manifest)
    }

    /// Lifecycle wired to the real collaborators, plus the task printing its
    /// events. The task ends once the lifecycle is dropped.
    pub fn lifecycle(&self) -> Result<(Lifecycle, JoinHandle<()>)> {
        let (event_tx, event_rx) = broadcast::channel(100);
        let printer = tokio::spawn(status::handle_events(event_rx));
        let lifecycle = Lifecycle::new(
            self.config.clone(),
            Arc::new(HttpFetcher::new()?),
            default_elevator(!self.no_sudo),
        )
        .with_dry_run(self.dry_run)
        .with_events(event_tx);
        Ok((lifecycle, printer))
    }
}

/// Exit code for an error that stopped a command before a phase report.
pub fn exit_code_for(error: &CskError) -> i32 {
    match error {
        CskError::ParseError(..)
        | CskError::Json(_)
        | CskError::Toml(_)
        | CskError::ValidationError(_) => 2,
        CskError::Cancelled => 130,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "csk",
            "uninstall",
            "cuda_toolkit",
            "--zap",
            "--dry-run",
            "--no-sudo",
            "-vv",
            "--timeout",
            "90s",
        ])
        .unwrap();
        assert!(args.dry_run && args.no_sudo);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.timeout, Some(Duration::from_secs(90)));
        match args.command {
            Command::Uninstall(u) => {
                assert_eq!(u.identifier, "cuda_toolkit");
                assert!(u.zap);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_invalid_timeout_is_rejected() {
        assert!(CliArgs::try_parse_from(["csk", "install", "x", "--timeout", "0s"]).is_err());
        assert!(CliArgs::try_parse_from(["csk", "install", "x", "--timeout", "soon"]).is_err());
    }

    #[test]
    fn test_exit_codes_for_errors() {
        assert_eq!(exit_code_for(&CskError::parse("m.json", "bad")), 2);
        assert_eq!(exit_code_for(&CskError::Cancelled), 130);
        assert_eq!(exit_code_for(&CskError::Config("x".into())), 1);
    }

    #[test]
    fn test_load_manifest_from_directory_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        std::fs::create_dir_all(config.manifests_dir()).unwrap();
        std::fs::write(
            config.manifests_dir().join("demo.toml"),
            "identifier = \"demo\"\nsource_url = \"https://example.com/demo.zip\"\n",
        )
        .unwrap();
        let mut session = Session {
            config,
            dry_run: false,
            no_sudo: true,
            manifest_override: None,
            cancel: CancellationToken::new(),
        };
        assert_eq!(session.load_manifest("demo").unwrap().identifier(), "demo");
        assert!(matches!(
            session.load_manifest("missing").unwrap_err(),
            CskError::NotFound(_)
        ));

        let other = dir.path().join("other.json");
        std::fs::write(
            &other,
            r#"{"identifier": "other", "source_url": "https://example.com/o.pkg"}"#,
        )
        .unwrap();
        session.manifest_override = Some(other);
        assert_eq!(session.load_manifest("other").unwrap().identifier(), "other");
        let err = session.load_manifest("demo").unwrap_err();
        assert!(matches!(err, CskError::ValidationError(_)));
        assert_eq!(exit_code_for(&err), 2);
    }
}
