// csk/src/cli/uninstall.rs

use clap::Args;
use colored::Colorize;
use csk_common::error::Result;
use csk_core::PhaseOutcome;
use tracing::debug;

use super::status::print_report;
use super::Session;

#[derive(Args, Debug)]
pub struct Uninstall {
    /// Identifier of the manifest to uninstall
    pub identifier: String,
    /// Also run the zap phase afterwards, removing associated user data,
    /// caches, and configuration files. Use with caution, data will be lost!
    #[arg(long)]
    pub zap: bool,
}

impl Uninstall {
    pub async fn run(&self, session: &Session) -> Result<i32> {
        let manifest = session.load_manifest(&self.identifier)?;
        let (lifecycle, printer) = session.lifecycle()?;

        let uninstall = lifecycle.uninstall(&manifest, &session.cancel).await;
        let zap = match &uninstall {
            Ok(report) if self.zap && !matches!(report.outcome, PhaseOutcome::Cancelled) => {
                Some(lifecycle.zap(&manifest, &session.cancel).await)
            }
            _ => None,
        };
        drop(lifecycle);
        let _ = printer.await;

        let uninstall = uninstall?;
        print_report(&uninstall);
        if let Some(zap) = zap {
            match zap {
                Ok(report) => {
                    print_report(&report);
                    if report.exit_code() != 0 {
                        return Ok(report.exit_code());
                    }
                }
                // Zap problems never change the exit code.
                Err(e) => eprintln!("{} zap failed: {}", "Warning:".yellow(), e),
            }
        }
        debug!("Uninstall of {} finished", self.identifier);
        Ok(uninstall.exit_code())
    }
}
