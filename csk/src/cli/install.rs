// csk/src/cli/install.rs

use clap::Args;
use csk_common::error::Result;
use tracing::instrument;

use super::status::print_report;
use super::Session;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Identifier of the manifest to install
    pub identifier: String,
}

impl InstallArgs {
    #[instrument(skip(self, session), fields(target = %self.identifier))]
    pub async fn run(&self, session: &Session) -> Result<i32> {
        let manifest = session.load_manifest(&self.identifier)?;
        let (lifecycle, printer) = session.lifecycle()?;
        let report = lifecycle.install(&manifest, &session.cancel).await;
        drop(lifecycle);
        let _ = printer.await;

        let report = report?;
        print_report(&report);
        Ok(report.exit_code())
    }
}
