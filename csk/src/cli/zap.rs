// csk/src/cli/zap.rs

use clap::Args;
use csk_common::error::Result;

use super::status::print_report;
use super::Session;

/// Remove user data, caches and preferences left behind by a package.
/// Use with caution, data will be lost!
#[derive(Debug, Args)]
pub struct Zap {
    pub identifier: String,
}

impl Zap {
    pub async fn run(&self, session: &Session) -> Result<i32> {
        let manifest = session.load_manifest(&self.identifier)?;
        let (lifecycle, printer) = session.lifecycle()?;
        let report = lifecycle.zap(&manifest, &session.cancel).await;
        drop(lifecycle);
        let _ = printer.await;

        let report = report?;
        print_report(&report);
        Ok(report.exit_code())
    }
}
