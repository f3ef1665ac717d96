// csk/src/cli/info.rs
//! Shows what a manifest declares and whether it is installed.

use clap::Args;
use colored::Colorize;
use csk_common::error::Result;
use csk_common::model::ActionStep;
use csk_common::ReceiptStore;

use super::Session;

#[derive(Args, Debug)]
pub struct Info {
    pub identifier: String,
}

fn print_steps(title: &str, steps: &[ActionStep]) {
    if steps.is_empty() {
        return;
    }
    println!("{}", format!("{title}:").bold());
    for (i, step) in steps.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, step);
    }
}

impl Info {
    pub async fn run(&self, session: &Session) -> Result<i32> {
        let manifest = session.load_manifest(&self.identifier)?;

        println!(
            "{} {} {}",
            "==>".bold().blue(),
            manifest.identifier().bold(),
            manifest.version().to_string().dimmed()
        );
        if manifest.display_name() != manifest.identifier() {
            println!("{}", manifest.display_name());
        }
        if let Some(homepage) = manifest.homepage() {
            println!("{homepage}");
        }
        println!("{} {}", "From:".bold(), manifest.source_url());
        match manifest.checksum() {
            Some(checksum) => println!("{} {}", "Checksum:".bold(), checksum),
            None => println!("{} {}", "Checksum:".bold(), "none".dimmed()),
        }

        match ReceiptStore::new(&session.config).load(manifest.identifier())? {
            Some(receipt) => {
                println!(
                    "{} {} (installed {})",
                    "Installed:".bold(),
                    receipt.version.green(),
                    receipt.installed_at.format("%Y-%m-%d %H:%M UTC")
                );
                for warning in &receipt.warnings {
                    println!("  {} {}", "warning:".yellow(), warning);
                }
            }
            None => println!("{} {}", "Installed:".bold(), "no".dimmed()),
        }

        print_steps("Install", manifest.install_actions());
        print_steps("Uninstall", manifest.uninstall_actions());
        print_steps("Zap", manifest.zap_actions());
        Ok(0)
    }
}
