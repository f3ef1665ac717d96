// csk/src/cli/status.rs
use std::time::Duration;

use colored::*;
use csk_common::lifecycle::{LifecycleEvent, Phase, PhaseState};
use csk_core::{ActionOutcome, PhaseOutcome, PhaseReport};
use tokio::sync::broadcast;
use tracing::debug;

fn phase_verb(phase: Phase) -> &'static str {
    match phase {
        Phase::Install => "Installing",
        Phase::Uninstall => "Uninstalling",
        Phase::Zap => "Zapping",
    }
}

fn state_line(state: PhaseState) -> Option<ColoredString> {
    match state {
        PhaseState::Downloading => Some("downloading artifact".yellow()),
        PhaseState::Verifying => Some("verifying checksum".blue()),
        PhaseState::Installing => Some("running install actions".magenta()),
        _ => None,
    }
}

/// Prints lifecycle events as they happen. Returns when the sender is gone.
pub async fn handle_events(mut event_rx: broadcast::Receiver<LifecycleEvent>) {
    let mut total_actions = 0usize;
    loop {
        match event_rx.recv().await {
            Ok(event) => match event {
                LifecycleEvent::PhaseStarted {
                    identifier,
                    phase,
                    action_count,
                } => {
                    total_actions = action_count;
                    println!(
                        "{}{} {} ({} actions)",
                        "==> ".bold().blue(),
                        phase_verb(phase).bold(),
                        identifier.cyan(),
                        action_count
                    );
                }
                LifecycleEvent::StateChanged { state, .. } => {
                    if let Some(line) = state_line(state) {
                        println!("    {line}");
                    }
                }
                LifecycleEvent::ArtifactCacheHit { .. } => {
                    println!("    {}", "using cached artifact".green());
                }
                LifecycleEvent::ActionStarted { index, description, .. } => {
                    debug!("[{}/{}] {}", index + 1, total_actions, description);
                }
                LifecycleEvent::ActionFinished {
                    index,
                    description,
                    error,
                    ..
                } => {
                    let counter = format!("[{}/{}]", index + 1, total_actions).dimmed();
                    match error {
                        None => println!("  {} {} {}", "✓".green(), counter, description),
                        Some(error) => println!(
                            "  {} {} {}: {}",
                            "✗".red().bold(),
                            counter,
                            description,
                            error.red()
                        ),
                    }
                }
                LifecycleEvent::PhaseFinished { .. } => {}
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Status display skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    // Millisecond precision is plenty for a summary line.
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)).to_string()
}

/// One-line summary of a finished phase, plus every failed action.
pub fn print_report(report: &PhaseReport) {
    let id = report.identifier.cyan();
    let elapsed = format_elapsed(report.duration).dimmed();
    let failures: Vec<_> = report.failures().collect();
    let dry_runs = report
        .records
        .iter()
        .filter(|r| matches!(r.result, Ok(ActionOutcome::DryRun)))
        .count();

    match &report.outcome {
        PhaseOutcome::Installed if failures.is_empty() => {
            println!("{} Installed {} in {}", "✓".green().bold(), id, elapsed)
        }
        PhaseOutcome::Installed => println!(
            "{} Installed {} with {} warning(s) in {}",
            "✓".yellow().bold(),
            id,
            failures.len(),
            elapsed
        ),
        PhaseOutcome::Uninstalled => println!(
            "{} {} {} in {}",
            "✓".green().bold(),
            if report.phase == Phase::Zap {
                "Zapped"
            } else {
                "Uninstalled"
            },
            id,
            elapsed
        ),
        PhaseOutcome::PartiallyUninstalled => println!(
            "{} {} {} incompletely: {} of {} actions failed",
            "!".yellow().bold(),
            if report.phase == Phase::Zap {
                "Zapped"
            } else {
                "Uninstalled"
            },
            id,
            failures.len(),
            report.records.len()
        ),
        PhaseOutcome::Failed(failure) => eprintln!(
            "{} Failed to {} {}: {}",
            "✖".red().bold(),
            report.phase,
            id,
            failure.to_string().red()
        ),
        PhaseOutcome::Cancelled => eprintln!(
            "{} {} of {} cancelled",
            "✖".yellow().bold(),
            report.phase,
            id
        ),
    }

    if dry_runs > 0 {
        println!("  {}", format!("(dry run: {dry_runs} action(s) not executed)").dimmed());
    }
    if !matches!(report.outcome, PhaseOutcome::Failed(_)) {
        for (record, error) in failures {
            println!(
                "  {} #{} {}: {}",
                "-".yellow(),
                record.index + 1,
                record.description,
                error
            );
        }
    }
}
