// csk-core/src/lifecycle.rs
//! Sequences download, verification and actions for one phase of a manifest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use csk_aio::remove_path_async;
use csk_aio::write_artifact_async;
use csk_common::cache::Cache;
use csk_common::config::Config;
use csk_common::error::{CskError, Result};
use csk_common::lifecycle::{LifecycleEvent, Phase, PhaseState};
use csk_common::model::{ActionStep, Manifest};
use csk_common::receipt::{InstallReceipt, ReceiptStore};
use csk_net::{verify, verify_file, Fetcher};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{execute, ActionOutcome, ActionResult, ExecutionContext};
use crate::privilege::PrivilegeElevator;

/// Why an install phase failed.
#[derive(Debug, Clone)]
pub enum PhaseFailure {
    DownloadFailed(CskError),
    ChecksumMismatch(CskError),
    StagingFailed(CskError),
    InstallActionFailed { index: usize, error: CskError },
}

impl PhaseFailure {
    pub fn exit_code(&self) -> i32 {
        match self {
            PhaseFailure::DownloadFailed(_) => 3,
            PhaseFailure::ChecksumMismatch(_) => 4,
            PhaseFailure::StagingFailed(_) => 1,
            PhaseFailure::InstallActionFailed { .. } => 5,
        }
    }
}

impl std::fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseFailure::DownloadFailed(e) => write!(f, "download failed: {e}"),
            PhaseFailure::ChecksumMismatch(e) => write!(f, "{e}"),
            PhaseFailure::StagingFailed(e) => write!(f, "staging failed: {e}"),
            PhaseFailure::InstallActionFailed { index, error } => {
                write!(f, "install action #{} failed: {error}", index + 1)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    Installed,
    Uninstalled,
    PartiallyUninstalled,
    Failed(PhaseFailure),
    Cancelled,
}

impl PhaseOutcome {
    pub fn state(&self) -> PhaseState {
        match self {
            PhaseOutcome::Installed => PhaseState::Installed,
            PhaseOutcome::Uninstalled => PhaseState::Uninstalled,
            PhaseOutcome::PartiallyUninstalled => PhaseState::PartiallyUninstalled,
            PhaseOutcome::Failed(_) => PhaseState::Failed,
            PhaseOutcome::Cancelled => PhaseState::Cancelled,
        }
    }
}

/// Result of one executed action.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub index: usize,
    pub description: String,
    pub critical: bool,
    pub result: ActionResult,
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub identifier: String,
    pub phase: Phase,
    pub outcome: PhaseOutcome,
    pub records: Vec<ActionRecord>,
    pub duration: std::time::Duration,
}

impl PhaseReport {
    /// Records whose action failed, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = (&ActionRecord, &CskError)> {
        self.records
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r, e)))
    }

    /// Process exit code for this outcome. Zap never fails the process.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            PhaseOutcome::Installed | PhaseOutcome::Uninstalled => 0,
            PhaseOutcome::PartiallyUninstalled if self.phase == Phase::Zap => 0,
            PhaseOutcome::PartiallyUninstalled => 6,
            PhaseOutcome::Failed(failure) => failure.exit_code(),
            PhaseOutcome::Cancelled => 130,
        }
    }
}

/// Replaces the staging directory with one holding only the artifact.
async fn stage_artifact(staging: &Path, artifact: &Path, bytes: &[u8]) -> Result<()> {
    remove_path_async(staging).await?;
    write_artifact_async(artifact, bytes).await?;
    Ok(())
}

enum StepsEnd {
    Completed,
    Cancelled,
    Aborted { index: usize, error: CskError },
}

/// Runs install, uninstall and zap phases.
pub struct Lifecycle {
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    elevator: Arc<dyn PrivilegeElevator>,
    cache: Option<Cache>,
    receipts: ReceiptStore,
    events: Option<broadcast::Sender<LifecycleEvent>>,
    dry_run: bool,
    system_root: PathBuf,
}

impl Lifecycle {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        elevator: Arc<dyn PrivilegeElevator>,
    ) -> Self {
        let cache = match Cache::new(&config) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Artifact cache unavailable, downloads will not be cached: {}", e);
                None
            }
        };
        Self {
            receipts: ReceiptStore::new(&config),
            config,
            fetcher,
            elevator,
            cache,
            events: None,
            dry_run: false,
            system_root: PathBuf::from("/"),
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_system_root(mut self, root: PathBuf) -> Self {
        self.system_root = root;
        self
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.events {
            // No receivers is fine.
            let _ = tx.send(event);
        }
    }

    fn transition(&self, identifier: &str, phase: Phase, state: PhaseState) {
        debug!("{} {}: {:?}", identifier, phase, state);
        self.emit(LifecycleEvent::StateChanged {
            identifier: identifier.to_string(),
            phase,
            state,
        });
    }

    fn context(&self, phase: Phase, manifest: &Manifest) -> ExecutionContext {
        ExecutionContext::new(
            phase,
            self.elevator.clone(),
            self.config.tools.clone(),
            self.config.home_dir(),
        )
        .with_dry_run(self.dry_run)
        .with_timeout(Some(self.config.script_timeout))
        .with_system_root(self.system_root.clone())
        .with_staging(self.staging_dir(manifest), None)
    }

    fn staging_dir(&self, manifest: &Manifest) -> PathBuf {
        self.config
            .staging_path(manifest.identifier(), manifest.version().as_str())
    }

    /// Downloads, verifies and stages the artifact, then runs the install
    /// actions. Elevation is released on every exit path.
    pub async fn install(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> Result<PhaseReport> {
        let started = Instant::now();
        let id = manifest.identifier();
        let steps = manifest.install_actions();
        self.start_phase(id, Phase::Install, steps.len());

        let mut records = Vec::new();
        let outcome = self.run_install(manifest, cancel, &mut records).await;

        if matches!(outcome, PhaseOutcome::Installed) && !self.dry_run {
            let warnings = records
                .iter()
                .filter_map(|r: &ActionRecord| {
                    r.result
                        .as_ref()
                        .err()
                        .map(|e| format!("{}: {e}", r.description))
                })
                .collect();
            let receipt = InstallReceipt {
                identifier: id.to_string(),
                version: manifest.version().to_string(),
                artifact: manifest.artifact_file_name(),
                installed_at: Utc::now(),
                warnings,
            };
            if let Err(e) = self.receipts.record(&receipt) {
                warn!("Failed to record install receipt for {}: {}", id, e);
            }
        }

        Ok(self.finish_phase(id, Phase::Install, outcome, records, started))
    }

    async fn run_install(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
        records: &mut Vec<ActionRecord>,
    ) -> PhaseOutcome {
        let id = manifest.identifier();

        if cancel.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }
        self.transition(id, Phase::Install, PhaseState::Downloading);
        let staging = self.staging_dir(manifest);
        let artifact = if self.dry_run {
            info!("[dry-run] would download {}", manifest.source_url());
            None
        } else {
            let (bytes, from_cache) = match self.cached_artifact(manifest) {
                Some(bytes) => (bytes, true),
                None => {
                    let fetched = tokio::select! {
                        _ = cancel.cancelled() => return PhaseOutcome::Cancelled,
                        res = self.fetcher.fetch(manifest.source_url()) => res,
                    };
                    match fetched {
                        Ok(bytes) => (bytes, false),
                        Err(e) => {
                            error!("Download of {} failed: {}", manifest.source_url(), e);
                            return PhaseOutcome::Failed(PhaseFailure::DownloadFailed(e));
                        }
                    }
                }
            };

            if cancel.is_cancelled() {
                return PhaseOutcome::Cancelled;
            }
            self.transition(id, Phase::Install, PhaseState::Verifying);
            if !from_cache {
                if let Some(checksum) = manifest.checksum() {
                    if let Err(e) = verify(&bytes, checksum) {
                        error!("Refusing artifact for {}: {}", id, e);
                        return PhaseOutcome::Failed(PhaseFailure::ChecksumMismatch(e));
                    }
                    self.store_in_cache(manifest, &bytes);
                }
            }

            if cancel.is_cancelled() {
                return PhaseOutcome::Cancelled;
            }
            let path = staging.join(manifest.artifact_file_name());
            if let Err(e) = stage_artifact(&staging, &path, &bytes).await {
                error!("Failed to stage artifact for {}: {}", id, e);
                return PhaseOutcome::Failed(PhaseFailure::StagingFailed(e));
            }
            debug!("Staged artifact for {} at {}", id, path.display());
            Some(path)
        };

        self.transition(id, Phase::Install, PhaseState::Installing);
        let ctx = self.context(Phase::Install, manifest).with_staging(staging.clone(), artifact);
        let end = self
            .run_steps(id, manifest.install_actions(), &ctx, cancel, records)
            .await;
        ctx.finish().await;

        if !self.dry_run {
            if let Err(e) = remove_path_async(&staging).await {
                warn!("Failed to clean staging directory {}: {}", staging.display(), e);
            }
        }

        match end {
            StepsEnd::Completed => PhaseOutcome::Installed,
            StepsEnd::Cancelled => PhaseOutcome::Cancelled,
            StepsEnd::Aborted { index, error } => {
                PhaseOutcome::Failed(PhaseFailure::InstallActionFailed { index, error })
            }
        }
    }

    /// A cached artifact that still matches the manifest's checksum. Entries
    /// that no longer verify are evicted.
    fn cached_artifact(&self, manifest: &Manifest) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        let checksum = manifest.checksum()?;
        let id = manifest.identifier();
        let version = manifest.version().as_str();
        let file = manifest.artifact_file_name();
        let path = cache.artifact_path(id, version, &file);
        if !path.is_file() {
            return None;
        }
        if let Err(e) = verify_file(&path, checksum) {
            warn!("Cached artifact for {} is stale ({}), evicting", id, e);
            if let Err(e) = cache.evict_artifact(id, version, &file) {
                warn!("Failed to evict cached artifact for {}: {}", id, e);
            }
            return None;
        }
        match cache.load_artifact(id, version, &file) {
            Ok(Some(bytes)) => {
                info!("Using cached artifact for {}", id);
                self.emit(LifecycleEvent::ArtifactCacheHit {
                    identifier: id.to_string(),
                });
                Some(bytes)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable cache entry for {}: {}", id, e);
                None
            }
        }
    }

    fn store_in_cache(&self, manifest: &Manifest, bytes: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store_artifact(
                manifest.identifier(),
                manifest.version().as_str(),
                &manifest.artifact_file_name(),
                bytes,
            ) {
                warn!("Failed to cache artifact for {}: {}", manifest.identifier(), e);
            }
        }
    }

    /// Runs every uninstall action; removes the install receipt when clean.
    pub async fn uninstall(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> Result<PhaseReport> {
        let report = self
            .run_cleanup(manifest, Phase::Uninstall, manifest.uninstall_actions(), cancel)
            .await;
        if matches!(report.outcome, PhaseOutcome::Uninstalled) && !self.dry_run {
            match self.receipts.remove(manifest.identifier()) {
                Ok(true) => debug!("Removed install receipt for {}", manifest.identifier()),
                Ok(false) => {}
                Err(e) => warn!(
                    "Failed to remove install receipt for {}: {}",
                    manifest.identifier(),
                    e
                ),
            }
        }
        Ok(report)
    }

    /// Best-effort removal of everything in the zap list.
    pub async fn zap(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> Result<PhaseReport> {
        Ok(self
            .run_cleanup(manifest, Phase::Zap, manifest.zap_actions(), cancel)
            .await)
    }

    async fn run_cleanup(
        &self,
        manifest: &Manifest,
        phase: Phase,
        steps: &[ActionStep],
        cancel: &CancellationToken,
    ) -> PhaseReport {
        let started = Instant::now();
        let id = manifest.identifier();
        self.start_phase(id, phase, steps.len());

        let mut records = Vec::new();
        let outcome = if cancel.is_cancelled() {
            PhaseOutcome::Cancelled
        } else {
            self.transition(id, phase, PhaseState::Uninstalling);
            let ctx = self.context(phase, manifest);
            let end = self.run_steps(id, steps, &ctx, cancel, &mut records).await;
            ctx.finish().await;
            match end {
                StepsEnd::Cancelled => PhaseOutcome::Cancelled,
                _ if records.iter().any(|r| r.result.is_err()) => {
                    PhaseOutcome::PartiallyUninstalled
                }
                _ => PhaseOutcome::Uninstalled,
            }
        };
        self.finish_phase(id, phase, outcome, records, started)
    }

    /// Executes steps in order. Cleanup phases never abort; install aborts
    /// on a critical failure or any timeout.
    async fn run_steps(
        &self,
        id: &str,
        steps: &[ActionStep],
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
        records: &mut Vec<ActionRecord>,
    ) -> StepsEnd {
        let phase = ctx.phase();
        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("{} {} cancelled before action #{}", id, phase, index + 1);
                return StepsEnd::Cancelled;
            }
            let description = step.to_string();
            self.emit(LifecycleEvent::ActionStarted {
                identifier: id.to_string(),
                index,
                description: description.clone(),
            });

            let result = execute(step, ctx).await;
            match &result {
                Ok(ActionOutcome::AlreadyAbsent) => debug!("{}: already absent", description),
                Ok(outcome) => debug!("{}: {}", description, outcome),
                Err(e) => warn!("{} failed: {}", description, e),
            }
            self.emit(LifecycleEvent::action_finished(
                id.to_string(),
                index,
                description.clone(),
                result.as_ref().err(),
            ));

            let abort = match &result {
                Err(e) if phase == Phase::Install => {
                    step.critical || matches!(e, CskError::ActionTimeout(..))
                }
                _ => false,
            };
            let error = result.as_ref().err().cloned();
            records.push(ActionRecord {
                index,
                description,
                critical: step.critical,
                result,
            });
            if abort {
                if let Some(error) = error {
                    error!("Aborting {} of {} at action #{}", phase, id, index + 1);
                    return StepsEnd::Aborted { index, error };
                }
            }
        }
        StepsEnd::Completed
    }

    fn start_phase(&self, id: &str, phase: Phase, action_count: usize) {
        info!("Starting {} of {} ({} actions)", phase, id, action_count);
        self.emit(LifecycleEvent::PhaseStarted {
            identifier: id.to_string(),
            phase,
            action_count,
        });
        self.transition(id, phase, PhaseState::Idle);
    }

    fn finish_phase(
        &self,
        id: &str,
        phase: Phase,
        outcome: PhaseOutcome,
        records: Vec<ActionRecord>,
        started: Instant,
    ) -> PhaseReport {
        let duration = started.elapsed();
        let state = outcome.state();
        self.transition(id, phase, state);
        self.emit(LifecycleEvent::PhaseFinished {
            identifier: id.to_string(),
            phase,
            state,
            duration_secs: duration.as_secs_f64(),
        });
        info!("Finished {} of {}: {:?}", phase, id, state);
        PhaseReport {
            identifier: id.to_string(),
            phase,
            outcome,
            records,
            duration,
        }
    }
}
