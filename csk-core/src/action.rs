// csk-core/src/action.rs
//! Runs one typed lifecycle action against the host.
//!
//! Every action is idempotent: a target that is already gone reports
//! [`ActionOutcome::AlreadyAbsent`] instead of an error. Elevation is
//! requested lazily through the [`ExecutionContext`] and held for the rest
//! of the phase.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use csk_aio::{
    find_kext_bundles_async, forget_receipt_async, kext_loaded_async,
    launchd_service_loaded_async, path_present_async, receipt_present_async,
    remove_launchd_service_async, remove_path_async, remove_path_elevated_async,
    run_command_async, unload_kext_async, CommandSpec, Removal,
};
use csk_common::config::SystemTools;
use csk_common::error::{CskError, Result};
use csk_common::lifecycle::Phase;
use csk_common::model::{Action, ActionStep};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::privilege::{ElevatedHandle, PrivilegeElevator};

/// What an action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    AlreadyAbsent,
    DryRun,
}

impl ActionOutcome {
    fn from_removals(removals: impl IntoIterator<Item = Removal>) -> Self {
        if removals.into_iter().any(|r| r == Removal::Removed) {
            ActionOutcome::Completed
        } else {
            ActionOutcome::AlreadyAbsent
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionOutcome::Completed => "completed",
            ActionOutcome::AlreadyAbsent => "already absent",
            ActionOutcome::DryRun => "dry run",
        })
    }
}

pub type ActionResult = Result<ActionOutcome>;

#[derive(Debug)]
enum Elevation {
    NotRequested,
    Held(ElevatedHandle),
    Denied(String),
}

/// Per-phase execution state shared by every action of the phase.
pub struct ExecutionContext {
    phase: Phase,
    elevator: Arc<dyn PrivilegeElevator>,
    elevation: Mutex<Elevation>,
    dry_run: bool,
    timeout: Option<Duration>,
    staging_dir: Option<PathBuf>,
    artifact: Option<PathBuf>,
    home: PathBuf,
    system_root: PathBuf,
    tools: SystemTools,
}

impl ExecutionContext {
    pub fn new(
        phase: Phase,
        elevator: Arc<dyn PrivilegeElevator>,
        tools: SystemTools,
        home: PathBuf,
    ) -> Self {
        Self {
            phase,
            elevator,
            elevation: Mutex::new(Elevation::NotRequested),
            dry_run: false,
            timeout: None,
            staging_dir: None,
            artifact: None,
            home,
            system_root: PathBuf::from("/"),
            tools,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Working directory for scripts and, when present, the staged artifact.
    pub fn with_staging(mut self, dir: PathBuf, artifact: Option<PathBuf>) -> Self {
        self.staging_dir = Some(dir);
        self.artifact = artifact;
        self
    }

    /// Prefix for the system-wide launchd directories (`/` outside tests).
    pub fn with_system_root(mut self, root: PathBuf) -> Self {
        self.system_root = root;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Launcher prefix for an elevated command, acquiring elevation on first use.
    ///
    /// A refusal is remembered: later requests fail without asking again.
    pub async fn elevate(&self) -> Result<Vec<String>> {
        let mut state = self.elevation.lock().await;
        match &*state {
            Elevation::Held(handle) => Ok(handle.launcher().to_vec()),
            Elevation::Denied(reason) => Err(CskError::PrivilegeDenied(reason.clone())),
            Elevation::NotRequested => match self.elevator.acquire().await {
                Ok(handle) => {
                    debug!("Elevation acquired for {} phase", self.phase);
                    let launcher = handle.launcher().to_vec();
                    *state = Elevation::Held(handle);
                    Ok(launcher)
                }
                Err(e) => {
                    let reason = match &e {
                        CskError::PrivilegeDenied(reason) => reason.clone(),
                        other => other.to_string(),
                    };
                    warn!("Elevation refused: {}", reason);
                    *state = Elevation::Denied(reason.clone());
                    Err(CskError::PrivilegeDenied(reason))
                }
            },
        }
    }

    pub async fn is_elevated(&self) -> bool {
        matches!(&*self.elevation.lock().await, Elevation::Held(_))
    }

    /// Releases held elevation. Safe to call more than once.
    pub async fn finish(&self) {
        let mut state = self.elevation.lock().await;
        if let Elevation::Held(handle) =
            std::mem::replace(&mut *state, Elevation::NotRequested)
        {
            debug!("Releasing elevation for {} phase", self.phase);
            self.elevator.release(handle).await;
        }
    }

    fn expand_home(&self, path: &str) -> PathBuf {
        match path.strip_prefix("~/") {
            Some(rest) => self.home.join(rest),
            None if path == "~" => self.home.clone(),
            None => PathBuf::from(path),
        }
    }

    fn system_path(&self, absolute: &str) -> PathBuf {
        self.system_root.join(absolute.trim_start_matches('/'))
    }
}

/// Executes one step. Errors are returned, never panicked; the caller decides
/// whether the phase continues.
pub async fn execute(step: &ActionStep, ctx: &ExecutionContext) -> ActionResult {
    if ctx.dry_run {
        info!("[dry-run] would {}", step.action);
        return Ok(ActionOutcome::DryRun);
    }
    debug!("Executing {}", step);
    match &step.action {
        Action::RunScript {
            executable,
            args,
            sudo,
        } => run_script(executable, args, *sudo, ctx).await,
        Action::UnregisterService { services } => unregister_services(services, ctx).await,
        Action::RemoveKernelExtension { kext_id } => remove_kernel_extension(kext_id, ctx).await,
        Action::DeletePath { path } => delete_path(path, ctx).await,
        Action::ForgetReceipt { package_ids } => forget_receipts(package_ids, ctx).await,
    }
}

fn resolve_executable(executable: &str, ctx: &ExecutionContext) -> Option<PathBuf> {
    let expanded = ctx.expand_home(executable);
    if expanded.is_absolute() {
        return Some(expanded);
    }
    if executable.contains('/') {
        return ctx.staging_dir.as_ref().map(|dir| dir.join(&expanded));
    }
    if let Some(staged) = ctx.staging_dir.as_ref().map(|dir| dir.join(executable)) {
        if staged.exists() {
            return Some(staged);
        }
    }
    which::which(executable).ok()
}

async fn run_script(
    executable: &str,
    args: &[String],
    sudo: bool,
    ctx: &ExecutionContext,
) -> ActionResult {
    let resolved = resolve_executable(executable, ctx);
    let present = match &resolved {
        Some(path) => path_present_async(path).await?,
        None => false,
    };
    let path = match resolved {
        Some(path) if present => path,
        resolved => {
            let shown = resolved
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| executable.to_string());
            // Uninstall scripts usually delete themselves.
            if ctx.phase.is_cleanup() && Path::new(&shown).is_absolute() {
                warn!("Script {} does not exist, nothing to run", shown);
                return Ok(ActionOutcome::AlreadyAbsent);
            }
            return Err(CskError::ActionFailed(format!(
                "Executable not found: {shown}"
            )));
        }
    };

    let launcher = if sudo { ctx.elevate().await? } else { Vec::new() };
    let workdir = match &ctx.staging_dir {
        Some(dir) if dir.is_dir() => Some(dir.clone()),
        _ => None,
    };

    let mut spec = CommandSpec::new(&path)
        .args(args)
        .launcher(&launcher)
        .cwd(workdir)
        .timeout(ctx.timeout);
    if let Some(dir) = &ctx.staging_dir {
        spec = spec.env("CSK_STAGING_DIR", dir.to_string_lossy());
    }
    if let Some(artifact) = &ctx.artifact {
        spec = spec.env("CSK_ARTIFACT", artifact.to_string_lossy());
    }

    info!("Running {}", spec.display());
    let output = run_command_async(&spec).await?;
    if output.status.success() {
        Ok(ActionOutcome::Completed)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(CskError::ActionFailed(format!(
            "{} exited with {}{}",
            path.display(),
            output.status,
            if stderr.is_empty() {
                String::new()
            } else {
                format!(": {stderr}")
            }
        )))
    }
}

/// Combines per-item errors: one error passes through, several are joined.
fn collect_errors(errors: Vec<CskError>) -> Option<CskError> {
    match errors.len() {
        0 => None,
        1 => errors.into_iter().next(),
        _ => Some(CskError::ActionFailed(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )),
    }
}

async fn unregister_services(labels: &[String], ctx: &ExecutionContext) -> ActionResult {
    let mut removals = Vec::new();
    let mut errors = Vec::new();
    for label in labels {
        match unregister_service(label, ctx).await {
            Ok(mut r) => removals.append(&mut r),
            Err(e) => {
                warn!("Failed to unregister service {}: {}", label, e);
                errors.push(e);
            }
        }
    }
    match collect_errors(errors) {
        Some(e) => Err(e),
        None => Ok(ActionOutcome::from_removals(removals)),
    }
}

async fn unregister_service(label: &str, ctx: &ExecutionContext) -> Result<Vec<Removal>> {
    let plist = format!("{label}.plist");
    let mut removals = Vec::new();

    removals.push(
        remove_launchd_service_async(&ctx.tools.launchctl, label, &[], ctx.timeout).await?,
    );
    let user_plist = ctx.home.join("Library/LaunchAgents").join(&plist);
    removals.push(remove_path_async(&user_plist).await?);

    let mut system_plists = Vec::new();
    for dir in ["/Library/LaunchAgents", "/Library/LaunchDaemons"] {
        let candidate = ctx.system_path(dir).join(&plist);
        if path_present_async(&candidate).await? {
            system_plists.push(candidate);
        }
    }
    // The plist may already be gone while the daemon is still loaded.
    let system_loaded = launchd_service_loaded_async(
        &ctx.tools.launchctl,
        &format!("system/{label}"),
        ctx.timeout,
    )
    .await?;
    if system_loaded || !system_plists.is_empty() {
        let launcher = ctx.elevate().await?;
        removals.push(
            remove_launchd_service_async(&ctx.tools.launchctl, label, &launcher, ctx.timeout)
                .await?,
        );
        for path in system_plists {
            removals.push(remove_path_elevated_async(&path, &launcher, ctx.timeout).await?);
        }
    }
    Ok(removals)
}

async fn remove_kernel_extension(kext_id: &str, ctx: &ExecutionContext) -> ActionResult {
    let loaded = kext_loaded_async(&ctx.tools.kextstat, kext_id, ctx.timeout).await?;
    let bundles = find_kext_bundles_async(&ctx.tools.kextfind, kext_id, ctx.timeout).await?;
    if !loaded && bundles.is_empty() {
        debug!("Kernel extension {} is neither loaded nor installed", kext_id);
        return Ok(ActionOutcome::AlreadyAbsent);
    }

    let launcher = ctx.elevate().await?;
    let mut removals = Vec::new();
    if loaded {
        removals.push(
            unload_kext_async(&ctx.tools.kextunload, kext_id, &launcher, ctx.timeout).await?,
        );
    }
    let mut errors = Vec::new();
    for bundle in bundles {
        match remove_path_elevated_async(&bundle, &launcher, ctx.timeout).await {
            Ok(r) => removals.push(r),
            Err(e) => errors.push(e),
        }
    }
    match collect_errors(errors) {
        Some(e) => Err(e),
        None => Ok(ActionOutcome::from_removals(removals)),
    }
}

async fn delete_path(raw: &str, ctx: &ExecutionContext) -> ActionResult {
    let path = ctx.expand_home(raw);
    let removal = match remove_path_async(&path).await {
        Ok(removal) => removal,
        Err(e) if e.is_permission_denied() => {
            warn!(
                "Direct removal of {} failed (Permission Denied), retrying elevated",
                path.display()
            );
            let launcher = ctx.elevate().await?;
            remove_path_elevated_async(&path, &launcher, ctx.timeout).await?
        }
        Err(e) => return Err(e),
    };
    Ok(ActionOutcome::from_removals([removal]))
}

async fn forget_receipts(ids: &[String], ctx: &ExecutionContext) -> ActionResult {
    let mut present = Vec::new();
    for id in ids {
        if receipt_present_async(&ctx.tools.pkgutil, id, ctx.timeout).await? {
            present.push(id);
        } else {
            debug!("No receipt for {}, nothing to forget", id);
        }
    }
    if present.is_empty() {
        return Ok(ActionOutcome::AlreadyAbsent);
    }

    let launcher = ctx.elevate().await?;
    let mut removals = Vec::new();
    let mut errors = Vec::new();
    for id in present {
        match forget_receipt_async(&ctx.tools.pkgutil, id, &launcher, ctx.timeout).await {
            Ok(r) => removals.push(r),
            Err(e) => errors.push(e),
        }
    }
    match collect_errors(errors) {
        Some(e) => Err(e),
        None => Ok(ActionOutcome::from_removals(removals)),
    }
}
