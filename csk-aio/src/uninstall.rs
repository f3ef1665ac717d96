// csk-aio/src/uninstall.rs
// Host cleanup primitives (launchd, kernel extensions, package receipts).
// Each takes the tool path and an optional launcher prefix so callers decide
// about privilege; "target already gone" is reported as `AlreadyAbsent`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use csk_common::error::{CskError, Result};
use tracing::{debug, warn};

use crate::fs::{ensure_normalised, path_present_async, Removal};
use crate::process::{run_command_async, stderr_of, CommandSpec};

const LAUNCHD_ABSENT_MARKERS: &[&str] = &[
    "Could not find specified service",
    "No such process",
    "service not loaded",
    "not find service",
];
// launchctl reports ESRCH (3) or "service not found" (113) for unknown labels.
const LAUNCHD_ABSENT_CODES: &[i32] = &[3, 113];

const KEXT_ABSENT_MARKERS: &[&str] = &["not found", "not loaded", "No kernel extension", "no such"];

const RECEIPT_ABSENT_MARKERS: &[&str] = &["No receipt for"];

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_ascii_lowercase()))
}

/// `launchctl remove <label>`.
pub async fn remove_launchd_service_async(
    launchctl: &Path,
    label: &str,
    launcher: &[String],
    timeout: Option<Duration>,
) -> Result<Removal> {
    debug!("Async Removing launchd service (if loaded): {}", label);
    let spec = CommandSpec::new(launchctl)
        .arg("remove")
        .arg(label)
        .launcher(launcher)
        .timeout(timeout);
    let output = run_command_async(&spec).await?;
    if output.status.success() {
        debug!("Async Successfully removed launchd service {}", label);
        return Ok(Removal::Removed);
    }
    let stderr = stderr_of(&output);
    let code = output.status.code();
    if matches_any(&stderr, LAUNCHD_ABSENT_MARKERS)
        || code.is_some_and(|c| LAUNCHD_ABSENT_CODES.contains(&c))
    {
        debug!("Async Launchd service {} already unloaded or not found.", label);
        Ok(Removal::AlreadyAbsent)
    } else {
        Err(CskError::ActionFailed(format!(
            "launchctl remove {label} failed ({}): {stderr}",
            output.status
        )))
    }
}

/// Whether `target` (e.g. `system/<label>`) is loaded, via `launchctl print`.
///
/// `print` needs no privileges, so callers can decide whether elevation is
/// worth asking for.
pub async fn launchd_service_loaded_async(
    launchctl: &Path,
    target: &str,
    timeout: Option<Duration>,
) -> Result<bool> {
    let spec = CommandSpec::new(launchctl)
        .arg("print")
        .arg(target)
        .timeout(timeout);
    let output = run_command_async(&spec).await?;
    debug!(
        "Async launchctl print {} exited with {}",
        target, output.status
    );
    Ok(output.status.success())
}

/// Whether `kext_id` is currently loaded, via `kextstat -l -b <id>`.
///
/// When `kextstat` is unavailable or fails the answer is unknown and `true`
/// is returned, so the caller still attempts the unload.
pub async fn kext_loaded_async(
    kextstat: &Path,
    kext_id: &str,
    timeout: Option<Duration>,
) -> Result<bool> {
    let spec = CommandSpec::new(kextstat)
        .arg("-l")
        .arg("-b")
        .arg(kext_id)
        .timeout(timeout);
    let output = match run_command_async(&spec).await {
        Ok(output) => output,
        Err(e) if e.is_not_found() => {
            warn!(
                "{} not available, assuming {} may be loaded",
                kextstat.display(),
                kext_id
            );
            return Ok(true);
        }
        Err(e) => return Err(e),
    };
    if !output.status.success() {
        warn!(
            "kextstat -b {} failed ({}), assuming it may be loaded",
            kext_id, output.status
        );
        return Ok(true);
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.split_whitespace().any(|word| word == kext_id)))
}

/// Whether a package receipt exists, via `pkgutil --pkg-info <id>`.
///
/// Only an explicit "No receipt for" answer counts as absent.
pub async fn receipt_present_async(
    pkgutil: &Path,
    id: &str,
    timeout: Option<Duration>,
) -> Result<bool> {
    let spec = CommandSpec::new(pkgutil)
        .arg("--pkg-info")
        .arg(id)
        .timeout(timeout);
    let output = run_command_async(&spec).await?;
    if output.status.success() {
        return Ok(true);
    }
    Ok(!matches_any(&stderr_of(&output), RECEIPT_ABSENT_MARKERS))
}

/// `kextunload -b <id>`.
pub async fn unload_kext_async(
    kextunload: &Path,
    kext_id: &str,
    launcher: &[String],
    timeout: Option<Duration>,
) -> Result<Removal> {
    debug!("Async Unloading kernel extension: {}", kext_id);
    let spec = CommandSpec::new(kextunload)
        .arg("-b")
        .arg(kext_id)
        .launcher(launcher)
        .timeout(timeout);
    let output = run_command_async(&spec).await?;
    if output.status.success() {
        return Ok(Removal::Removed);
    }
    let stderr = stderr_of(&output);
    if matches_any(&stderr, KEXT_ABSENT_MARKERS) {
        debug!("Async Kernel extension {} not loaded.", kext_id);
        Ok(Removal::AlreadyAbsent)
    } else {
        Err(CskError::ActionFailed(format!(
            "kextunload -b {kext_id} failed ({}): {stderr}",
            output.status
        )))
    }
}

/// Bundle paths for `kext_id` as reported by `kextfind -b <id>`.
///
/// A missing `kextfind` yields no paths; the unload already happened.
pub async fn find_kext_bundles_async(
    kextfind: &Path,
    kext_id: &str,
    timeout: Option<Duration>,
) -> Result<Vec<PathBuf>> {
    let spec = CommandSpec::new(kextfind)
        .arg("-b")
        .arg(kext_id)
        .timeout(timeout);
    let output = match run_command_async(&spec).await {
        Ok(output) => output,
        Err(e) if e.is_not_found() => {
            warn!(
                "{} not available, cannot locate bundles for {}",
                kextfind.display(),
                kext_id
            );
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    let paths = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('/') && l.ends_with(".kext"))
        .map(PathBuf::from)
        .collect();
    Ok(paths)
}

/// `pkgutil --forget <id>`.
pub async fn forget_receipt_async(
    pkgutil: &Path,
    id: &str,
    launcher: &[String],
    timeout: Option<Duration>,
) -> Result<Removal> {
    debug!("Async Forgetting package receipt: {}", id);
    let spec = CommandSpec::new(pkgutil)
        .arg("--forget")
        .arg(id)
        .launcher(launcher)
        .timeout(timeout);
    let output = run_command_async(&spec).await?;
    if output.status.success() {
        return Ok(Removal::Removed);
    }
    let stderr = stderr_of(&output);
    if matches_any(&stderr, RECEIPT_ABSENT_MARKERS) {
        debug!("Async Package receipt {} already forgotten or never existed.", id);
        Ok(Removal::AlreadyAbsent)
    } else {
        Err(CskError::ActionFailed(format!(
            "pkgutil --forget {id} failed ({}): {stderr}",
            output.status
        )))
    }
}

/// `rm -rf` through the launcher, for paths the current user cannot remove.
pub async fn remove_path_elevated_async(
    path: &Path,
    launcher: &[String],
    timeout: Option<Duration>,
) -> Result<Removal> {
    ensure_normalised(path)?;
    if !path_present_async(path).await? {
        return Ok(Removal::AlreadyAbsent);
    }
    let spec = CommandSpec::new("/bin/rm")
        .arg("-rf")
        .arg("--")
        .arg(path)
        .launcher(launcher)
        .timeout(timeout);
    let output = run_command_async(&spec).await?;
    if output.status.success() {
        debug!("Async Successfully removed {} with elevation.", path.display());
        Ok(Removal::Removed)
    } else {
        Err(CskError::ActionFailed(format!(
            "rm -rf {} failed ({}): {}",
            path.display(),
            output.status,
            stderr_of(&output)
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_launchd_classification() {
        let dir = tempfile::tempdir().unwrap();
        let ok = fake_tool(dir.path(), "ok", "exit 0");
        let absent = fake_tool(
            dir.path(),
            "absent",
            "echo 'Could not find specified service' >&2; exit 1",
        );
        let esrch = fake_tool(dir.path(), "esrch", "exit 3");
        let broken = fake_tool(dir.path(), "broken", "echo 'Operation not permitted' >&2; exit 1");

        assert_eq!(
            remove_launchd_service_async(&ok, "com.example.d", &[], None).await.unwrap(),
            Removal::Removed
        );
        assert_eq!(
            remove_launchd_service_async(&absent, "com.example.d", &[], None).await.unwrap(),
            Removal::AlreadyAbsent
        );
        assert_eq!(
            remove_launchd_service_async(&esrch, "com.example.d", &[], None).await.unwrap(),
            Removal::AlreadyAbsent
        );
        let err = remove_launchd_service_async(&broken, "com.example.d", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CskError::ActionFailed(ref m) if m.contains("Operation not permitted")));
    }

    #[tokio::test]
    async fn test_kext_and_receipt_classification() {
        let dir = tempfile::tempdir().unwrap();
        let not_loaded = fake_tool(
            dir.path(),
            "kextunload",
            "echo '(kernel) Kext com.example.K not found for unload request.' >&2; exit 1",
        );
        assert_eq!(
            unload_kext_async(&not_loaded, "com.example.K", &[], None).await.unwrap(),
            Removal::AlreadyAbsent
        );

        let no_receipt = fake_tool(
            dir.path(),
            "pkgutil",
            "echo 'No receipt for com.example.pkg found at /.' >&2; exit 1",
        );
        assert_eq!(
            forget_receipt_async(&no_receipt, "com.example.pkg", &[], None).await.unwrap(),
            Removal::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_find_kext_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let kextfind = fake_tool(
            dir.path(),
            "kextfind",
            "echo /Library/Extensions/CUDA.kext; echo garbage; echo /System/Library/Extensions/Other.kext",
        );
        let found = find_kext_bundles_async(&kextfind, "com.nvidia.CUDA", None).await.unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("/Library/Extensions/CUDA.kext"),
                PathBuf::from("/System/Library/Extensions/Other.kext"),
            ]
        );

        let missing = dir.path().join("no-kextfind");
        assert!(find_kext_bundles_async(&missing, "x", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_path_elevated_with_passthrough_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("victim");
        std::fs::create_dir_all(target.join("inner")).unwrap();
        let launcher = vec!["/usr/bin/env".to_string()];
        assert_eq!(
            remove_path_elevated_async(&target, &launcher, None).await.unwrap(),
            Removal::Removed
        );
        assert!(!target.exists());
        assert_eq!(
            remove_path_elevated_async(&target, &launcher, None).await.unwrap(),
            Removal::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_presence_probes() {
        let dir = tempfile::tempdir().unwrap();
        let launchctl = fake_tool(
            dir.path(),
            "launchctl",
            "[ \"$2\" = system/com.example.loaded ] && exit 0\nexit 113",
        );
        assert!(launchd_service_loaded_async(&launchctl, "system/com.example.loaded", None)
            .await
            .unwrap());
        assert!(!launchd_service_loaded_async(&launchctl, "system/com.example.gone", None)
            .await
            .unwrap());

        let kextstat = fake_tool(
            dir.path(),
            "kextstat",
            "echo 'Executing: /usr/bin/kmutil showloaded' >&2\n[ \"$3\" = com.example.K ] && echo '  171    0 0xffffff7f 0x1000 0x1000 com.example.K (1.0) <5 4 3>'\nexit 0",
        );
        assert!(kext_loaded_async(&kextstat, "com.example.K", None).await.unwrap());
        assert!(!kext_loaded_async(&kextstat, "com.example.Other", None).await.unwrap());
        let missing = dir.path().join("no-kextstat");
        assert!(kext_loaded_async(&missing, "com.example.K", None).await.unwrap());

        let pkgutil = fake_tool(
            dir.path(),
            "pkgutil",
            "case \"$2\" in\n  known.pkg) echo \"package-id: $2\";;\n  broken.pkg) echo 'Operation not permitted' >&2; exit 1;;\n  *) echo \"No receipt for '$2' found at '/'.\" >&2; exit 1;;\nesac",
        );
        assert!(receipt_present_async(&pkgutil, "known.pkg", None).await.unwrap());
        assert!(!receipt_present_async(&pkgutil, "gone.pkg", None).await.unwrap());
        assert!(receipt_present_async(&pkgutil, "broken.pkg", None).await.unwrap());
    }
}
