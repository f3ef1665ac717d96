// csk-core/src/privilege.rs
use std::path::PathBuf;

use async_trait::async_trait;
use csk_aio::is_root;
use csk_common::error::{CskError, Result};
use tracing::{debug, warn};

/// Proof of granted elevation: the prefix elevated commands are launched
/// through (`sudo -n --`, or nothing when already root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedHandle {
    launcher: Vec<String>,
}

impl ElevatedHandle {
    pub fn new(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &[String] {
        &self.launcher
    }
}

/// Privilege collaborator. `acquire` may prompt; `release` must not fail.
#[async_trait]
pub trait PrivilegeElevator: Send + Sync {
    async fn acquire(&self) -> Result<ElevatedHandle>;
    async fn release(&self, handle: ElevatedHandle);
}

/// Elevation through `sudo`: `sudo -v` to authenticate, `sudo -n` per
/// command, `sudo -k` on release.
#[derive(Debug, Clone)]
pub struct SudoElevator {
    sudo: PathBuf,
}

impl Default for SudoElevator {
    fn default() -> Self {
        Self {
            sudo: PathBuf::from("/usr/bin/sudo"),
        }
    }
}

impl SudoElevator {
    pub fn new(sudo: impl Into<PathBuf>) -> Self {
        Self { sudo: sudo.into() }
    }
}

#[async_trait]
impl PrivilegeElevator for SudoElevator {
    async fn acquire(&self) -> Result<ElevatedHandle> {
        if is_root() {
            debug!("Already running as root, no sudo needed");
            return Ok(ElevatedHandle::new(Vec::new()));
        }
        debug!("Requesting sudo credentials");
        // Inherits the terminal so the password prompt reaches the user.
        let status = tokio::process::Command::new(&self.sudo)
            .arg("-v")
            .status()
            .await
            .map_err(|e| {
                CskError::PrivilegeDenied(format!("failed to run {}: {e}", self.sudo.display()))
            })?;
        if !status.success() {
            return Err(CskError::PrivilegeDenied(format!(
                "sudo authentication failed ({status})"
            )));
        }
        Ok(ElevatedHandle::new(vec![
            self.sudo.to_string_lossy().into_owned(),
            "-n".to_string(),
            "--".to_string(),
        ]))
    }

    async fn release(&self, handle: ElevatedHandle) {
        if handle.launcher().is_empty() {
            return;
        }
        match tokio::process::Command::new(&self.sudo)
            .arg("-k")
            .status()
            .await
        {
            Ok(status) if status.success() => debug!("Dropped cached sudo credentials"),
            Ok(status) => warn!("sudo -k exited with {}", status),
            Err(e) => warn!("Failed to run sudo -k: {}", e),
        }
    }
}

/// For processes that already run as root.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootElevator;

#[async_trait]
impl PrivilegeElevator for RootElevator {
    async fn acquire(&self) -> Result<ElevatedHandle> {
        Ok(ElevatedHandle::new(Vec::new()))
    }

    async fn release(&self, _handle: ElevatedHandle) {}
}

/// Refuses every request (`--no-sudo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedElevator;

#[async_trait]
impl PrivilegeElevator for DeniedElevator {
    async fn acquire(&self) -> Result<ElevatedHandle> {
        Err(CskError::PrivilegeDenied(
            "elevation disabled (--no-sudo)".to_string(),
        ))
    }

    async fn release(&self, _handle: ElevatedHandle) {}
}

/// Picks the elevator matching the process and the user's wishes.
pub fn default_elevator(allow_sudo: bool) -> std::sync::Arc<dyn PrivilegeElevator> {
    if is_root() {
        std::sync::Arc::new(RootElevator)
    } else if allow_sudo {
        std::sync::Arc::new(SudoElevator::default())
    } else {
        std::sync::Arc::new(DeniedElevator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_denied_elevator_refuses() {
        let err = DeniedElevator.acquire().await.unwrap_err();
        assert!(matches!(err, CskError::PrivilegeDenied(_)));
    }

    #[tokio::test]
    async fn test_root_elevator_has_empty_launcher() {
        let handle = RootElevator.acquire().await.unwrap();
        assert!(handle.launcher().is_empty());
        RootElevator.release(handle).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sudo_elevator_failing_auth_is_denied() {
        if is_root() {
            return;
        }
        let elevator = SudoElevator::new("/bin/false");
        let err = elevator.acquire().await.unwrap_err();
        assert!(matches!(err, CskError::PrivilegeDenied(ref m) if m.contains("authentication")));

        let missing = SudoElevator::new("/nonexistent/sudo");
        assert!(matches!(
            missing.acquire().await.unwrap_err(),
            CskError::PrivilegeDenied(_)
        ));
    }
}
