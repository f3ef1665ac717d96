// csk-aio/src/process.rs
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output as StdOutput, Stdio};
use std::time::Duration;

use csk_common::error::{CskError, Result};
use tokio::process::Command;
use tracing::{debug, error};

/// A command line to run, optionally behind a launcher prefix such as
/// `sudo -n --`.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub launcher: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn launcher(mut self, launcher: &[String]) -> Self {
        self.launcher = launcher.to_vec();
        self
    }

    pub fn cwd(mut self, dir: Option<PathBuf>) -> Self {
        self.cwd = dir;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human readable command line, launcher included.
    pub fn display(&self) -> String {
        self.launcher
            .iter()
            .cloned()
            .chain(std::iter::once(self.program.to_string_lossy().into_owned()))
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn build(&self) -> Command {
        let mut cmd = match self.launcher.split_first() {
            Some((first, rest)) => {
                let mut cmd = Command::new(first);
                cmd.args(rest);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args(&self.args);
        cmd.kill_on_drop(true); // Ensure process is killed if the command handle is dropped
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.envs);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null()); // Prevent hanging on stdin
        cmd
    }
}

/// Runs a command and captures its output.
///
/// A non-zero exit is returned as a normal `Output`; only spawn failures and
/// timeouts are errors. On timeout the child is killed.
pub async fn run_command_async(spec: &CommandSpec) -> Result<StdOutput> {
    debug!(
        "Async Running command: {} (cwd: {:?}, envs: {:?}, timeout: {:?})",
        spec.display(),
        spec.cwd,
        spec.envs.keys().collect::<Vec<_>>(), // Log only keys for envs
        spec.timeout
    );

    let mut cmd = spec.build();
    let output_fut = cmd.output();
    let result = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, output_fut).await {
            Ok(res) => res,
            Err(_) => {
                error!("Command timed out after {:?}: {}", limit, spec.display());
                return Err(CskError::ActionTimeout(spec.display(), limit));
            }
        },
        None => output_fut.await,
    };

    match result {
        Ok(output) => {
            if !output.status.success() {
                debug!("Async Command failed with status: {}", output.status);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.trim().is_empty() {
                    debug!("Stdout:\n{}", stdout.trim());
                }
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            } else {
                debug!("Async Command finished successfully.");
            }
            Ok(output)
        }
        Err(e) => {
            error!("Async Failed to execute command {}: {}", spec.display(), e);
            Err(CskError::from(e))
        }
    }
}

/// Trimmed, lossy stderr of a finished command.
pub fn stderr_of(output: &StdOutput) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// True when the current process already runs as root.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_output_and_status() {
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let output = run_command_async(&spec).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(stderr_of(&output), "err");
    }

    #[tokio::test]
    async fn test_launcher_prefix_and_env() {
        // `env` as launcher: runs the real program with the given environment.
        let spec = CommandSpec::new("/bin/sh")
            .launcher(&["/usr/bin/env".to_string(), "CSK_VIA_LAUNCHER=1".to_string()])
            .arg("-c")
            .arg("echo $CSK_VIA_LAUNCHER-$CSK_DIRECT")
            .env("CSK_DIRECT", "2");
        assert!(spec.display().starts_with("/usr/bin/env CSK_VIA_LAUNCHER=1 /bin/sh"));
        let output = run_command_async(&spec).await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1-2");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .timeout(Some(Duration::from_millis(100)));
        let started = std::time::Instant::now();
        let err = run_command_async(&spec).await.unwrap_err();
        assert!(matches!(err, CskError::ActionTimeout(_, d) if d == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_not_found() {
        let spec = CommandSpec::new("/nonexistent/csk-test-binary");
        let err = run_command_async(&spec).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
