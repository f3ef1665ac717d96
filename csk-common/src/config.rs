// csk-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::UserDirs;
use tracing::debug;

use super::error::{CskError, Result};

// Fallback when CSK_ROOT is not set or is empty.
const DEFAULT_FALLBACK_CSK_ROOT: &str = "/opt/csk";
const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Paths to the host tools the action executor shells out to.
///
/// Each one can be overridden through the environment, which is also how the
/// test-suite swaps in stand-in scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTools {
    pub launchctl: PathBuf,
    pub kextunload: PathBuf,
    pub kextfind: PathBuf,
    pub kextstat: PathBuf,
    pub pkgutil: PathBuf,
}

impl Default for SystemTools {
    fn default() -> Self {
        Self {
            launchctl: PathBuf::from("/bin/launchctl"),
            kextunload: PathBuf::from("/sbin/kextunload"),
            kextfind: PathBuf::from("/usr/sbin/kextfind"),
            kextstat: PathBuf::from("/usr/sbin/kextstat"),
            pkgutil: PathBuf::from("/usr/sbin/pkgutil"),
        }
    }
}

impl SystemTools {
    fn from_env() -> Self {
        let defaults = Self::default();
        let pick = |var: &str, fallback: PathBuf| {
            env::var(var)
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(fallback)
        };
        Self {
            launchctl: pick("CSK_LAUNCHCTL", defaults.launchctl),
            kextunload: pick("CSK_KEXTUNLOAD", defaults.kextunload),
            kextfind: pick("CSK_KEXTFIND", defaults.kextfind),
            kextstat: pick("CSK_KEXTSTAT", defaults.kextstat),
            pkgutil: pick("CSK_PKGUTIL", defaults.pkgutil),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub csk_root: PathBuf,
    pub manifests_dir: PathBuf,
    pub script_timeout: Duration,
    pub tools: SystemTools,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading csk configuration");

        let csk_root_str = env::var("CSK_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!(
                    "CSK_ROOT environment variable not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_CSK_ROOT
                );
                DEFAULT_FALLBACK_CSK_ROOT.to_string()
            });
        let csk_root = PathBuf::from(&csk_root_str);
        debug!("Effective CSK_ROOT set to: {}", csk_root.display());

        let manifests_dir = env::var("CSK_MANIFESTS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| csk_root.join("manifests"));

        let script_timeout = match env::var("CSK_SCRIPT_TIMEOUT") {
            Ok(raw) if !raw.trim().is_empty() => parse_timeout(&raw)?,
            _ => DEFAULT_SCRIPT_TIMEOUT,
        };

        debug!("Configuration loaded successfully.");
        Ok(Self {
            csk_root,
            manifests_dir,
            script_timeout,
            tools: SystemTools::from_env(),
        })
    }

    /// Configuration rooted at an explicit directory, ignoring the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let csk_root = root.into();
        Self {
            manifests_dir: csk_root.join("manifests"),
            csk_root,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            tools: SystemTools::default(),
        }
    }

    pub fn csk_root(&self) -> &Path {
        &self.csk_root
    }

    pub fn manifests_dir(&self) -> &Path {
        &self.manifests_dir
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.csk_root.join("cache")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.csk_root.join("staging")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.csk_root.join("state")
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.state_dir().join("receipts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.csk_root.join("logs")
    }

    pub fn staging_path(&self, identifier: &str, version_str: &str) -> PathBuf {
        self.staging_dir().join(identifier).join(version_str)
    }

    pub fn home_dir(&self) -> PathBuf {
        UserDirs::new().map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf())
    }

    /// Locates the manifest for `identifier`, preferring JSON over TOML.
    pub fn manifest_path(&self, identifier: &str) -> Option<PathBuf> {
        ["json", "toml"]
            .iter()
            .map(|ext| self.manifests_dir.join(format!("{identifier}.{ext}")))
            .find(|p| p.is_file())
    }
}

/// Parses a human readable timeout such as `90s` or `30m`.
pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let timeout = humantime::parse_duration(raw.trim())
        .map_err(|e| CskError::Config(format!("Invalid timeout '{raw}': {e}")))?;
    if timeout.is_zero() {
        return Err(CskError::Config(format!(
            "Invalid timeout '{raw}': must be greater than zero"
        )));
    }
    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_timeout(" 30m ").unwrap(), Duration::from_secs(1800));
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::with_root("/tmp/csk-root");
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/csk-root/cache"));
        assert_eq!(
            config.staging_path("cuda_toolkit", "8.0.61"),
            PathBuf::from("/tmp/csk-root/staging/cuda_toolkit/8.0.61")
        );
        assert_eq!(
            config.receipts_dir(),
            PathBuf::from("/tmp/csk-root/state/receipts")
        );
    }

    #[test]
    fn test_manifest_path_prefers_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        std::fs::create_dir_all(config.manifests_dir()).unwrap();
        assert!(config.manifest_path("foo").is_none());

        std::fs::write(config.manifests_dir().join("foo.toml"), "").unwrap();
        assert_eq!(
            config.manifest_path("foo").unwrap(),
            config.manifests_dir().join("foo.toml")
        );

        std::fs::write(config.manifests_dir().join("foo.json"), "{}").unwrap();
        assert_eq!(
            config.manifest_path("foo").unwrap(),
            config.manifests_dir().join("foo.json")
        );
    }
}
