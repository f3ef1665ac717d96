// csk-common/src/cache.rs
// Holds downloaded artifacts between runs. Entries are only ever written
// after verification; callers re-verify before reuse.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::error::{CskError, Result};
use crate::Config;

pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    /// Create a new Cache using the config's cache_dir
    pub fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self { cache_dir })
    }

    /// Location of a cached artifact.
    pub fn artifact_path(&self, identifier: &str, version: &str, file_name: &str) -> PathBuf {
        self.cache_dir.join(identifier).join(version).join(file_name)
    }

    /// Loads a cached artifact, `None` when there is no entry.
    pub fn load_artifact(
        &self,
        identifier: &str,
        version: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.artifact_path(identifier, version, file_name);
        tracing::debug!("Looking up cached artifact: {}", path.display());
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CskError::Cache(format!(
                "Failed to read cached artifact {}: {e}",
                path.display()
            ))),
        }
    }

    /// Stores verified artifact bytes, replacing any previous entry atomically.
    pub fn store_artifact(
        &self,
        identifier: &str,
        version: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.artifact_path(identifier, version, file_name);
        let parent = path
            .parent()
            .ok_or_else(|| CskError::Cache(format!("Invalid cache path {}", path.display())))?;
        fs::create_dir_all(parent)?;

        let temp_path = parent.join(format!(".{file_name}.download"));
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            CskError::Cache(format!(
                "Failed to move {} into place at {}: {e}",
                temp_path.display(),
                path.display()
            ))
        })?;
        tracing::debug!("Cached artifact at {}", path.display());
        Ok(path)
    }

    /// Drops a cache entry; a missing entry is not an error.
    pub fn evict_artifact(&self, identifier: &str, version: &str, file_name: &str) -> Result<()> {
        let path = self.artifact_path(identifier, version, file_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Evicted cached artifact {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_evict() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        let cache = Cache::new(&config).unwrap();

        assert!(cache.load_artifact("demo", "1.0", "demo.pkg").unwrap().is_none());

        let path = cache.store_artifact("demo", "1.0", "demo.pkg", b"payload").unwrap();
        assert!(path.ends_with("demo/1.0/demo.pkg"));
        assert!(!path.with_file_name(".demo.pkg.download").exists());
        assert_eq!(
            cache.load_artifact("demo", "1.0", "demo.pkg").unwrap().as_deref(),
            Some(&b"payload"[..])
        );

        cache.evict_artifact("demo", "1.0", "demo.pkg").unwrap();
        cache.evict_artifact("demo", "1.0", "demo.pkg").unwrap();
        assert!(cache.load_artifact("demo", "1.0", "demo.pkg").unwrap().is_none());
    }
}
