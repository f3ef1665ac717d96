// csk-common/src/receipt.rs
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::Config;
use super::error::{CskError, Result};

/// Written after a successful install; removed after a clean uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub identifier: String,
    pub version: String,
    pub artifact: String,
    pub installed_at: DateTime<Utc>,
    /// Non-critical install actions that failed.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Reads and writes receipts under the state directory.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.receipts_dir(),
        }
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.json"))
    }

    pub fn load(&self, identifier: &str) -> Result<Option<InstallReceipt>> {
        let path = self.path_for(identifier);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record(&self, receipt: &InstallReceipt) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            CskError::IoError(format!(
                "Failed to create receipts directory {}: {e}",
                self.dir.display()
            ))
        })?;
        let path = self.path_for(&receipt.identifier);
        let file = fs::File::create(&path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, receipt)?;
        debug!("Recorded install receipt at {}", path.display());
        Ok(())
    }

    /// Removes the receipt; returns whether one existed.
    pub fn remove(&self, identifier: &str) -> Result<bool> {
        let path = self.path_for(identifier);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed install receipt {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(id: &str) -> InstallReceipt {
        InstallReceipt {
            identifier: id.to_string(),
            version: "1.0".to_string(),
            artifact: format!("{id}.pkg"),
            installed_at: Utc::now(),
            warnings: vec![],
        }
    }

    #[test]
    fn test_record_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(&Config::with_root(dir.path()));

        assert!(store.load("demo").unwrap().is_none());

        let r = receipt("demo");
        store.record(&r).unwrap();
        store.record(&receipt("alpha")).unwrap();
        assert_eq!(store.load("demo").unwrap(), Some(r));
        assert!(dir.path().join("state/receipts/alpha.json").is_file());

        assert!(store.remove("demo").unwrap());
        assert!(!store.remove("demo").unwrap());
    }
}
