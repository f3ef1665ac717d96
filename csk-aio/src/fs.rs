// csk-aio/src/fs.rs
use std::path::Path;

use csk_common::error::{CskError, Result};
use tokio::fs;
use tracing::{debug, error};

/// What a removal found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyAbsent,
}

/// True if something (file, directory or dangling symlink) exists at `path`.
pub async fn path_present_async(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Rejects paths containing `.` or `..` segments.
pub(crate) fn ensure_normalised(path: &Path) -> Result<()> {
    // `Path::components` normalises `dir/.` to `dir`, so check the raw text.
    if path
        .to_string_lossy()
        .split('/')
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(CskError::ValidationError(format!(
            "Refusing to remove non-normalised path {}",
            path.display()
        )));
    }
    Ok(())
}

/// Removes a file, symlink or directory tree without following symlinks.
///
/// A missing path is `AlreadyAbsent`; every other failure (permission
/// denied included) is returned so the caller can decide how to escalate.
/// Paths with `.` or `..` segments are refused outright.
pub async fn remove_path_async(path: &Path) -> Result<Removal> {
    ensure_normalised(path)?;
    let metadata = match fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Async Path not found (already removed?): {}", path.display());
            return Ok(Removal::AlreadyAbsent);
        }
        Err(e) => return Err(e.into()),
    };

    let file_type = metadata.file_type();
    // A directory is only a "real" directory if it's not a symlink.
    let is_real_dir = file_type.is_dir();
    let path_type = if is_real_dir {
        "directory"
    } else if file_type.is_symlink() {
        "symlink"
    } else {
        "file"
    };
    debug!("Async Removing {} at: {}", path_type, path.display());

    let result = if is_real_dir {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match result {
        Ok(()) => {
            debug!("Async Successfully removed {}: {}", path_type, path.display());
            Ok(Removal::Removed)
        }
        // Raced with another remover.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Removal::AlreadyAbsent),
        Err(e) => {
            error!("Async Failed to remove {} {}: {}", path_type, path.display(), e);
            Err(CskError::from(e))
        }
    }
}

/// Writes `bytes` to `path` with non-executable permissions, creating parents.
pub async fn write_artifact_async(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_file_dir_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        let tree = dir.path().join("tree");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(tree.join("nested/deeper")).unwrap();
        std::fs::write(tree.join("nested/deeper/f"), b"y").unwrap();

        assert_eq!(remove_path_async(&file).await.unwrap(), Removal::Removed);
        assert_eq!(remove_path_async(&tree).await.unwrap(), Removal::Removed);
        assert!(!tree.exists());
        assert_eq!(remove_path_async(&file).await.unwrap(), Removal::AlreadyAbsent);
        assert!(!path_present_async(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_dot_segments_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("keep"), b"k").unwrap();

        for raw in [format!("{}/.", tree.display()), format!("{}/sub/..", tree.display())] {
            let err = remove_path_async(Path::new(&raw)).await.unwrap_err();
            assert!(matches!(err, CskError::ValidationError(_)));
        }
        assert!(tree.join("keep").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_to_dir_removes_link_only() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"k").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_eq!(remove_path_async(&link).await.unwrap(), Removal::Removed);
        assert!(target.join("keep").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_artifact_is_not_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage/demo.pkg");
        write_artifact_async(&path, b"payload").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }
}
