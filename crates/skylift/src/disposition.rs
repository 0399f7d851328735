//! Post-upload file disposition: delete the source file, or move it to
//! the data source's archive folder preserving its basename.
//!
//! Disposition runs after the job row is already terminal; a failure
//! here is logged and never reverts a succeeded upload.

use std::path::{Path, PathBuf};

use crate::error::DispositionError;

/// Relocates `src` to `dst`. A same-filesystem archive needs only a
/// rename; when the archive folder sits on another device the rename
/// fails and the contents are carried over by copy, with the original
/// removed once the copy is complete. A partially written destination
/// is cleaned up rather than left behind.
fn relocate(src: &Path, dst: &Path) -> Result<(), DispositionError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let carried = std::fs::copy(src, dst).and_then(|_| std::fs::remove_file(src));
    match carried {
        Ok(()) => Ok(()),
        Err(e) => {
            if dst.exists() && src.exists() {
                let _ = std::fs::remove_file(dst);
            }
            Err(DispositionError::MoveFile {
                from: src.to_path_buf(),
                to: dst.to_path_buf(),
                source: e,
            })
        }
    }
}

/// Deletes the uploaded source file.
pub fn delete_file(path: &Path) -> Result<(), DispositionError> {
    std::fs::remove_file(path).map_err(|e| DispositionError::Delete {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Moves the uploaded source file into the archive folder, creating it
/// when absent. A prior archived file of the same name is overwritten.
pub fn archive_file(path: &Path, archive_dir: &Path) -> Result<PathBuf, DispositionError> {
    if !archive_dir.exists() {
        std::fs::create_dir_all(archive_dir).map_err(|e| DispositionError::CreateDirectory {
            path: archive_dir.to_path_buf(),
            source: e,
        })?;
    }

    let basename = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "upload".into());
    let target = archive_dir.join(basename);
    relocate(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_delete_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        delete_file(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_delete_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let result = delete_file(&temp.path().join("ghost.txt"));
        assert!(matches!(result, Err(DispositionError::Delete { .. })));
    }

    #[test]
    fn test_archive_moves_preserving_basename() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("report.csv");
        std::fs::write(&file, b"rows").unwrap();
        let archive = temp.path().join("archive");

        let target = archive_file(&file, &archive).unwrap();

        assert!(!file.exists());
        assert_eq!(target, archive.join("report.csv"));
        assert_eq!(std::fs::read(&target).unwrap(), b"rows");
    }

    #[test]
    fn test_archive_overwrites_prior_file() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::write(archive.join("a.txt"), b"old").unwrap();

        let file = temp.path().join("a.txt");
        std::fs::write(&file, b"new").unwrap();

        archive_file(&file, &archive).unwrap();
        assert_eq!(std::fs::read(archive.join("a.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_archive_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let nested = temp.path().join("deep/nested/archive");
        archive_file(&file, &nested).unwrap();
        assert!(nested.join("a.txt").exists());
    }
}
