//! Packaging of a fixture directory into a build context archive.

use std::io;
use std::path::Path;

use tar::Builder;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StateError, StateResult};

/// Tar every file below `root`, using paths relative to `root`.
///
/// Directories are not added as entries of their own; the daemon recreates
/// them from the file paths.
pub fn tar_directory(root: &Path) -> StateResult<Vec<u8>> {
    tar_files(root).map_err(|source| StateError::ArchiveError {
        path: root.to_path_buf(),
        source,
    })
}

fn tar_files(root: &Path) -> io::Result<Vec<u8>> {
    let meta = std::fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "build context is not a directory",
        ));
    }

    let mut builder = Builder::new(Vec::new());
    let mut count = 0usize;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        builder.append_path_with_name(entry.path(), rel)?;
        count += 1;
    }

    let data = builder.into_inner()?;
    debug!("Archived {} files from {} ({} bytes)", count, root.display(), data.len());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;

    #[test]
    fn test_archive_uses_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM mongo:3.0\n").unwrap();
        fs::create_dir(dir.path().join("seed")).unwrap();
        fs::write(dir.path().join("seed").join("users.json"), "[]").unwrap();

        let data = tar_directory(dir.path()).unwrap();
        let mut archive = tar::Archive::new(data.as_slice());

        let mut entries = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.push((path, content));
        }

        assert_eq!(
            entries,
            vec![
                ("Dockerfile".to_string(), "FROM mongo:3.0\n".to_string()),
                ("seed/users.json".to_string(), "[]".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_directory_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        match tar_directory(&missing) {
            Err(StateError::ArchiveError { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("Expected ArchiveError, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_file_is_not_a_context() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Dockerfile");
        fs::write(&file, "FROM scratch\n").unwrap();

        assert!(matches!(
            tar_directory(&file),
            Err(StateError::ArchiveError { .. })
        ));
    }
}
