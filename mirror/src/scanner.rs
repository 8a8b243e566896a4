//! Recursive file listing for polled volume subtrees

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{MirrorError, Result};

/// Every regular file under `path`.
///
/// A directory is walked recursively, a single file yields itself and a
/// missing path yields nothing.
pub async fn list_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref().to_path_buf();

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MirrorError::scan_error(&path, format!("Failed to read metadata: {}", e))),
    };

    if metadata.is_file() {
        return Ok(vec![path]);
    }

    tokio::task::spawn_blocking(move || walk(&path))
        .await
        .map_err(|e| MirrorError::Generic(anyhow::anyhow!("Directory walk task failed: {}", e)))?
}

fn walk(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // entries removed while walking are not an error
            Err(e) if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) => continue,
            Err(e) => return Err(MirrorError::scan_error(root, format!("Walk error: {}", e))),
        };

        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
