//! Content fingerprints and the per-project fingerprint cache

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::error::{MirrorError, Result};

/// Hash used to fingerprint file contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    #[default]
    Sha256,
    /// Faster on large files
    Blake3,
}

/// Lowercase hex digest of a file's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streams files through the configured hash
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    algorithm: FingerprintAlgorithm,
    buffer_size: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(FingerprintAlgorithm::default())
    }
}

impl Fingerprinter {
    pub fn new(algorithm: FingerprintAlgorithm) -> Self {
        Self {
            algorithm,
            buffer_size: 64 * 1024, // 64KB
        }
    }

    pub fn algorithm(&self) -> FingerprintAlgorithm {
        self.algorithm
    }

    /// Fingerprint the full contents of `path`. Never cached here: the
    /// event-driven direction must see the bytes as they are now.
    pub async fn fingerprint(&self, path: impl AsRef<Path>) -> Result<Fingerprint> {
        let path = path.as_ref();
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| MirrorError::hash_error(path, e))?;
        let mut buffer = vec![0u8; self.buffer_size];

        match self.algorithm {
            FingerprintAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let bytes_read = file
                        .read(&mut buffer)
                        .await
                        .map_err(|e| MirrorError::hash_error(path, e))?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                }
                Ok(Fingerprint(format!("{:x}", hasher.finalize())))
            }
            FingerprintAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let bytes_read = file
                        .read(&mut buffer)
                        .await
                        .map_err(|e| MirrorError::hash_error(path, e))?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                }
                Ok(Fingerprint(hasher.finalize().to_hex().to_string()))
            }
        }
    }

    /// Whether two files hold identical bytes
    pub async fn same_content(&self, a: impl AsRef<Path>, b: impl AsRef<Path>) -> Result<bool> {
        let a = a.as_ref();
        let b = b.as_ref();

        // different sizes can never match; skip hashing
        if let (Ok(ma), Ok(mb)) = (fs::metadata(a).await, fs::metadata(b).await) {
            if ma.len() != mb.len() {
                return Ok(false);
            }
        }

        Ok(self.fingerprint(a).await? == self.fingerprint(b).await?)
    }
}

/// Last observed fingerprint per volume file. Grows for the lifetime of the
/// owning reverse engine; the polled subtrees bound its size.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<PathBuf, Fingerprint>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    /// True when `path` was never seen or last had a different fingerprint
    pub fn is_changed(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.entries.get(path) != Some(fingerprint)
    }

    pub fn record(&mut self, path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Option<Fingerprint> {
        self.entries.insert(path.into(), fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sha256_known_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hello.txt");
        fs::write(&path, b"hello world").await.unwrap();

        let fp = Fingerprinter::new(FingerprintAlgorithm::Sha256)
            .fingerprint(&path)
            .await
            .unwrap();
        assert_eq!(
            fp.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_fingerprint_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let path1 = temp_dir.path().join("file1.txt");
        let path2 = temp_dir.path().join("file2.txt");

        fs::write(&path1, b"same bytes").await.unwrap();
        fs::write(&path2, b"same bytes").await.unwrap();

        for algorithm in [FingerprintAlgorithm::Sha256, FingerprintAlgorithm::Blake3] {
            let fingerprinter = Fingerprinter::new(algorithm);
            let first = fingerprinter.fingerprint(&path1).await.unwrap();
            let again = fingerprinter.fingerprint(&path1).await.unwrap();
            let twin = fingerprinter.fingerprint(&path2).await.unwrap();
            assert_eq!(first, again);
            assert_eq!(first, twin);
        }
    }

    #[tokio::test]
    async fn test_different_content_differs() {
        let temp_dir = TempDir::new().unwrap();
        let path1 = temp_dir.path().join("file1.txt");
        let path2 = temp_dir.path().join("file2.txt");

        fs::write(&path1, b"hello world").await.unwrap();
        fs::write(&path2, b"hello rust!").await.unwrap();

        let fingerprinter = Fingerprinter::default();
        assert_ne!(
            fingerprinter.fingerprint(&path1).await.unwrap(),
            fingerprinter.fingerprint(&path2).await.unwrap()
        );
        assert!(!fingerprinter.same_content(&path1, &path2).await.unwrap());

        fs::write(&path2, b"hello world").await.unwrap();
        assert!(fingerprinter.same_content(&path1, &path2).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = Fingerprinter::default()
            .fingerprint(temp_dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cache_tracks_changes() {
        let mut cache = FingerprintCache::new();
        let path = Path::new("/volume/storage/logs/app.log");
        let a = Fingerprint("aa".to_string());
        let b = Fingerprint("bb".to_string());

        assert!(cache.is_changed(path, &a));
        assert!(cache.record(path, a.clone()).is_none());
        assert!(!cache.is_changed(path, &a));
        assert!(cache.is_changed(path, &b));
        assert_eq!(cache.record(path, b.clone()), Some(a));
        assert_eq!(cache.get(path), Some(&b));
        assert_eq!(cache.len(), 1);
    }
}
