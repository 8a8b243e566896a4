//! Volume -> host direction, driven by polling
//!
//! Each tick lists the project's watched volume subtrees, fingerprints every
//! file and copies back only the files whose fingerprint moved since the last
//! tick. Ticks for one engine never overlap: a tick that finds the previous
//! one still running is skipped.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use crate::effect::{Direction, EffectApplier, SyncEvent};
use crate::error::Result;
use crate::fingerprint::{FingerprintCache, Fingerprinter};
use crate::project::Project;
use crate::report::Reporter;
use crate::scanner::list_files;
use crate::translate::PathTranslator;

/// Result of one reverse tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed { applied: usize, failed: usize },
    /// The previous tick was still running
    Skipped,
}

pub struct ReverseEngine {
    project: Arc<Project>,
    translator: PathTranslator,
    fingerprinter: Fingerprinter,
    applier: EffectApplier,
    reporter: Arc<dyn Reporter>,
    cache: Mutex<FingerprintCache>,
}

impl ReverseEngine {
    pub fn new(
        project: Arc<Project>,
        translator: PathTranslator,
        fingerprinter: Fingerprinter,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            project,
            translator,
            fingerprinter,
            applier: EffectApplier::new(fingerprinter, translator),
            reporter,
            cache: Mutex::new(FingerprintCache::new()),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Whether this project has anything to poll
    pub fn is_active(&self) -> bool {
        !self.project.watched().is_empty()
    }

    /// Run one poll, unless one is already in flight
    #[instrument(skip(self), fields(project = %self.project.name()))]
    pub async fn tick(&self) -> TickOutcome {
        let Ok(mut cache) = self.cache.try_lock() else {
            debug!("Previous reverse tick still running");
            self.reporter.tick_skipped(self.project.name());
            return TickOutcome::Skipped;
        };

        let mut applied = 0;
        let mut failed = 0;

        for subtree in self.project.watched() {
            let root = self.project.watched_path(subtree);
            let files = match list_files(&root).await {
                Ok(files) => files,
                Err(e) => {
                    error!(subtree = %subtree, error = %e, "Failed to list watched subtree");
                    self.reporter.failure(self.project.name(), Direction::VolumeToHost, &e);
                    failed += 1;
                    continue;
                }
            };

            for file in files {
                match self.sync_file(&file, &mut cache).await {
                    Ok(true) => applied += 1,
                    Ok(false) => {}
                    Err(e) => {
                        // cache left untouched: the next tick retries this file
                        error!(path = %file.display(), error = %e, "Failed to mirror volume file");
                        self.reporter.failure(self.project.name(), Direction::VolumeToHost, &e);
                        failed += 1;
                    }
                }
            }
        }

        TickOutcome::Completed { applied, failed }
    }

    async fn sync_file(&self, file: &Path, cache: &mut FingerprintCache) -> Result<bool> {
        let fingerprint = match self.fingerprinter.fingerprint(file).await {
            Ok(fingerprint) => fingerprint,
            // removed since the listing
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        if !cache.is_changed(file, &fingerprint) {
            return Ok(false);
        }

        let Some(target) = self.translator.to_host_path(file, &self.project) else {
            return Ok(false);
        };

        let event = SyncEvent::Updated {
            source: file.to_path_buf(),
            target,
        };
        let applied = self
            .applier
            .apply(&event, &self.project, Direction::VolumeToHost)
            .await?;

        cache.record(file, fingerprint);
        if applied {
            self.reporter
                .effect_applied(self.project.name(), Direction::VolumeToHost, event.kind());
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::WatchList;
    use crate::report::LogReporter;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::fs;

    #[derive(Default)]
    struct CountingReporter {
        skipped: AtomicUsize,
        applied: AtomicUsize,
    }

    impl Reporter for CountingReporter {
        fn effect_applied(&self, _project: &str, direction: Direction, _kind: crate::effect::EffectKind) {
            assert_eq!(direction, Direction::VolumeToHost);
            self.applied.fetch_add(1, Ordering::SeqCst);
        }

        fn tick_skipped(&self, _project: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(watch: Vec<&str>, reporter: Arc<dyn Reporter>) -> (TempDir, PathBuf, PathBuf, ReverseEngine) {
        let temp_dir = TempDir::new().unwrap();
        let host = temp_dir.path().join("host");
        let volume = temp_dir.path().join("volume");
        std::fs::create_dir_all(&host).unwrap();
        std::fs::create_dir_all(volume.join("storage").join("logs")).unwrap();

        let watch_list = WatchList::from_entries([("shop", watch)]);
        let project = Project::new("shop", &host, &volume)
            .unwrap()
            .with_watch_list(&watch_list, false);
        let engine = ReverseEngine::new(
            Arc::new(project),
            PathTranslator::new(false),
            Fingerprinter::default(),
            reporter,
        );
        (temp_dir, host, volume, engine)
    }

    #[tokio::test]
    async fn test_changed_files_copied_back_once() {
        let reporter = Arc::new(CountingReporter::default());
        let (_tmp, host, volume, engine) = setup(vec!["storage/logs"], reporter.clone());
        let log = volume.join("storage").join("logs").join("laravel.log");
        fs::write(&log, b"first").await.unwrap();

        assert_eq!(engine.tick().await, TickOutcome::Completed { applied: 1, failed: 0 });
        let host_log = host.join("storage").join("logs").join("laravel.log");
        assert_eq!(fs::read(&host_log).await.unwrap(), b"first");

        // unchanged: served from the cache
        assert_eq!(engine.tick().await, TickOutcome::Completed { applied: 0, failed: 0 });

        fs::write(&log, b"second").await.unwrap();
        assert_eq!(engine.tick().await, TickOutcome::Completed { applied: 1, failed: 0 });
        assert_eq!(fs::read(&host_log).await.unwrap(), b"second");
        assert_eq!(reporter.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_file_entry_is_polled() {
        let (_tmp, host, volume, engine) = setup(vec!["public/shipping.log"], Arc::new(LogReporter));
        fs::create_dir_all(volume.join("public")).await.unwrap();
        fs::write(volume.join("public").join("shipping.log"), b"42").await.unwrap();
        fs::write(volume.join("public").join("index.php"), b"<?php").await.unwrap();

        assert_eq!(engine.tick().await, TickOutcome::Completed { applied: 1, failed: 0 });
        assert!(host.join("public").join("shipping.log").exists());
        assert!(!host.join("public").join("index.php").exists());
    }

    #[tokio::test]
    async fn test_identical_host_file_is_cached_without_copy() {
        let (_tmp, host, volume, engine) = setup(vec!["storage/logs"], Arc::new(LogReporter));
        fs::write(volume.join("storage").join("logs").join("a.log"), b"same").await.unwrap();
        fs::create_dir_all(host.join("storage").join("logs")).await.unwrap();
        fs::write(host.join("storage").join("logs").join("a.log"), b"same").await.unwrap();

        assert_eq!(engine.tick().await, TickOutcome::Completed { applied: 0, failed: 0 });
        assert_eq!(engine.cache.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let reporter = Arc::new(CountingReporter::default());
        let (_tmp, _host, _volume, engine) = setup(vec!["storage/logs"], reporter.clone());

        let _held = engine.cache.lock().await;
        assert_eq!(engine.tick().await, TickOutcome::Skipped);
        assert_eq!(reporter.skipped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_watch_list_is_inactive() {
        let (_tmp, _host, _volume, engine) = setup(vec![], Arc::new(LogReporter));
        assert!(!engine.is_active());
        assert_eq!(engine.tick().await, TickOutcome::Completed { applied: 0, failed: 0 });
    }
}
