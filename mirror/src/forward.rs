//! Host -> volume direction, driven by filesystem notifications

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::effect::{Direction, EffectApplier, SyncEvent};
use crate::error::{MirrorError, Result};
use crate::governor::EventRateGovernor;
use crate::project::Project;
use crate::report::Reporter;
use crate::subscription::{FsEvent, FsEventKind, Subscription};
use crate::translate::PathTranslator;

/// Consumes one project's notification stream and mirrors it into the volume
pub struct ForwardEngine {
    project: Arc<Project>,
    translator: PathTranslator,
    applier: EffectApplier,
    governor: Arc<EventRateGovernor>,
    reporter: Arc<dyn Reporter>,
}

impl ForwardEngine {
    pub fn new(
        project: Arc<Project>,
        translator: PathTranslator,
        applier: EffectApplier,
        governor: Arc<EventRateGovernor>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            project,
            translator,
            applier,
            governor,
            reporter,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Handle events in delivery order until the stream ends or `cancel`
    /// fires, then close the subscription. Returns the number of applied
    /// effects.
    pub async fn run(self, mut subscription: Box<dyn Subscription>, cancel: CancellationToken) -> usize {
        info!(project = %self.project.name(), "Forward sync started");
        let mut applied = 0;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = subscription.next_event() => match event {
                    Some(event) => event,
                    None => {
                        debug!(project = %self.project.name(), "Notification stream ended");
                        break;
                    }
                },
            };

            match self.handle(&event).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        project = %self.project.name(),
                        event = %event.kind,
                        path = %event.path.display(),
                        error = %e,
                        "Failed to mirror host event"
                    );
                    self.reporter.failure(self.project.name(), Direction::HostToVolume, &e);
                }
            }
        }

        subscription.close();
        info!(project = %self.project.name(), applied, "Forward sync stopped");
        applied
    }

    /// Mirror a single notification. Returns whether the volume was mutated.
    pub async fn handle(&self, event: &FsEvent) -> Result<bool> {
        let excludable = matches!(
            event.kind,
            FsEventKind::Create | FsEventKind::Change | FsEventKind::Rename
        );
        if excludable && self.project.excludes_forward(&event.path) {
            debug!(
                project = %self.project.name(),
                path = %event.path.display(),
                "Path owned by reverse sync, skipped"
            );
            return Ok(false);
        }

        let Some(sync_event) = self.to_sync_event(event).await? else {
            return Ok(false);
        };

        let applied = self
            .applier
            .apply(&sync_event, &self.project, Direction::HostToVolume)
            .await?;

        if applied {
            self.governor.record(self.project.name());
            self.reporter
                .effect_applied(self.project.name(), Direction::HostToVolume, sync_event.kind());
        }
        Ok(applied)
    }

    async fn to_sync_event(&self, event: &FsEvent) -> Result<Option<SyncEvent>> {
        let Some(target) = self.translator.to_volume_path(&event.path, &self.project) else {
            debug!(
                project = %self.project.name(),
                path = %event.path.display(),
                "Path outside project root, skipped"
            );
            return Ok(None);
        };

        let sync_event = match event.kind {
            FsEventKind::Create | FsEventKind::Change => SyncEvent::Updated {
                source: event.path.clone(),
                target,
            },
            // backends cannot always tell what a removed path was
            FsEventKind::Delete => match tokio::fs::metadata(&target).await {
                Ok(meta) if meta.is_dir() => SyncEvent::DirDeleted { target },
                _ => SyncEvent::Deleted { target },
            },
            FsEventKind::Rename => {
                let renamed_to = event.renamed_to.as_ref().ok_or_else(|| {
                    MirrorError::path_error(&event.path, "rename event without a destination")
                })?;
                let Some(to) = self.translator.to_volume_path(renamed_to, &self.project) else {
                    return Ok(None);
                };
                SyncEvent::Renamed { from: target, to }
            }
            FsEventKind::DirCreate => SyncEvent::DirCreated { target },
            FsEventKind::DirDelete => SyncEvent::DirDeleted { target },
        };

        Ok(Some(sync_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::WatchList;
    use crate::governor::GovernorSettings;
    use crate::report::LogReporter;
    use crate::subscription::ChannelSubscription;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::fs;
    use tokio::sync::mpsc;

    struct Fixture {
        _temp_dir: TempDir,
        host: PathBuf,
        volume: PathBuf,
        engine: ForwardEngine,
        governor: Arc<EventRateGovernor>,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let host = temp_dir.path().join("host").join("shop");
        let volume = temp_dir.path().join("volume").join("shop");
        std::fs::create_dir_all(&host).unwrap();
        std::fs::create_dir_all(&volume).unwrap();

        let watch_list = WatchList::from_entries([("*", vec!["storage/logs"])]);
        let project = Arc::new(
            Project::new("shop", &host, &volume)
                .unwrap()
                .with_watch_list(&watch_list, false),
        );
        let governor = Arc::new(EventRateGovernor::new(GovernorSettings::default()));
        let engine = ForwardEngine::new(
            project,
            PathTranslator::new(false),
            EffectApplier::default(),
            governor.clone(),
            Arc::new(LogReporter),
        );

        Fixture {
            _temp_dir: temp_dir,
            host,
            volume,
            engine,
            governor,
        }
    }

    #[tokio::test]
    async fn test_create_is_mirrored() {
        let fx = fixture();
        fs::create_dir_all(fx.host.join("app")).await.unwrap();
        fs::write(fx.host.join("app").join("Foo.php"), b"<?php").await.unwrap();

        let applied = fx
            .engine
            .handle(&FsEvent::new(FsEventKind::Create, fx.host.join("app").join("Foo.php")))
            .await
            .unwrap();

        assert!(applied);
        assert_eq!(
            fs::read(fx.volume.join("app").join("Foo.php")).await.unwrap(),
            b"<?php"
        );
    }

    #[tokio::test]
    async fn test_excluded_change_is_skipped_but_delete_is_not() {
        let fx = fixture();
        let logs = fx.host.join("storage").join("logs");
        fs::create_dir_all(&logs).await.unwrap();
        fs::write(logs.join("laravel.log"), b"line").await.unwrap();

        let applied = fx
            .engine
            .handle(&FsEvent::new(FsEventKind::Change, logs.join("laravel.log")))
            .await
            .unwrap();
        assert!(!applied);
        assert!(!fx.volume.join("storage").join("logs").join("laravel.log").exists());

        let volume_logs = fx.volume.join("storage").join("logs");
        fs::create_dir_all(&volume_logs).await.unwrap();
        fs::write(volume_logs.join("old.log"), b"x").await.unwrap();

        let applied = fx
            .engine
            .handle(&FsEvent::new(FsEventKind::Delete, logs.join("old.log")))
            .await
            .unwrap();
        assert!(applied);
        assert!(!volume_logs.join("old.log").exists());
    }

    #[tokio::test]
    async fn test_delete_of_directory_is_upgraded() {
        let fx = fixture();
        let target = fx.volume.join("cache");
        fs::create_dir_all(target.join("nested")).await.unwrap();
        fs::write(target.join("nested").join("x"), b"x").await.unwrap();

        let applied = fx
            .engine
            .handle(&FsEvent::new(FsEventKind::Delete, fx.host.join("cache")))
            .await
            .unwrap();

        assert!(applied);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_rename_is_translated_on_both_ends() {
        let fx = fixture();
        fs::write(fx.volume.join("a.txt"), b"original").await.unwrap();

        let applied = fx
            .engine
            .handle(&FsEvent::rename(fx.host.join("a.txt"), fx.host.join("b.txt")))
            .await
            .unwrap();

        assert!(applied);
        assert!(!fx.volume.join("a.txt").exists());
        assert_eq!(fs::read(fx.volume.join("b.txt")).await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_rename_without_destination_is_an_error() {
        let fx = fixture();
        let event = FsEvent::new(FsEventKind::Rename, fx.host.join("a.txt"));
        assert!(fx.engine.handle(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_outside_root_is_ignored() {
        let fx = fixture();
        let applied = fx
            .engine
            .handle(&FsEvent::new(FsEventKind::DirCreate, "/somewhere/else"))
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_run_survives_bad_events_and_feeds_governor() {
        let fx = fixture();
        fs::write(fx.host.join("one.txt"), b"1").await.unwrap();
        fs::write(fx.host.join("two.txt"), b"2").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        tx.send(FsEvent::new(FsEventKind::Create, fx.host.join("one.txt"))).await.unwrap();
        tx.send(FsEvent::new(FsEventKind::Rename, fx.host.join("broken"))).await.unwrap();
        tx.send(FsEvent::new(FsEventKind::Create, fx.host.join("two.txt"))).await.unwrap();
        tx.send(FsEvent::new(FsEventKind::DirCreate, fx.host.join("dir"))).await.unwrap();
        drop(tx);

        let governor = fx.governor.clone();
        let volume = fx.volume.clone();
        let applied = fx
            .engine
            .run(Box::new(ChannelSubscription::new(rx)), CancellationToken::new())
            .await;

        assert_eq!(applied, 3);
        assert!(volume.join("one.txt").exists());
        assert!(volume.join("two.txt").exists());
        assert!(volume.join("dir").is_dir());

        // three applied operations in (at most) a couple of seconds: below the storm threshold
        assert!(!governor.must_reload("shop"));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fx = fixture();
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let applied = fx.engine.run(Box::new(ChannelSubscription::new(rx)), cancel).await;
        assert_eq!(applied, 0);
    }
}
