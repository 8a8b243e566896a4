//! End-to-end tests: effects, forward and reverse engines under the orchestrator

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::fs;
use tokio::sync::mpsc;

use crate::effect::{Direction, EffectApplier, SyncEvent};
use crate::error::{MirrorError, Result};
use crate::exclusion::WatchList;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::project::{Project, ProjectState, RootLayout};
use crate::report::LogReporter;
use crate::reverse::TickOutcome;
use crate::subscription::{ChannelSubscription, FsEvent, FsEventKind, Subscription, SubscriptionSource};

/// Subscription source handing out channels the test can feed
#[derive(Default)]
struct ChannelSource {
    senders: Mutex<HashMap<String, Vec<mpsc::Sender<FsEvent>>>>,
}

impl ChannelSource {
    fn latest(&self, project: &str) -> mpsc::Sender<FsEvent> {
        self.senders.lock()[project].last().unwrap().clone()
    }

    fn all(&self, project: &str) -> Vec<mpsc::Sender<FsEvent>> {
        self.senders.lock().get(project).cloned().unwrap_or_default()
    }
}

impl SubscriptionSource for ChannelSource {
    fn subscribe(&self, project: &Project) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::channel(64);
        self.senders
            .lock()
            .entry(project.name().to_string())
            .or_default()
            .push(tx);
        Ok(Box::new(ChannelSubscription::new(rx)))
    }
}

struct FailingSource;

impl SubscriptionSource for FailingSource {
    fn subscribe(&self, project: &Project) -> Result<Box<dyn Subscription>> {
        Err(MirrorError::subscription_error(project.name(), "backend unavailable"))
    }
}

struct Workspace {
    _temp_dir: TempDir,
    layout: RootLayout,
}

impl Workspace {
    fn new(projects: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let host_base = temp_dir.path().join("host");
        let volume_template = temp_dir.path().join("volumes").join("stack_{project}").join("_data");
        let layout = RootLayout::new(
            host_base.to_string_lossy(),
            volume_template.to_string_lossy(),
        )
        .unwrap();

        for project in projects {
            std::fs::create_dir_all(layout.host_root(project)).unwrap();
            std::fs::create_dir_all(layout.volume_root(project).join("storage").join("logs")).unwrap();
        }

        Self {
            _temp_dir: temp_dir,
            layout,
        }
    }

    fn host(&self, project: &str) -> PathBuf {
        self.layout.host_root(project)
    }

    fn volume(&self, project: &str) -> PathBuf {
        self.layout.volume_root(project)
    }

    fn projects(&self, names: &[&str], watch_list: &WatchList) -> Vec<Project> {
        names
            .iter()
            .map(|name| self.layout.project(name).unwrap().with_watch_list(watch_list, false))
            .collect()
    }
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn orchestrator(
    workspace: &Workspace,
    names: &[&str],
    watch_list: &WatchList,
    source: Arc<dyn SubscriptionSource>,
) -> Orchestrator {
    Orchestrator::new(
        workspace.projects(names, watch_list),
        OrchestratorSettings::default(),
        source,
        Arc::new(LogReporter),
    )
    .unwrap()
}

mod effect_tests {
    use super::*;

    fn project(root: &Path) -> Project {
        Project::new("p", root.join("host"), root.join("volume")).unwrap()
    }

    #[tokio::test]
    async fn test_rename_and_inverse_rename() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        let volume = project.volume_root().to_path_buf();
        fs::create_dir_all(&volume).await.unwrap();
        fs::write(volume.join("a.txt"), b"original").await.unwrap();

        let applier = EffectApplier::default();
        let forward = SyncEvent::Renamed {
            from: volume.join("a.txt"),
            to: volume.join("b.txt"),
        };
        assert!(applier.apply(&forward, &project, Direction::HostToVolume).await.unwrap());
        assert!(!volume.join("a.txt").exists());
        assert_eq!(fs::read(volume.join("b.txt")).await.unwrap(), b"original");

        let inverse = SyncEvent::Renamed {
            from: volume.join("b.txt"),
            to: volume.join("a.txt"),
        };
        assert!(applier.apply(&inverse, &project, Direction::HostToVolume).await.unwrap());
        assert!(!volume.join("b.txt").exists());
        assert_eq!(fs::read(volume.join("a.txt")).await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_directory_delete_then_noop() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        let target = project.volume_root().join("cache");
        fs::create_dir_all(target.join("a").join("b")).await.unwrap();
        fs::write(target.join("a").join("b").join("c.txt"), b"c").await.unwrap();
        fs::write(target.join("top.txt"), b"t").await.unwrap();

        let applier = EffectApplier::default();
        let event = SyncEvent::DirDeleted { target: target.clone() };

        assert!(applier.apply(&event, &project, Direction::HostToVolume).await.unwrap());
        assert!(!target.exists());
        assert!(!applier.apply(&event, &project, Direction::HostToVolume).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_twice_mutates_once() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        fs::create_dir_all(project.host_root()).await.unwrap();
        let source = project.host_root().join("index.php");
        fs::write(&source, b"<?php echo 1;").await.unwrap();

        let applier = EffectApplier::default();
        let event = SyncEvent::Updated {
            source: source.clone(),
            target: project.volume_root().join("index.php"),
        };

        assert!(applier.apply(&event, &project, Direction::HostToVolume).await.unwrap());
        assert!(!applier.apply(&event, &project, Direction::HostToVolume).await.unwrap());
    }
}

mod orchestrator_tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_empty_and_duplicate_projects() {
        let workspace = Workspace::new(&["shop"]);
        let source: Arc<dyn SubscriptionSource> = Arc::new(ChannelSource::default());

        let empty = Orchestrator::new(
            Vec::new(),
            OrchestratorSettings::default(),
            source.clone(),
            Arc::new(LogReporter),
        );
        assert!(matches!(empty, Err(MirrorError::Config(_))));

        let duplicated = Orchestrator::new(
            workspace.projects(&["shop", "shop"], &WatchList::default()),
            OrchestratorSettings::default(),
            source,
            Arc::new(LogReporter),
        );
        assert!(matches!(duplicated, Err(MirrorError::Config(_))));
    }

    #[tokio::test]
    async fn test_forward_events_reach_volume() {
        let workspace = Workspace::new(&["shop", "blog"]);
        let source = Arc::new(ChannelSource::default());
        let orchestrator = orchestrator(&workspace, &["shop", "blog"], &WatchList::default(), source.clone());

        assert_eq!(orchestrator.state("shop"), Some(ProjectState::NotStarted));
        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state("shop"), Some(ProjectState::Watching));
        assert_eq!(orchestrator.state("blog"), Some(ProjectState::Watching));

        let host_file = workspace.host("shop").join("routes.php");
        fs::write(&host_file, b"<?php").await.unwrap();
        source
            .latest("shop")
            .send(FsEvent::new(FsEventKind::Create, &host_file))
            .await
            .unwrap();

        let mirrored = workspace.volume("shop").join("routes.php");
        assert!(eventually(|| mirrored.exists()).await);
        assert!(!workspace.volume("blog").join("routes.php").exists());

        orchestrator.shutdown().await;
        assert_eq!(orchestrator.state("shop"), Some(ProjectState::NotStarted));
        assert!(source.latest("shop").is_closed());
    }

    #[tokio::test]
    async fn test_storm_marks_project_then_reloads() {
        let workspace = Workspace::new(&["shop"]);
        let source = Arc::new(ChannelSource::default());
        let orchestrator = orchestrator(&workspace, &["shop"], &WatchList::default(), source.clone());
        orchestrator.start().await.unwrap();

        let now = chrono::Utc::now().timestamp();

        // a storm still in progress: the newest bucket is in the future
        for _ in 0..6 {
            orchestrator.governor().record_at("shop", now + 100);
        }
        assert!(orchestrator.evaluate_governor().await.is_empty());
        assert_eq!(orchestrator.state("shop"), Some(ProjectState::Storming));

        // settled long ago
        orchestrator.governor().reset("shop");
        for _ in 0..6 {
            orchestrator.governor().record_at("shop", now - 10);
        }
        let reloaded = orchestrator.evaluate_governor().await;

        assert_eq!(reloaded, vec!["shop".to_string()]);
        assert_eq!(orchestrator.state("shop"), Some(ProjectState::Watching));
        assert!(!orchestrator.governor().must_reload("shop"));

        let senders = source.all("shop");
        assert_eq!(senders.len(), 2);
        assert!(senders[0].is_closed());
        assert!(!senders[1].is_closed());

        // the new session is live
        let host_file = workspace.host("shop").join("after.txt");
        fs::write(&host_file, b"after").await.unwrap();
        senders[1]
            .send(FsEvent::new(FsEventKind::Create, &host_file))
            .await
            .unwrap();
        let mirrored = workspace.volume("shop").join("after.txt");
        assert!(eventually(|| mirrored.exists()).await);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_subscription_is_reported() {
        let workspace = Workspace::new(&["shop"]);
        let orchestrator = orchestrator(&workspace, &["shop"], &WatchList::default(), Arc::new(FailingSource));

        let result = orchestrator.start().await;
        assert!(matches!(result, Err(MirrorError::Subscription { .. })));
        assert_eq!(orchestrator.state("shop"), Some(ProjectState::NotStarted));
    }

    #[tokio::test]
    async fn test_reverse_tick_and_missing_subtrees() {
        let workspace = Workspace::new(&["shop", "idle"]);
        let watch_list = WatchList::from_entries([
            ("*", vec!["storage/logs", "bootstrap/cache"]),
            ("idle", vec![]),
        ]);
        let source = Arc::new(ChannelSource::default());
        let orchestrator = orchestrator(&workspace, &["shop", "idle"], &watch_list, source);

        // bootstrap/cache does not exist in the volume
        assert_eq!(orchestrator.projects()[0].watched(), &["storage/logs".to_string()]);
        assert_eq!(orchestrator.reverse_projects(), vec!["shop".to_string()]);

        let log = workspace.volume("shop").join("storage").join("logs").join("laravel.log");
        fs::write(&log, b"[2024-01-01] local.INFO: ok").await.unwrap();

        let outcome = orchestrator.reverse_tick("shop").await.unwrap();
        assert_eq!(outcome, TickOutcome::Completed { applied: 1, failed: 0 });
        assert!(workspace.host("shop").join("storage").join("logs").join("laravel.log").exists());

        assert!(matches!(
            orchestrator.reverse_tick("nope").await,
            Err(MirrorError::UnknownProject(_))
        ));
    }

    #[tokio::test]
    async fn test_excluded_host_change_does_not_overwrite_volume() {
        let workspace = Workspace::new(&["shop"]);
        let watch_list = WatchList::from_entries([("*", vec!["storage/logs"])]);
        let source = Arc::new(ChannelSource::default());
        let orchestrator = orchestrator(&workspace, &["shop"], &watch_list, source.clone());
        orchestrator.start().await.unwrap();

        let volume_log = workspace.volume("shop").join("storage").join("logs").join("app.log");
        fs::write(&volume_log, b"volume wins").await.unwrap();

        let host_logs = workspace.host("shop").join("storage").join("logs");
        fs::create_dir_all(&host_logs).await.unwrap();
        fs::write(host_logs.join("app.log"), b"stale host copy").await.unwrap();

        let tx = source.latest("shop");
        tx.send(FsEvent::new(FsEventKind::Change, host_logs.join("app.log")))
            .await
            .unwrap();
        // a marker event processed after the excluded one
        let marker = workspace.host("shop").join("marker.txt");
        fs::write(&marker, b"m").await.unwrap();
        tx.send(FsEvent::new(FsEventKind::Create, &marker)).await.unwrap();

        let mirrored_marker = workspace.volume("shop").join("marker.txt");
        assert!(eventually(|| mirrored_marker.exists()).await);
        assert_eq!(fs::read(&volume_log).await.unwrap(), b"volume wins");

        orchestrator.reverse_tick("shop").await.unwrap();
        assert_eq!(fs::read(host_logs.join("app.log")).await.unwrap(), b"volume wins");

        orchestrator.shutdown().await;
    }
}
