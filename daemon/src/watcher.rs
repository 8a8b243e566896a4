//! `notify`-backed host subscriptions

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mirror::{
    ChannelSubscription, FsEvent, FsEventKind, IgnoreRules, MirrorError, Project, Subscription,
    SubscriptionSource,
};

const DEFAULT_CAPACITY: usize = 4096;

/// Subscribes projects through the platform's recommended watcher
#[derive(Debug, Clone)]
pub struct NotifySource {
    ignore: IgnoreRules,
    case_insensitive: bool,
    capacity: usize,
}

impl NotifySource {
    pub fn new(ignore: IgnoreRules, case_insensitive: bool) -> Self {
        Self {
            ignore,
            case_insensitive,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl SubscriptionSource for NotifySource {
    fn subscribe(&self, project: &Project) -> mirror::Result<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let matcher = self.ignore.for_project(project.name(), self.case_insensitive);
        let name = project.name().to_string();
        let callback_name = name.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for fs_event in classify(&event) {
                    if matcher.is_ignored(&fs_event.path) {
                        continue;
                    }
                    // a full queue means a storm; the governor's reload resyncs the session
                    if let Err(e) = tx.try_send(fs_event) {
                        warn!(project = %callback_name, "Dropped watcher event: {}", e);
                    }
                }
            }
            Err(e) => {
                error!(project = %callback_name, "File watcher error: {}", e);
            }
        })
        .map_err(|e| MirrorError::subscription_error(&name, e.to_string()))?;

        watcher
            .watch(project.host_root(), RecursiveMode::Recursive)
            .map_err(|e| MirrorError::subscription_error(&name, e.to_string()))?;

        info!(project = %name, path = %project.host_root().display(), "Host watcher started");
        Ok(Box::new(ChannelSubscription::with_guard(rx, watcher)))
    }
}

/// Map one raw notification onto mirror events
pub fn classify(event: &Event) -> Vec<FsEvent> {
    let created = |path: &Path| {
        let kind = if path.is_dir() { FsEventKind::DirCreate } else { FsEventKind::Create };
        FsEvent::new(kind, path)
    };

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => each(event, FsEventKind::DirCreate),
        EventKind::Create(CreateKind::File) => each(event, FsEventKind::Create),
        EventKind::Create(_) => event.paths.iter().map(|p| created(p)).collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![FsEvent::rename(from, to)],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(event, FsEventKind::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(|p| created(p)).collect()
        }
        // platforms that cannot pair rename halves
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| if p.exists() { created(p) } else { FsEvent::new(FsEventKind::Delete, p) })
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| FsEvent::new(FsEventKind::Change, p))
            .collect(),

        EventKind::Remove(RemoveKind::Folder) => each(event, FsEventKind::DirDelete),
        EventKind::Remove(_) => each(event, FsEventKind::Delete),

        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            debug!(kind = ?event.kind, "Ignoring watcher event");
            Vec::new()
        }
    }
}

fn each(event: &Event, kind: FsEventKind) -> Vec<FsEvent> {
    event.paths.iter().map(|p| FsEvent::new(kind, p)).collect()
}
