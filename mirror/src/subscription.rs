//! Notification subscriptions
//!
//! The forward engine only sees [`Subscription`]: a sequential stream of
//! [`FsEvent`]s for one project that can be closed. Concrete backends (the
//! daemon's `notify` watcher, channels in tests) sit behind
//! [`SubscriptionSource`].

use std::fmt;
use std::path::PathBuf;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::project::Project;

/// Classification of a raw filesystem notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Create,
    Change,
    Delete,
    /// File or directory moved; the event carries the new path
    Rename,
    DirCreate,
    DirDelete,
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "add",
            Self::Change => "change",
            Self::Delete => "unlink",
            Self::Rename => "rename",
            Self::DirCreate => "addDir",
            Self::DirDelete => "unlinkDir",
        };
        f.write_str(name)
    }
}

/// One notification, in host-namespace paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    /// Destination of a rename
    pub renamed_to: Option<PathBuf>,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            renamed_to: None,
        }
    }

    pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Rename,
            path: from.into(),
            renamed_to: Some(to.into()),
        }
    }
}

/// A live notification stream for one project
#[async_trait]
pub trait Subscription: Send {
    /// Next event in delivery order; `None` once the stream has ended
    async fn next_event(&mut self) -> Option<FsEvent>;

    /// Stop delivery and release the backend. Queued events are discarded.
    fn close(&mut self);
}

/// Creates subscriptions rooted at a project's host directory
pub trait SubscriptionSource: Send + Sync {
    fn subscribe(&self, project: &Project) -> Result<Box<dyn Subscription>>;
}

/// Channel-backed subscription. `guard` keeps the producing backend alive
/// until the subscription is closed or dropped.
pub struct ChannelSubscription {
    rx: mpsc::Receiver<FsEvent>,
    guard: Option<Box<dyn Send>>,
}

impl ChannelSubscription {
    pub fn new(rx: mpsc::Receiver<FsEvent>) -> Self {
        Self { rx, guard: None }
    }

    pub fn with_guard(rx: mpsc::Receiver<FsEvent>, guard: impl Send + 'static) -> Self {
        Self {
            rx,
            guard: Some(Box::new(guard)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_none() && self.rx.is_closed()
    }
}

impl fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("has_guard", &self.guard.is_some())
            .finish()
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next_event(&mut self) -> Option<FsEvent> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.guard = None;
        self.rx.close();
        // drop whatever was queued during a storm
        while self.rx.try_recv().is_ok() {}
    }
}
