//! Filesystem effects applied to the target namespace
//!
//! Every effect is idempotent: a target already in the desired state, or a
//! path that vanished between notification and handling, is a no-op rather
//! than an error. `apply` reports whether a real mutation happened so the
//! governor only counts genuine operations.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::fingerprint::Fingerprinter;
use crate::project::Project;
use crate::translate::PathTranslator;

/// Which way an effect flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HostToVolume,
    VolumeToHost,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostToVolume => "host_to_volume",
            Self::VolumeToHost => "volume_to_host",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostToVolume => f.write_str("->"),
            Self::VolumeToHost => f.write_str("<-"),
        }
    }
}

/// One change to reproduce on the target side. Target paths are already
/// translated into the target namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// File created or changed: copy `source` over `target`
    Updated { source: PathBuf, target: PathBuf },
    Deleted { target: PathBuf },
    Renamed { from: PathBuf, to: PathBuf },
    DirCreated { target: PathBuf },
    DirDeleted { target: PathBuf },
}

impl SyncEvent {
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Updated { .. } => EffectKind::Update,
            Self::Deleted { .. } => EffectKind::Delete,
            Self::Renamed { .. } => EffectKind::Rename,
            Self::DirCreated { .. } => EffectKind::CreateDir,
            Self::DirDeleted { .. } => EffectKind::DeleteDir,
        }
    }

    /// Path the effect mutates first
    pub fn target(&self) -> &Path {
        match self {
            Self::Updated { target, .. }
            | Self::Deleted { target }
            | Self::DirCreated { target }
            | Self::DirDeleted { target } => target,
            Self::Renamed { from, .. } => from,
        }
    }
}

/// Effect kinds, for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Update,
    Delete,
    Rename,
    CreateDir,
    DeleteDir,
}

impl EffectKind {
    /// Single-letter tag used in operation log lines
    pub fn letter(&self) -> char {
        match self {
            Self::Update | Self::CreateDir => 'C',
            Self::Delete | Self::DeleteDir => 'D',
            Self::Rename => 'R',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::CreateDir => "create_dir",
            Self::DeleteDir => "delete_dir",
        }
    }
}

/// Executes [`SyncEvent`]s against the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectApplier {
    fingerprinter: Fingerprinter,
    translator: PathTranslator,
}

impl EffectApplier {
    pub fn new(fingerprinter: Fingerprinter, translator: PathTranslator) -> Self {
        Self {
            fingerprinter,
            translator,
        }
    }

    /// Apply one effect. Returns `true` only if the filesystem was mutated.
    pub async fn apply(&self, event: &SyncEvent, project: &Project, direction: Direction) -> Result<bool> {
        let applied = match event {
            SyncEvent::Updated { source, target } => self.copy_if_changed(source, target).await?,
            SyncEvent::Deleted { target } => self.remove_file(target).await?,
            SyncEvent::Renamed { from, to } => self.rename(from, to).await?,
            SyncEvent::DirCreated { target } => self.create_dir(target).await?,
            SyncEvent::DirDeleted { target } => self.remove_dir(target).await?,
        };

        if applied {
            self.log_effect(event, project, direction);
        } else {
            debug!(
                project = %project.name(),
                direction = %direction,
                target = %event.target().display(),
                "{} already in place, skipped",
                event.kind().as_str()
            );
        }

        Ok(applied)
    }

    async fn copy_if_changed(&self, source: &Path, target: &Path) -> Result<bool> {
        let Some(source_meta) = probe(source).await? else {
            return Ok(false);
        };
        if !source_meta.is_file() {
            return Ok(false);
        }

        if let Some(target_meta) = probe(target).await? {
            if target_meta.is_file() {
                match self.fingerprinter.same_content(source, target).await {
                    Ok(true) => return Ok(false),
                    Ok(false) => {}
                    // either side vanished mid-comparison
                    Err(e) if e.is_not_found() => {
                        if probe(source).await?.is_none() {
                            return Ok(false);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::create_dir_error(parent, e))?;
        }

        match fs::copy(source, target).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MirrorError::copy_error(source, target, e)),
        }
    }

    async fn remove_file(&self, target: &Path) -> Result<bool> {
        match fs::remove_file(target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MirrorError::deletion_error(target, e)),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<bool> {
        if probe(from).await?.is_none() {
            return Ok(false);
        }

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::create_dir_error(parent, e))?;
        }

        match fs::rename(from, to).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MirrorError::rename_error(from, to, e)),
        }
    }

    async fn create_dir(&self, target: &Path) -> Result<bool> {
        if probe(target).await?.is_some() {
            return Ok(false);
        }

        match fs::create_dir_all(target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(MirrorError::create_dir_error(target, e)),
        }
    }

    async fn remove_dir(&self, target: &Path) -> Result<bool> {
        match probe(target).await? {
            None => return Ok(false),
            Some(meta) if !meta.is_dir() => return self.remove_file(target).await,
            Some(_) => {}
        }

        match fs::remove_dir_all(target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MirrorError::deletion_error(target, e)),
        }
    }

    fn log_effect(&self, event: &SyncEvent, project: &Project, direction: Direction) {
        let short = |p: &Path| self.translator.short_path(p, project);
        let paths = match event {
            SyncEvent::Updated { source, .. } => short(source),
            SyncEvent::Renamed { from, to } => format!("{} -> {}", short(from), short(to)),
            SyncEvent::Deleted { target }
            | SyncEvent::DirCreated { target }
            | SyncEvent::DirDeleted { target } => short(target),
        };

        info!(
            target: "mirror::ops",
            "{}: {} {} {}",
            event.kind().letter(),
            project.name(),
            direction,
            paths
        );
    }
}

/// Metadata of `path`, `None` when it does not exist
async fn probe(path: &Path) -> Result<Option<Metadata>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MirrorError::path_error(path, format!("Failed to read metadata: {}", e))),
    }
}
