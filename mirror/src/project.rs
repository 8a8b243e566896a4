//! Projects and the layout that places them in both namespaces

use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::exclusion::{ForwardExclusion, WatchList};
use crate::translate::join_relative;

/// Placeholder substituted with the project name in volume root templates
pub const PROJECT_PLACEHOLDER: &str = "{project}";

/// Placeholder substituted with the compose stack name, when one is known
pub const STACK_PLACEHOLDER: &str = "{stack}";

/// Lifecycle of a project's watch session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    NotStarted,
    Watching,
    Storming,
    Reloading,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Watching => "watching",
            Self::Storming => "storming",
            Self::Reloading => "reloading",
        };
        f.write_str(name)
    }
}

/// A named project mirrored between its host root and its volume root
#[derive(Debug, Clone)]
pub struct Project {
    name: String,
    host_root: PathBuf,
    volume_root: PathBuf,
    /// Volume subtrees polled by the reverse direction, relative to the volume root
    watched: Vec<String>,
    /// Host subtrees the forward direction leaves alone
    exclusion: ForwardExclusion,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        host_root: impl Into<PathBuf>,
        volume_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let name = name.into();
        let host_root = host_root.into();
        let volume_root = volume_root.into();

        if name.trim().is_empty() {
            return Err(MirrorError::config_error("project name cannot be empty"));
        }
        if host_root.as_os_str().is_empty() {
            return Err(MirrorError::config_error(format!("host root of '{}' is empty", name)));
        }
        if volume_root.as_os_str().is_empty() {
            return Err(MirrorError::config_error(format!("volume root of '{}' is empty", name)));
        }

        Ok(Self {
            name,
            host_root,
            volume_root,
            watched: Vec::new(),
            exclusion: ForwardExclusion::default(),
        })
    }

    /// Apply the reverse watch list: resolves the polled subtrees and derives
    /// the forward exclusion from them.
    pub fn with_watch_list(mut self, watch_list: &WatchList, case_insensitive: bool) -> Self {
        self.watched = watch_list.resolve(&self.name);
        self.exclusion = watch_list.forward_exclusion(&self.name, case_insensitive);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    pub fn volume_root(&self) -> &Path {
        &self.volume_root
    }

    pub fn watched(&self) -> &[String] {
        &self.watched
    }

    pub fn exclusion(&self) -> &ForwardExclusion {
        &self.exclusion
    }

    /// Whether a host path belongs to a subtree owned by the reverse direction
    pub fn excludes_forward(&self, host_path: &Path) -> bool {
        self.exclusion.matches(host_path)
    }

    /// Absolute volume path of a watched subtree
    pub fn watched_path(&self, subtree: &str) -> PathBuf {
        join_relative(&self.volume_root, subtree)
    }

    /// Drop watched subtrees that do not exist under the volume root.
    /// Returns the dropped entries.
    pub fn retain_existing_watched(&mut self) -> Vec<String> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.watched)
            .into_iter()
            .partition(|subtree| self.watched_path(subtree).exists());
        self.watched = kept;
        dropped
    }
}

/// Where project directories live on each side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayout {
    host_root: String,
    volume_root_template: String,
    stack: Option<String>,
}

impl RootLayout {
    pub fn new(host_root: impl Into<String>, volume_root_template: impl Into<String>) -> Result<Self> {
        let host_root = host_root.into();
        let volume_root_template = volume_root_template.into();

        if host_root.trim().is_empty() {
            return Err(MirrorError::config_error("host root cannot be empty"));
        }
        if volume_root_template.trim().is_empty() {
            return Err(MirrorError::config_error("volume root template cannot be empty"));
        }
        if !volume_root_template.contains(PROJECT_PLACEHOLDER) {
            return Err(MirrorError::config_error(format!(
                "volume root template must contain {}",
                PROJECT_PLACEHOLDER
            )));
        }

        Ok(Self {
            host_root,
            volume_root_template,
            stack: None,
        })
    }

    /// Fill `{stack}` in the volume template
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Directory holding every project on the host side
    pub fn host_base(&self) -> &Path {
        Path::new(&self.host_root)
    }

    pub fn host_root(&self, project: &str) -> PathBuf {
        join_relative(Path::new(&self.host_root), project)
    }

    pub fn volume_root(&self, project: &str) -> PathBuf {
        let mut root = self.volume_root_template.replace(PROJECT_PLACEHOLDER, project);
        if let Some(stack) = &self.stack {
            root = root.replace(STACK_PLACEHOLDER, stack);
        }
        PathBuf::from(root)
    }

    pub fn project(&self, name: &str) -> Result<Project> {
        Project::new(name, self.host_root(name), self.volume_root(name))
    }
}
