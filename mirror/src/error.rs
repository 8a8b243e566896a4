//! Error types for the mirroring engine

use std::io;
use std::path::PathBuf;

/// Result type alias for mirroring operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Error type shared by every component of the engine
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Fingerprint computation errors
    #[error("Hash computation error for '{path}': {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File copying errors
    #[error("File copy error from '{from}' to '{to}': {source}")]
    FileCopy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File or directory deletion errors
    #[error("Deletion error at '{path}': {source}")]
    Deletion {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rename errors
    #[error("Rename error from '{from}' to '{to}': {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory creation errors
    #[error("Directory creation error at '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory listing errors
    #[error("Directory scan error at '{path}': {message}")]
    DirectoryScan { path: PathBuf, message: String },

    /// Invalid project or layout configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Notification subscription errors
    #[error("Subscription error for project '{project}': {message}")]
    Subscription { project: String, message: String },

    /// Unknown project name
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl MirrorError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn hash_error(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Hash {
            path: path.into(),
            source,
        }
    }

    pub fn copy_error(from: impl Into<PathBuf>, to: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileCopy {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    pub fn deletion_error(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Deletion {
            path: path.into(),
            source,
        }
    }

    pub fn rename_error(from: impl Into<PathBuf>, to: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Rename {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    pub fn create_dir_error(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CreateDirectory {
            path: path.into(),
            source,
        }
    }

    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryScan {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn subscription_error(project: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            project: project.into(),
            message: message.into(),
        }
    }

    /// The underlying IO error, when there is one
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Io(e) => Some(e),
            Self::Hash { source, .. }
            | Self::FileCopy { source, .. }
            | Self::Deletion { source, .. }
            | Self::Rename { source, .. }
            | Self::CreateDirectory { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the failure was a "not found" race rather than a real IO failure
    pub fn is_not_found(&self) -> bool {
        self.io_error()
            .map(|e| e.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false)
    }
}
