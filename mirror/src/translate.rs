//! Bidirectional host <-> volume path translation
//!
//! Translation is a textual prefix substitution: the project's host root is
//! swapped for its volume root (and back). A `\` is only a separator under
//! a Windows-style root; under a `/` root it is an ordinary filename byte.
//! The relative part is copied verbatim when both roots share a convention
//! and rewritten into the destination's convention otherwise, so a path
//! written in its root's style survives a round trip unchanged.
//!
//! With case-insensitive matching the output always carries the configured
//! root's casing: `/SRV/shop/x` maps back to `/srv/shop/x`, the same file on
//! a case-insensitive filesystem.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::project::Project;

/// Path separator convention of a namespace root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Separator {
    Slash,
    Backslash,
}

impl Separator {
    /// Detect the convention used by a root path: drive-letter, UNC and
    /// slash-free backslash roots are Windows-style, everything else is `/`.
    pub fn detect(root: &str) -> Self {
        let bytes = root.as_bytes();
        let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
        if drive || root.starts_with(r"\\") || (!root.contains('/') && root.contains('\\')) {
            Self::Backslash
        } else {
            Self::Slash
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Slash => '/',
            Self::Backslash => '\\',
        }
    }

    /// Whether `c` separates components under this convention. Windows
    /// accepts both characters.
    pub fn is_separator(self, c: char) -> bool {
        match self {
            Self::Slash => c == '/',
            Self::Backslash => c == '/' || c == '\\',
        }
    }

    /// Rewrite every separator in `path` to this convention
    pub fn apply(self, path: &str) -> String {
        let sep = self.as_char();
        path.chars()
            .map(|c| if is_separator(c) { sep } else { c })
            .collect()
    }
}

pub(crate) fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Normalise a path string for substring matching: `/` separators and,
/// optionally, ASCII lowercase.
pub(crate) fn normalize(path: &str, case_insensitive: bool) -> String {
    let unified = Separator::Slash.apply(path);
    if case_insensitive {
        unified.to_ascii_lowercase()
    } else {
        unified
    }
}

/// Join a configured relative path onto a root, in the root's separator
/// style. Configured subtrees may be written with either separator.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    let root = root.to_string_lossy();
    let sep = Separator::detect(&root);
    let trimmed_root = root.trim_end_matches(|c| sep.is_separator(c));
    let relative = relative.trim_start_matches(is_separator);
    if relative.is_empty() {
        return PathBuf::from(trimmed_root);
    }
    PathBuf::from(format!("{}{}{}", trimmed_root, sep.as_char(), sep.apply(relative)))
}

/// Maps paths between a project's host root and volume root
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTranslator {
    case_insensitive: bool,
}

impl PathTranslator {
    pub fn new(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Translate a host path into the project's volume namespace.
    ///
    /// Returns `None` when `host_path` is not under the project's host root;
    /// callers treat that as "not applicable to this project".
    pub fn to_volume_path(&self, host_path: &Path, project: &Project) -> Option<PathBuf> {
        self.substitute(host_path, project.host_root(), project.volume_root())
    }

    /// Translate a volume path into the project's host namespace
    pub fn to_host_path(&self, volume_path: &Path, project: &Project) -> Option<PathBuf> {
        self.substitute(volume_path, project.volume_root(), project.host_root())
    }

    /// Strip whichever project root prefixes `path`, for log lines
    pub fn short_path(&self, path: &Path, project: &Project) -> String {
        let text = path.to_string_lossy();
        for root in [project.host_root(), project.volume_root()] {
            if let Some(rest) = self.strip_root(&text, &root.to_string_lossy()) {
                return if rest.is_empty() {
                    Separator::detect(&root.to_string_lossy()).as_char().to_string()
                } else {
                    rest.to_string()
                };
            }
        }
        text.into_owned()
    }

    fn substitute(&self, path: &Path, from_root: &Path, to_root: &Path) -> Option<PathBuf> {
        let text = path.to_string_lossy();
        let from_root = from_root.to_string_lossy();
        let from = Separator::detect(&from_root);
        let rest = self.strip_root(&text, &from_root)?;

        let to_root = to_root.to_string_lossy();
        let to = Separator::detect(&to_root);
        let mut out = to_root.trim_end_matches(|c| to.is_separator(c)).to_string();
        if from == to {
            out.push_str(rest);
        } else {
            out.push_str(&to.apply(rest));
        }
        Some(PathBuf::from(out))
    }

    /// The remainder of `path` after `root` (starting with a separator, or
    /// empty), if `path` lies under `root` on a component boundary.
    fn strip_root<'a>(&self, path: &'a str, root: &str) -> Option<&'a str> {
        let style = Separator::detect(root);
        let root = root.trim_end_matches(|c| style.is_separator(c));
        if path.len() < root.len() || !path.is_char_boundary(root.len()) {
            return None;
        }

        let (head, rest) = path.split_at(root.len());
        let same = head
            .bytes()
            .zip(root.bytes())
            .all(|(a, b)| self.bytes_match(a, b, style));

        if !same {
            return None;
        }

        if rest.is_empty() || rest.starts_with(|c| style.is_separator(c)) {
            Some(rest)
        } else {
            None
        }
    }

    fn bytes_match(&self, a: u8, b: u8, style: Separator) -> bool {
        let unify = |c: u8| {
            if style == Separator::Backslash && c == b'\\' {
                b'/'
            } else {
                c
            }
        };
        let (a, b) = (unify(a), unify(b));
        if self.case_insensitive {
            a.eq_ignore_ascii_case(&b)
        } else {
            a == b
        }
    }
}
