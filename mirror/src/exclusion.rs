//! Watch lists and exclusion rules
//!
//! Two rule sets keep the directions from fighting over the same files:
//! the reverse [`WatchList`] decides which volume subtrees are polled, and the
//! forward exclusion derived from it keeps host events for those subtrees
//! from being pushed back. [`IgnoreRules`] is the separate predicate handed to
//! the host notification backend.

use std::collections::BTreeMap;
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::translate::normalize;

/// Key of the default entry, and the marker that merges it into a project list
pub const WILDCARD: &str = "*";

/// Reverse-direction watch list: project name -> subtrees, with an optional
/// `"*"` default entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchList {
    entries: BTreeMap<String, Vec<String>>,
}

impl WatchList {
    pub fn new(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self { entries }
    }

    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, Vec<V>)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Default subtrees (the `"*"` entry, without the marker itself)
    pub fn defaults(&self) -> Vec<&str> {
        self.entries
            .get(WILDCARD)
            .map(|list| {
                list.iter()
                    .map(String::as_str)
                    .filter(|entry| *entry != WILDCARD)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Explicit list configured for a project, if any
    pub fn explicit(&self, project: &str) -> Option<&[String]> {
        if project == WILDCARD {
            return None;
        }
        self.entries.get(project).map(Vec::as_slice)
    }

    /// Subtrees polled for `project`.
    ///
    /// An explicit list wins; a `"*"` inside it merges the defaults. Without
    /// an explicit list the defaults apply. An explicit empty list means
    /// nothing is polled.
    pub fn resolve(&self, project: &str) -> Vec<String> {
        let defaults = self.defaults();

        let Some(explicit) = self.explicit(project) else {
            return defaults.into_iter().map(str::to_string).collect();
        };

        let merge_defaults = explicit.iter().any(|e| e == WILDCARD) && !defaults.is_empty();
        let mut resolved: Vec<String> = Vec::new();
        let candidates = explicit
            .iter()
            .map(String::as_str)
            .chain(if merge_defaults { defaults } else { Vec::new() });

        for entry in candidates {
            if entry != WILDCARD && !resolved.iter().any(|r| r == entry) {
                resolved.push(entry.to_string());
            }
        }
        resolved
    }

    /// Host-side exclusion derived from this list for `project`.
    ///
    /// With an explicit non-empty list, an entry excludes any path containing
    /// `<sep><entry>` and `"*"` pulls in the defaults under the same rule.
    /// Without an explicit list the defaults only match whole directories
    /// (`<sep><entry><sep>`). An explicit empty list excludes nothing.
    pub fn forward_exclusion(&self, project: &str, case_insensitive: bool) -> ForwardExclusion {
        match self.explicit(project) {
            Some(explicit) if !explicit.is_empty() => {
                let mut patterns: Vec<String> = Vec::new();
                for entry in explicit {
                    if entry == WILDCARD {
                        patterns.extend(self.defaults().into_iter().map(str::to_string));
                    } else {
                        patterns.push(entry.clone());
                    }
                }
                ForwardExclusion::new(patterns, false, case_insensitive)
            }
            Some(_) => ForwardExclusion::default(),
            None => ForwardExclusion::new(
                self.defaults().into_iter().map(str::to_string).collect(),
                true,
                case_insensitive,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Substring predicate over separator-normalised host paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardExclusion {
    needles: Vec<String>,
    case_insensitive: bool,
}

impl ForwardExclusion {
    pub fn new(patterns: Vec<String>, whole_directory: bool, case_insensitive: bool) -> Self {
        let needles = patterns
            .iter()
            .map(|p| {
                let p = normalize(p, case_insensitive);
                let p = p.trim_matches('/');
                if whole_directory {
                    format!("/{}/", p)
                } else {
                    format!("/{}", p)
                }
            })
            .collect();

        Self {
            needles,
            case_insensitive,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.needles.is_empty() {
            return false;
        }
        let path = normalize(&path.to_string_lossy(), self.case_insensitive);
        self.needles.iter().any(|needle| path.contains(needle.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }
}

/// Ignore predicate for host notifications.
///
/// A pattern starting with `*` matches anywhere in the path; any other
/// pattern is anchored at the project directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new<S: Into<String>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Build the matcher for one project
    pub fn for_project(&self, project: &str, case_insensitive: bool) -> IgnoreMatcher {
        let project = normalize(project, case_insensitive);
        let needles = self
            .patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|pattern| {
                let pattern = normalize(pattern, case_insensitive);
                match pattern.strip_prefix(WILDCARD) {
                    Some(anywhere) => anywhere.to_string(),
                    None if pattern.starts_with('/') => format!("/{}{}", project, pattern),
                    None => format!("/{}/{}", project, pattern),
                }
            })
            .collect();

        IgnoreMatcher {
            needles,
            case_insensitive,
        }
    }
}

/// [`IgnoreRules`] bound to a project
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    needles: Vec<String>,
    case_insensitive: bool,
}

impl IgnoreMatcher {
    pub fn is_ignored(&self, path: &Path) -> bool {
        let path = normalize(&path.to_string_lossy(), self.case_insensitive);
        self.needles.iter().any(|needle| path.contains(needle.as_str()))
    }
}
