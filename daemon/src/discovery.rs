//! Project discovery from a docker compose file
//!
//! Every named volume mounted at the configured mount point is a project,
//! provided the matching directory exists under the host root.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
pub struct ComposeFile {
    /// Stack name, fills `{stack}` in the volume template
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    services: serde_yaml::Mapping,
}

#[derive(Debug, Default, Deserialize)]
struct Service {
    #[serde(default)]
    volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VolumeSpec {
    /// `source:target[:mode]`
    Short(String),
    Long {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        source: Option<String>,
        target: String,
    },
}

impl VolumeSpec {
    /// Named volume and its mount target, for named-volume entries
    fn named_volume(&self) -> Option<(&str, &str)> {
        match self {
            Self::Short(spec) => {
                let mut parts = spec.splitn(3, ':');
                let source = parts.next()?;
                let target = parts.next()?;
                is_named(source).then_some((source, target))
            }
            Self::Long { kind, source, target } => {
                if kind.as_deref().map_or(false, |k| k != "volume") {
                    return None;
                }
                let source = source.as_deref()?;
                is_named(source).then_some((source, target.as_str()))
            }
        }
    }
}

fn is_named(source: &str) -> bool {
    !source.is_empty() && !source.starts_with(['.', '/', '~', '\\']) && !source.contains(['/', '\\'])
}

fn same_mount(target: &str, mount_point: &str) -> bool {
    let trim = |s: &str| s.trim_end_matches('/').to_ascii_lowercase();
    trim(target) == trim(mount_point)
}

impl ComposeFile {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read compose file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid compose file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Named volumes mounted at `mount_point`, in service order, deduplicated
    pub fn mounted_volumes(&self, mount_point: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();

        for (service_name, value) in &self.services {
            let service: Service = serde_yaml::from_value(value.clone()).with_context(|| {
                format!("Invalid service definition {:?}", service_name.as_str().unwrap_or("?"))
            })?;

            for volume in &service.volumes {
                if let Some((source, target)) = volume.named_volume() {
                    if same_mount(target, mount_point) && !names.iter().any(|n| n == source) {
                        names.push(source.to_string());
                    }
                }
            }
        }

        Ok(names)
    }
}

/// Projects from `compose`: mounted named volumes with a host directory
pub fn discover(compose: &ComposeFile, mount_point: &str, host_base: &Path) -> Result<Vec<String>> {
    let mut projects = Vec::new();

    for name in compose.mounted_volumes(mount_point)? {
        if host_base.join(&name).is_dir() {
            projects.push(name);
        } else {
            debug!(project = %name, "No host directory for volume, skipped");
        }
    }

    info!(count = projects.len(), "Discovered projects from compose file");
    Ok(projects)
}
