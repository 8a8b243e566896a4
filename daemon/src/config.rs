use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use mirror::{
    FingerprintAlgorithm, GovernorSettings, IgnoreRules, OrchestratorSettings, Project, RootLayout,
    WatchList, PROJECT_PLACEHOLDER, STACK_PLACEHOLDER,
};

use crate::discovery::{self, ComposeFile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    pub layout: LayoutConfig,
    #[serde(default)]
    pub projects: ProjectsConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub reverse: ReverseConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Reverse direction polling period
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How often the storm governor is evaluated
    #[serde(default = "default_governor_interval", with = "humantime_serde")]
    pub governor_interval: Duration,
    /// Play a sound when an event or file fails to mirror
    #[serde(default = "default_alert_on_failure")]
    pub alert_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Directory holding every project directory on the host
    pub host_root: String,
    /// Volume root of a project; `{project}` and `{stack}` are substituted
    pub volume_root_template: String,
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsConfig {
    /// Explicit project names; discovered from `compose_file` when empty
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub compose_file: Option<PathBuf>,
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Host paths never reported by the watcher
    #[serde(default = "default_ignore_rules")]
    pub ignore: IgnoreRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseConfig {
    /// Project -> volume subtrees polled back to the host
    #[serde(default = "default_watch_list")]
    pub watch: WatchList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_storm_threshold")]
    pub storm_threshold: u32,
    #[serde(default = "default_quiet_period", with = "humantime_serde")]
    pub quiet_period: Duration,
    #[serde(default = "default_history_window", with = "humantime_serde")]
    pub history_window: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintConfig {
    #[serde(default)]
    pub algorithm: FingerprintAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Projects ready to hand to the orchestrator
#[derive(Debug)]
pub struct ResolvedProjects {
    pub layout: RootLayout,
    pub projects: Vec<Project>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings::default(),
            layout: LayoutConfig::default(),
            projects: ProjectsConfig::default(),
            forward: ForwardConfig::default(),
            reverse: ReverseConfig::default(),
            governor: GovernorConfig::default(),
            fingerprint: FingerprintConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            poll_interval: default_poll_interval(),
            governor_interval: default_governor_interval(),
            alert_on_failure: default_alert_on_failure(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            host_root: home.join("projects").to_string_lossy().into_owned(),
            volume_root_template: "/var/lib/docker/volumes/{stack}_{project}/_data".to_string(),
            case_insensitive: default_case_insensitive(),
        }
    }
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            compose_file: None,
            mount_point: default_mount_point(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            ignore: default_ignore_rules(),
        }
    }
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            watch: default_watch_list(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            storm_threshold: default_storm_threshold(),
            quiet_period: default_quiet_period(),
            history_window: default_history_window(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_metrics_port(),
        }
    }
}

impl From<&GovernorConfig> for GovernorSettings {
    fn from(config: &GovernorConfig) -> Self {
        Self {
            storm_threshold: config.storm_threshold,
            quiet_period: config.quiet_period,
            history_window: config.history_window,
        }
    }
}

impl MirrorConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: MirrorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Checks that need no filesystem access
    pub fn validate(&self) -> Result<()> {
        if self.layout.host_root.trim().is_empty() {
            anyhow::bail!("layout.host_root cannot be empty");
        }
        if self.layout.volume_root_template.trim().is_empty() {
            anyhow::bail!("layout.volume_root_template cannot be empty");
        }
        if !self.layout.volume_root_template.contains(PROJECT_PLACEHOLDER) {
            anyhow::bail!(
                "layout.volume_root_template must contain {}",
                PROJECT_PLACEHOLDER
            );
        }
        if self.projects.names.iter().any(|n| n.trim().is_empty()) {
            anyhow::bail!("projects.names cannot contain empty names");
        }
        if self.projects.names.is_empty() && self.projects.compose_file.is_none() {
            anyhow::bail!("Either projects.names or projects.compose_file must be set");
        }
        if self.governor.storm_threshold == 0 {
            anyhow::bail!("governor.storm_threshold must be greater than 0");
        }
        if self.daemon.poll_interval.is_zero() {
            anyhow::bail!("daemon.poll_interval must be greater than 0");
        }
        if self.daemon.governor_interval.is_zero() {
            anyhow::bail!("daemon.governor_interval must be greater than 0");
        }
        if self.governor.quiet_period.is_zero() {
            anyhow::bail!("governor.quiet_period must be greater than 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("metrics.port must be set when metrics are enabled");
        }
        Ok(())
    }

    /// Resolve the project set: explicit names or compose discovery, each
    /// with an existing host directory
    pub async fn resolve_projects(&self) -> Result<ResolvedProjects> {
        self.validate()?;

        let mut layout = RootLayout::new(
            self.layout.host_root.clone(),
            self.layout.volume_root_template.clone(),
        )?;

        let compose = match &self.projects.compose_file {
            Some(path) => Some(ComposeFile::load(path).await?),
            None => None,
        };
        if let Some(stack) = compose.as_ref().and_then(|c| c.name.clone()) {
            layout = layout.with_stack(stack);
        }
        if layout.stack().is_none() && self.layout.volume_root_template.contains(STACK_PLACEHOLDER) {
            anyhow::bail!(
                "layout.volume_root_template uses {} but no compose stack name is available",
                STACK_PLACEHOLDER
            );
        }

        let names = if !self.projects.names.is_empty() {
            self.projects.names.clone()
        } else {
            match &compose {
                Some(compose) => {
                    discovery::discover(compose, &self.projects.mount_point, layout.host_base())?
                }
                None => Vec::new(),
            }
        };

        if names.is_empty() {
            anyhow::bail!("No projects to watch");
        }

        let mut projects = Vec::with_capacity(names.len());
        for name in &names {
            let project = layout
                .project(name)?
                .with_watch_list(&self.reverse.watch, self.layout.case_insensitive);
            if !project.host_root().is_dir() {
                anyhow::bail!(
                    "Host directory of project '{}' does not exist: {}",
                    name,
                    project.host_root().display()
                );
            }
            if !project.volume_root().is_dir() {
                warn!(
                    project = %name,
                    volume_root = %project.volume_root().display(),
                    "Volume root not found, it will be created on first write"
                );
            }
            projects.push(project);
        }

        info!(count = projects.len(), "Projects resolved");
        Ok(ResolvedProjects { layout, projects })
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            case_insensitive: self.layout.case_insensitive,
            algorithm: self.fingerprint.algorithm,
            governor: GovernorSettings::from(&self.governor),
        }
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_poll_interval() -> Duration { Duration::from_secs(5) }
fn default_governor_interval() -> Duration { Duration::from_secs(1) }
fn default_alert_on_failure() -> bool { true }

fn default_case_insensitive() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

fn default_mount_point() -> String { "/app".to_string() }

fn default_ignore_rules() -> IgnoreRules {
    IgnoreRules::new([".git/", ".idea/", "vendor/", "node_modules/", "storage/framework/"])
}

fn default_watch_list() -> WatchList {
    WatchList::from_entries([("*", vec!["storage/logs", "bootstrap/cache"])])
}

fn default_storm_threshold() -> u32 { 5 }
fn default_quiet_period() -> Duration { Duration::from_secs(2) }
fn default_history_window() -> Duration { Duration::from_secs(60) }

fn default_bind_address() -> String { "127.0.0.1".to_string() }
fn default_metrics_port() -> u16 { 9184 }
