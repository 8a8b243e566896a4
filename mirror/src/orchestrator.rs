//! Per-project watch sessions and their lifecycle
//!
//! The orchestrator owns every piece of per-project state: the forward
//! session (subscription + task), the reverse engine with its fingerprint
//! cache, and the project's [`ProjectState`]. The governor's reload signal
//! is acted upon here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::effect::EffectApplier;
use crate::error::{MirrorError, Result};
use crate::fingerprint::{FingerprintAlgorithm, Fingerprinter};
use crate::forward::ForwardEngine;
use crate::governor::{EventRateGovernor, GovernorSettings, GovernorState};
use crate::project::{Project, ProjectState};
use crate::report::Reporter;
use crate::reverse::{ReverseEngine, TickOutcome};
use crate::subscription::SubscriptionSource;
use crate::translate::PathTranslator;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub case_insensitive: bool,
    pub algorithm: FingerprintAlgorithm,
    pub governor: GovernorSettings,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<usize>,
}

pub struct Orchestrator {
    projects: Vec<Arc<Project>>,
    translator: PathTranslator,
    applier: EffectApplier,
    governor: Arc<EventRateGovernor>,
    source: Arc<dyn SubscriptionSource>,
    reporter: Arc<dyn Reporter>,
    reverse: HashMap<String, Arc<ReverseEngine>>,
    sessions: tokio::sync::Mutex<HashMap<String, Session>>,
    states: Mutex<HashMap<String, ProjectState>>,
}

impl Orchestrator {
    /// Build the per-project state. Watched subtrees missing from the volume
    /// are dropped here.
    pub fn new(
        projects: Vec<Project>,
        settings: OrchestratorSettings,
        source: Arc<dyn SubscriptionSource>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        if projects.is_empty() {
            return Err(MirrorError::config_error("no projects to watch"));
        }

        let mut seen = HashSet::new();
        for project in &projects {
            if !seen.insert(project.name().to_string()) {
                return Err(MirrorError::config_error(format!(
                    "project '{}' is configured twice",
                    project.name()
                )));
            }
        }

        let translator = PathTranslator::new(settings.case_insensitive);
        let fingerprinter = Fingerprinter::new(settings.algorithm);
        let applier = EffectApplier::new(fingerprinter, translator);

        let mut reverse = HashMap::new();
        let mut states = HashMap::new();
        let projects: Vec<Arc<Project>> = projects
            .into_iter()
            .map(|mut project| {
                for missing in project.retain_existing_watched() {
                    warn!(
                        project = %project.name(),
                        subtree = %missing,
                        "Watched subtree not found in volume, ignored"
                    );
                }
                Arc::new(project)
            })
            .collect();

        for project in &projects {
            reverse.insert(
                project.name().to_string(),
                Arc::new(ReverseEngine::new(
                    project.clone(),
                    translator,
                    fingerprinter,
                    reporter.clone(),
                )),
            );
            states.insert(project.name().to_string(), ProjectState::NotStarted);
        }

        Ok(Self {
            projects,
            translator,
            applier,
            governor: Arc::new(EventRateGovernor::new(settings.governor)),
            source,
            reporter,
            reverse,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            states: Mutex::new(states),
        })
    }

    pub fn projects(&self) -> &[Arc<Project>] {
        &self.projects
    }

    pub fn governor(&self) -> &EventRateGovernor {
        &self.governor
    }

    pub fn state(&self, project: &str) -> Option<ProjectState> {
        self.states.lock().get(project).copied()
    }

    /// Projects with at least one polled subtree
    pub fn reverse_projects(&self) -> Vec<String> {
        self.projects
            .iter()
            .filter(|p| self.reverse.get(p.name()).map_or(false, |r| r.is_active()))
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Subscribe every project and spawn its forward task
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;

        for project in &self.projects {
            if sessions.contains_key(project.name()) {
                continue;
            }
            let session = self.open_session(project)?;
            sessions.insert(project.name().to_string(), session);
            self.set_state(project.name(), ProjectState::Watching);
            info!(project = %project.name(), host_root = %project.host_root().display(), "Watching project");
        }

        Ok(())
    }

    /// Evaluate the governor for every project, reloading the ones whose
    /// storm has settled. Returns the reloaded project names.
    pub async fn evaluate_governor(&self) -> Vec<String> {
        let mut reloaded = Vec::new();

        for project in &self.projects {
            let name = project.name();
            match self.governor.evaluate(name) {
                GovernorState::Idle => {}
                GovernorState::Spiking => {
                    if self.state(name) == Some(ProjectState::Watching) {
                        self.set_state(name, ProjectState::Storming);
                    }
                }
                GovernorState::ReloadRequired => match self.reload(name).await {
                    Ok(()) => reloaded.push(name.to_string()),
                    // governor stays in ReloadRequired: retried on the next evaluation
                    Err(e) => error!(project = %name, error = %e, "Failed to reload watch session"),
                },
            }
        }

        reloaded
    }

    /// Tear down a project's subscription, wait for its task to finish and
    /// subscribe again with a cleared governor history.
    #[instrument(skip(self))]
    pub async fn reload(&self, project: &str) -> Result<()> {
        let target = self
            .find(project)
            .ok_or_else(|| MirrorError::UnknownProject(project.to_string()))?
            .clone();

        let mut sessions = self.sessions.lock().await;
        self.set_state(project, ProjectState::Reloading);

        if let Some(old) = sessions.remove(project) {
            old.cancel.cancel();
            match old.handle.await {
                Ok(applied) => info!(applied, "Old watch session drained"),
                Err(e) => warn!(error = %e, "Forward task ended abnormally"),
            }
        }

        let session = self.open_session(&target)?;
        sessions.insert(project.to_string(), session);

        self.governor.reset(project);
        self.reporter.reloaded(project);
        self.set_state(project, ProjectState::Watching);
        info!("Watch session recreated");
        Ok(())
    }

    /// One single-flight reverse poll for `project`
    pub async fn reverse_tick(&self, project: &str) -> Result<TickOutcome> {
        let engine = self
            .reverse
            .get(project)
            .ok_or_else(|| MirrorError::UnknownProject(project.to_string()))?;
        Ok(engine.tick().await)
    }

    /// Close every subscription and wait for the forward tasks
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;

        for session in sessions.values() {
            session.cancel.cancel();
        }
        for (project, session) in sessions.drain() {
            if let Err(e) = session.handle.await {
                warn!(project = %project, error = %e, "Forward task ended abnormally");
            }
            self.set_state(&project, ProjectState::NotStarted);
        }

        info!("All watch sessions closed");
    }

    fn open_session(&self, project: &Arc<Project>) -> Result<Session> {
        let subscription = self.source.subscribe(project)?;
        let engine = ForwardEngine::new(
            project.clone(),
            self.translator,
            self.applier,
            self.governor.clone(),
            self.reporter.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(subscription, cancel.clone()));
        Ok(Session { cancel, handle })
    }

    fn find(&self, project: &str) -> Option<&Arc<Project>> {
        self.projects.iter().find(|p| p.name() == project)
    }

    fn set_state(&self, project: &str, state: ProjectState) {
        self.states.lock().insert(project.to_string(), state);
    }
}
