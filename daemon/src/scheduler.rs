use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mirror::{Orchestrator, TickOutcome};

/// Reverse ticks spawned per project and not yet reaped
type TickHandles = Arc<Mutex<HashMap<String, Vec<JoinHandle<()>>>>>;

/// Periodic drivers: the shared governor timer and one reverse poll timer
/// per project
#[derive(Debug, Default)]
pub struct MirrorScheduler {
    tasks: HashMap<String, JoinHandle<()>>,
    ticks: TickHandles,
}

impl MirrorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        orchestrator: Arc<Orchestrator>,
        governor_interval: Duration,
        poll_interval: Duration,
    ) {
        let governor = orchestrator.clone();
        self.tasks.insert(
            "governor".to_string(),
            tokio::spawn(Self::run_governor(governor, governor_interval)),
        );

        for project in orchestrator.reverse_projects() {
            let handle = tokio::spawn(Self::run_reverse(
                orchestrator.clone(),
                project.clone(),
                poll_interval,
                self.ticks.clone(),
            ));
            self.tasks.insert(format!("reverse:{}", project), handle);
        }

        info!(tasks = self.tasks.len(), "Scheduler started");
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Reverse ticks still running
    pub fn in_flight(&self) -> usize {
        self.ticks
            .lock()
            .values()
            .flatten()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stop the timers, then wait for reverse ticks already running so
    /// nothing writes to the host tree afterwards
    pub async fn shutdown(&mut self) {
        for (name, handle) in self.tasks.drain() {
            debug!("Stopping scheduler task: {}", name);
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Scheduler task {} ended abnormally: {}", name, e);
                }
            }
        }

        let pending: Vec<(String, JoinHandle<()>)> = self
            .ticks
            .lock()
            .drain()
            .flat_map(|(project, handles)| handles.into_iter().map(move |h| (project.clone(), h)))
            .collect();
        for (project, handle) in pending {
            if let Err(e) = handle.await {
                warn!(project = %project, "Reverse tick ended abnormally: {}", e);
            }
        }
    }

    /// Abort timers and in-flight ticks without waiting
    pub fn stop(&mut self) {
        for (name, handle) in self.tasks.drain() {
            debug!("Stopping scheduler task: {}", name);
            handle.abort();
        }
        for (_, handles) in self.ticks.lock().drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }

    async fn run_governor(orchestrator: Arc<Orchestrator>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let reloaded = orchestrator.evaluate_governor().await;
            if !reloaded.is_empty() {
                info!(projects = ?reloaded, "Watch sessions reloaded");
            }
        }
    }

    async fn run_reverse(
        orchestrator: Arc<Orchestrator>,
        project: String,
        interval: Duration,
        ticks: TickHandles,
    ) {
        info!(project = %project, "Starting reverse polling every {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // Skip the first immediate tick

        loop {
            ticker.tick().await;

            // each tick runs detached; the engine skips a tick while one is in flight
            let tick_orchestrator = orchestrator.clone();
            let tick_project = project.clone();
            let handle = tokio::spawn(async move {
                match tick_orchestrator.reverse_tick(&tick_project).await {
                    Ok(TickOutcome::Completed { applied, failed }) if applied > 0 || failed > 0 => {
                        debug!(project = %tick_project, applied, failed, "Reverse tick finished");
                    }
                    Ok(_) => {}
                    Err(e) => error!(project = %tick_project, error = %e, "Reverse tick failed"),
                }
            });

            let mut ticks = ticks.lock();
            let handles = ticks.entry(project.clone()).or_default();
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }
}

impl Drop for MirrorScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
