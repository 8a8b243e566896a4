use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use mirror::Orchestrator;

use crate::config::MirrorConfig;
use crate::scheduler::MirrorScheduler;
use crate::telemetry::{DaemonReporter, MirrorMetrics};
use crate::watcher::NotifySource;

pub struct MirrorDaemon {
    config: MirrorConfig,
    orchestrator: Arc<Orchestrator>,
    metrics: MirrorMetrics,
    scheduler: MirrorScheduler,
    tasks: HashMap<String, tokio::task::JoinHandle<()>>,
}

impl MirrorDaemon {
    pub async fn new(config: MirrorConfig) -> Result<Self> {
        info!("Initializing mirror daemon");

        let resolved = config.resolve_projects().await?;
        for project in &resolved.projects {
            info!(
                project = %project.name(),
                host = %project.host_root().display(),
                volume = %project.volume_root().display(),
                "Project configured"
            );
        }

        let metrics = MirrorMetrics::new()?;
        let reporter = Arc::new(DaemonReporter::new(metrics.clone(), config.daemon.alert_on_failure));
        let source = Arc::new(NotifySource::new(
            config.forward.ignore.clone(),
            config.layout.case_insensitive,
        ));

        let orchestrator = Orchestrator::new(
            resolved.projects,
            config.orchestrator_settings(),
            source,
            reporter,
        )?;

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            metrics,
            scheduler: MirrorScheduler::new(),
            tasks: HashMap::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!("Starting mirror daemon");

        if self.config.metrics.enabled {
            self.start_metrics_server();
        }

        self.orchestrator.start().await?;
        self.scheduler.start(
            self.orchestrator.clone(),
            self.config.daemon.governor_interval,
            self.config.daemon.poll_interval,
        );

        info!(
            projects = self.orchestrator.projects().len(),
            polled = self.orchestrator.reverse_projects().len(),
            "Mirror daemon started successfully"
        );

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        } else {
            info!("Ctrl+C received, shutting down");
        }

        self.shutdown().await;
        info!("Mirror daemon stopped");
        Ok(())
    }

    fn start_metrics_server(&mut self) {
        let bind_addr = format!(
            "{}:{}",
            self.config.metrics.bind_address, self.config.metrics.port
        );
        let app = self.metrics.router();

        let handle = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to bind metrics server to {}: {}", bind_addr, e);
                    return;
                }
            };
            info!("Metrics server listening on {}", bind_addr);
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server failed: {}", e);
            }
        });

        self.tasks.insert("metrics_server".to_string(), handle);
    }

    async fn shutdown(&mut self) {
        info!("Shutting down mirror daemon");

        self.scheduler.shutdown().await;
        self.orchestrator.shutdown().await;

        for (name, handle) in self.tasks.drain() {
            debug!("Stopping task: {}", name);
            handle.abort();
        }
    }
}

impl Drop for MirrorDaemon {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}
