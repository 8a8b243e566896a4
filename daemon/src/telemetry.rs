//! Telemetry module for logging, alerts and metrics
//!
//! This module provides:
//! - Console logging plus an optional daily-rolling log file
//! - An audible alert on failed mirror operations
//! - Prometheus counters exposed over HTTP

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{IntCounterVec, Opts, Registry};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{error, info};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mirror::{Direction, EffectKind, MirrorError, Reporter};

/// Install the global subscriber. The returned guard must live as long as
/// the process so buffered file output gets flushed.
pub fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("mirror_daemon={level},mirror={level},mirror::ops=info"))
    });

    let console_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match log_file {
        Some(log_path) => {
            let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let file_name = log_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("mirror-daemon.log"));

            let (non_blocking, guard) = tracing_appender::non_blocking(rolling::daily(dir, file_name));
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Prometheus counters for mirror activity
#[derive(Clone)]
pub struct MirrorMetrics {
    registry: Registry,
    pub effects_total: IntCounterVec,
    pub failures_total: IntCounterVec,
    pub reloads_total: IntCounterVec,
    pub reverse_ticks_skipped_total: IntCounterVec,
}

impl MirrorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let effects_total = IntCounterVec::new(
            Opts::new("mirror_effects_total", "Filesystem effects applied"),
            &["project", "direction", "kind"],
        )?;

        let failures_total = IntCounterVec::new(
            Opts::new("mirror_failures_total", "Events or files that failed to mirror"),
            &["project", "direction"],
        )?;

        let reloads_total = IntCounterVec::new(
            Opts::new("mirror_reloads_total", "Watch sessions recreated after a storm"),
            &["project"],
        )?;

        let reverse_ticks_skipped_total = IntCounterVec::new(
            Opts::new(
                "mirror_reverse_ticks_skipped_total",
                "Reverse polls skipped because the previous one was still running",
            ),
            &["project"],
        )?;

        registry.register(Box::new(effects_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(reloads_total.clone()))?;
        registry.register(Box::new(reverse_ticks_skipped_total.clone()))?;

        Ok(Self {
            registry,
            effects_total,
            failures_total,
            reloads_total,
            reverse_ticks_skipped_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.registry.clone())
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(output) => (StatusCode::OK, output).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Reporter used by the daemon: counters plus an alert sound on failures
pub struct DaemonReporter {
    metrics: MirrorMetrics,
    alert: bool,
}

impl DaemonReporter {
    pub fn new(metrics: MirrorMetrics, alert: bool) -> Self {
        Self { metrics, alert }
    }
}

impl Reporter for DaemonReporter {
    fn effect_applied(&self, project: &str, direction: Direction, kind: EffectKind) {
        self.metrics
            .effects_total
            .with_label_values(&[project, direction.as_str(), kind.as_str()])
            .inc();
    }

    fn failure(&self, project: &str, direction: Direction, _error: &MirrorError) {
        self.metrics
            .failures_total
            .with_label_values(&[project, direction.as_str()])
            .inc();
        if self.alert {
            play_alert();
        }
    }

    fn tick_skipped(&self, project: &str) {
        self.metrics
            .reverse_ticks_skipped_total
            .with_label_values(&[project])
            .inc();
    }

    fn reloaded(&self, project: &str) {
        info!(project = %project, "Watch session reloaded");
        self.metrics.reloads_total.with_label_values(&[project]).inc();
    }
}

/// Fire-and-forget system beep
pub fn play_alert() {
    let spawned = if cfg!(windows) {
        Command::new("powershell")
            .args(["-NoProfile", "-Command", "[console]::beep(1000,300)"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    } else if cfg!(target_os = "macos") {
        Command::new("afplay")
            .arg("/System/Library/Sounds/Funk.aiff")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    } else {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07").and_then(|_| stderr.flush())
    };

    if let Err(e) = spawned {
        tracing::debug!("Alert sound unavailable: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_reporter_updates_counters() {
        let metrics = MirrorMetrics::new().unwrap();
        let reporter = DaemonReporter::new(metrics.clone(), false);

        reporter.effect_applied("shop", Direction::HostToVolume, EffectKind::Update);
        reporter.effect_applied("shop", Direction::HostToVolume, EffectKind::Update);
        reporter.failure("shop", Direction::VolumeToHost, &MirrorError::config_error("x"));
        reporter.reloaded("shop");
        reporter.tick_skipped("shop");

        assert_eq!(
            metrics
                .effects_total
                .with_label_values(&["shop", Direction::HostToVolume.as_str(), EffectKind::Update.as_str()])
                .get(),
            2
        );
        assert_eq!(metrics.reloads_total.with_label_values(&["shop"]).get(), 1);

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&metrics.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("mirror_failures_total"));
        assert!(text.contains("mirror_reverse_ticks_skipped_total"));
    }
}
