//! Hooks for alerts and metrics
//!
//! Engines log their own failures; a [`Reporter`] adds whatever the host
//! process wants on top (alert sounds, counters).

use tracing::{debug, info};

use crate::effect::{Direction, EffectKind};
use crate::error::MirrorError;

pub trait Reporter: Send + Sync {
    /// An effect mutated the target namespace
    fn effect_applied(&self, _project: &str, _direction: Direction, _kind: EffectKind) {}

    /// A single event or poll failed; the stream keeps going
    fn failure(&self, _project: &str, _direction: Direction, _error: &MirrorError) {}

    /// A reverse poll was skipped because the previous one was still running
    fn tick_skipped(&self, _project: &str) {}

    /// A watch session was torn down and recreated after a storm
    fn reloaded(&self, _project: &str) {}
}

/// Reporter that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn tick_skipped(&self, project: &str) {
        debug!(project, "Reverse poll still running, tick skipped");
    }

    fn reloaded(&self, project: &str) {
        info!(project, "Watch session reloaded");
    }
}
