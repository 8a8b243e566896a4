//! Mirror Engine Library
//!
//! Keeps project trees mirrored between a host namespace and a volume
//! namespace:
//! - Path translation between the two namespaces
//! - Content fingerprints to skip redundant writes
//! - Idempotent filesystem effects
//! - Storm detection with watch-session reloads
//! - Event-driven host -> volume and polled volume -> host engines

pub mod error;
pub mod translate;
pub mod project;
pub mod exclusion;
pub mod fingerprint;
pub mod scanner;
pub mod effect;
pub mod governor;
pub mod subscription;
pub mod report;
pub mod forward;
pub mod reverse;
pub mod orchestrator;

// Re-export main types
pub use error::{MirrorError, Result};
pub use translate::{PathTranslator, Separator};
pub use project::{Project, ProjectState, RootLayout, PROJECT_PLACEHOLDER, STACK_PLACEHOLDER};
pub use exclusion::{ForwardExclusion, IgnoreMatcher, IgnoreRules, WatchList, WILDCARD};
pub use fingerprint::{Fingerprint, FingerprintAlgorithm, FingerprintCache, Fingerprinter};
pub use scanner::list_files;
pub use effect::{Direction, EffectApplier, EffectKind, SyncEvent};
pub use governor::{EventRateGovernor, GovernorSettings, GovernorState, OperationCounter};
pub use subscription::{ChannelSubscription, FsEvent, FsEventKind, Subscription, SubscriptionSource};
pub use report::{LogReporter, Reporter};
pub use forward::ForwardEngine;
pub use reverse::{ReverseEngine, TickOutcome};
pub use orchestrator::{Orchestrator, OrchestratorSettings};

#[cfg(test)]
mod engine_tests;
