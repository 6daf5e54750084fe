//! Shieldgate Decision Engine
//!
//! The per-request blocking decision pipeline: tracking protection,
//! ad-block matching across default / regional / custom rule sets, CNAME
//! uncloaking, CSP merging, and de-duplicated block counting.
//!
//! # Architecture
//!
//! A single engine task owns all mutable state (matchers, caches, counters)
//! and is driven through [`EngineHandle`] commands; see [`engine::spawn`].
//! The decision logic itself lives in [`pipeline::DecisionPipeline`], a
//! synchronous state machine with one explicit suspension point for DNS
//! alias resolution. Collaborators (resolver, counter store, block-event
//! sink) are injected, never ambient.

pub mod engine;
pub mod pipeline;
pub mod regional;
pub mod resolver;
pub mod telemetry;
pub mod tracking;

pub use engine::{spawn, EngineHandle};
pub use pipeline::{
    tags, CosmeticResources, DecisionPipeline, EngineConfig, PipelineOutcome, ScriptletInjection,
};
pub use regional::{
    is_supported_locale, ListError, RegionalCatalogEntry, RegionalListManager,
};
pub use resolver::{CnameResolver, MockResolver, NoopResolver, Resolution};
pub use telemetry::{
    BlockEventSink, BlockedCounters, BlockedEvent, CounterStore, LogEventSink, MemoryCounterStore,
    NullEventSink,
};
pub use tracking::TrackingProtection;
