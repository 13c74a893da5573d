//! Connection Classification Engine
//!
//! Decides allow/deny for connection tuples against an ordered rule set that
//! is replaced at runtime without blocking lookups.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  config loader                          connection handlers       │
//! │       │ submit_rule_changes                   │ lookup            │
//! │       ▼                                       ▼                   │
//! │  ┌──────────────────┐  publish   ┌─────────────────────────┐     │
//! │  │ UpdateCoordinator│──────────►│ ArcSwap<Generation>      │     │
//! │  │  FIFO, one build │           │  rules + MatcherIndex    │     │
//! │  │  RuleStore (CoW) │           └─────────────────────────┘     │
//! │  └──────────────────┘                        │ load()             │
//! │                                  ┌───────────┴──────────┐         │
//! │                                  │ Classifier (per thread)│        │
//! │                                  │ [cache] ─► index       │        │
//! │                                  └───────────┬──────────┘         │
//! │                                              ▼                    │
//! │                                   Verdict + AuditSink             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rules are evaluated by specificity class (source+port, source only,
//! port only, wildcard), then priority, then longer source prefix, then
//! insertion order. The first match decides; no match is a default deny.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod generation;
pub mod index;
pub mod rule;
pub mod store;

pub use audit::{AuditEvent, AuditSink, ChannelAuditSink, NoopAuditSink};
pub use cache::VerdictCache;
pub use classifier::{Classifier, LookupStats};
pub use config::EngineConfig;
pub use coordinator::{BatchReceipt, CancelToken, CoordinatorState, CoordinatorStats, RuleChange, UpdateCoordinator};
pub use engine::{Engine, EngineStats};
pub use generation::Generation;
pub use index::{IndexMatch, IndexStats, MatcherIndex};
pub use rule::{canonical_order, PortRange, PortSpec, Rule, RuleSpec, SpecificityClass};
pub use store::RuleStore;

pub use netgate_common::{
    Action, ConnectionTuple, EngineError, EngineResult, GenerationId, IndexBuildError, Protocol, RuleError, RuleId,
    Verdict,
};
