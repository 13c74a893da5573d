//! Engine facade: one coordinator and one classifier over a shared generation cell

use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::channel::Receiver;
use netgate_common::metrics::HistogramSnapshot;
use netgate_common::{ConnectionTuple, EngineError, EngineResult, GenerationId, RuleId, Verdict};
use tracing::info;

use crate::audit::{AuditEvent, AuditSink, ChannelAuditSink, NoopAuditSink};
use crate::cache::VerdictCache;
use crate::classifier::Classifier;
use crate::config::EngineConfig;
use crate::coordinator::{BatchReceipt, CancelToken, CoordinatorState, RuleChange, UpdateCoordinator};
use crate::generation::Generation;
use crate::index::IndexStats;
use crate::rule::RuleSpec;

/// Connection classification engine
///
/// `submit_rule_changes` is the entry point for configuration loaders and
/// `lookup` the one for connection handlers. Worker threads should take a
/// [`Classifier`] handle via [`Engine::classifier`] rather than share the
/// engine itself.
pub struct Engine {
    config: EngineConfig,
    coordinator: UpdateCoordinator,
    classifier: Classifier,
    cache: Option<Arc<VerdictCache>>,
}

impl Engine {
    /// Create engine without auditing
    pub fn new(config: EngineConfig) -> Self {
        Self::with_audit_sink(config, Arc::new(NoopAuditSink))
    }

    /// Create engine delivering audit events to `sink`
    pub fn with_audit_sink(config: EngineConfig, sink: Arc<dyn AuditSink>) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(Generation::empty()));
        let cache = (config.cache_capacity > 0)
            .then(|| Arc::new(VerdictCache::new(config.cache_capacity, config.cache_ttl())));

        info!(
            "Classification engine started (cache capacity {}, audit {})",
            config.cache_capacity,
            if sink.is_enabled() { "on" } else { "off" }
        );

        Self {
            coordinator: UpdateCoordinator::new(Arc::clone(&current), config.cancel_poll()),
            classifier: Classifier::new(current, cache.clone(), sink),
            cache,
            config,
        }
    }

    /// Create engine with a bounded audit channel; returns the receiving end
    pub fn with_audit_channel(config: EngineConfig) -> (Self, Receiver<AuditEvent>) {
        let (sink, rx) = ChannelAuditSink::bounded(config.audit_capacity());
        (Self::with_audit_sink(config, Arc::new(sink)), rx)
    }

    /// Apply a batch of rule changes atomically
    pub fn submit_rule_changes(&self, batch: Vec<RuleChange>) -> EngineResult<GenerationId> {
        self.submit(batch, None).map(|receipt| receipt.generation)
    }

    /// Apply a batch, returning assigned ids; cancellable while queued
    pub fn submit(&self, batch: Vec<RuleChange>, cancel: Option<&CancelToken>) -> EngineResult<BatchReceipt> {
        let before = self.coordinator.current();
        let receipt = self.coordinator.submit(batch, cancel)?;
        if receipt.generation != before {
            if let Some(cache) = &self.cache {
                cache.clear();
            }
        }
        Ok(receipt)
    }

    /// Classify a connection tuple
    #[inline]
    pub fn lookup(&self, tuple: &ConnectionTuple) -> Verdict {
        self.classifier.classify(tuple)
    }

    /// Add one rule, returning its id
    pub fn add_rule(&self, rule: RuleSpec) -> EngineResult<RuleId> {
        let receipt = self.submit(vec![RuleChange::add(rule)], None)?;
        first_added(&receipt)
    }

    /// Remove one rule; `false` if the id was unknown
    pub fn remove_rule(&self, id: RuleId) -> EngineResult<bool> {
        let receipt = self.submit(vec![RuleChange::remove(id)], None)?;
        Ok(receipt.removed == 1)
    }

    /// Replace one rule in place
    pub fn replace_rule(&self, id: RuleId, rule: RuleSpec) -> EngineResult<GenerationId> {
        self.submit_rule_changes(vec![RuleChange::Replace { id, rule }])
    }

    /// Enable or disable one rule
    pub fn set_enabled(&self, id: RuleId, enabled: bool) -> EngineResult<GenerationId> {
        self.submit_rule_changes(vec![RuleChange::SetEnabled { id, enabled }])
    }

    /// Replace the whole rule set
    pub fn replace_all(&self, rules: Vec<RuleSpec>) -> EngineResult<GenerationId> {
        self.submit_rule_changes(vec![RuleChange::ReplaceAll { rules }])
    }

    /// Classifier handle for a worker thread
    pub fn classifier(&self) -> Classifier {
        self.classifier.clone()
    }

    /// Current generation, for inspection
    pub fn snapshot(&self) -> Arc<Generation> {
        self.classifier.generation()
    }

    /// Current generation number
    pub fn generation(&self) -> GenerationId {
        self.coordinator.current()
    }

    /// Write-path state
    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let lookups = self.classifier.stats();
        let writes = self.coordinator.stats();
        let generation = self.snapshot();

        let total = lookups.lookups.get();
        let cache_hits = lookups.cache_hits.get();

        EngineStats {
            total_lookups: total,
            allowed: lookups.allowed.get(),
            denied: lookups.denied.get(),
            default_denies: lookups.default_denies.get(),
            cache_hits,
            cache_hit_rate: if total > 0 { cache_hits as f64 / total as f64 } else { 0.0 },
            audit_dropped: self.classifier.audit().dropped(),
            rules_loaded: generation.len(),
            rules_enabled: generation.index().len(),
            generation: generation.id(),
            batches_applied: writes.applied.get(),
            batches_rejected: writes.rejected.get(),
            batches_cancelled: writes.cancelled.get(),
            build_latency: writes.build_latency.snapshot(),
            index: generation.index_stats(),
        }
    }
}

fn first_added(receipt: &BatchReceipt) -> EngineResult<RuleId> {
    receipt.added.first().copied().ok_or(EngineError::MissingRuleId)
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

/// Engine statistics
#[derive(Debug, Clone, serde::Serialize)]
#[allow(missing_docs)]
pub struct EngineStats {
    pub total_lookups: u64,
    pub allowed: u64,
    pub denied: u64,
    pub default_denies: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub audit_dropped: u64,
    pub rules_loaded: usize,
    pub rules_enabled: usize,
    pub generation: GenerationId,
    pub batches_applied: u64,
    pub batches_rejected: u64,
    pub batches_cancelled: u64,
    pub build_latency: HistogramSnapshot,
    pub index: IndexStats,
}
