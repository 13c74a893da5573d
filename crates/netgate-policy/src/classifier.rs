//! Classifier: the lock-free read path
//!
//! ```text
//! classify(tuple) ─► ArcSwap::load() ─► Generation ─► [cache?] ─► index ─► Verdict
//!                         │                                                  │
//!                   (no lock, no wait)                              audit sink + counters
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use netgate_common::{Action, AtomicCounter, ConnectionTuple, Verdict};

use crate::audit::{AuditEvent, AuditSink};
use crate::cache::VerdictCache;
use crate::generation::Generation;

/// Lookup counters shared by every clone of a classifier
#[derive(Debug, Default)]
pub struct LookupStats {
    /// Total lookups
    pub lookups: AtomicCounter,
    /// Allow verdicts
    pub allowed: AtomicCounter,
    /// Deny verdicts (rule or default)
    pub denied: AtomicCounter,
    /// Verdicts decided by the default policy
    pub default_denies: AtomicCounter,
    /// Verdicts served from the cache
    pub cache_hits: AtomicCounter,
}

/// Connection classifier
///
/// Cheap to clone; clones share the generation cell, cache, sink and
/// counters, so each worker thread can hold its own handle.
#[derive(Clone)]
pub struct Classifier {
    current: Arc<ArcSwap<Generation>>,
    cache: Option<Arc<VerdictCache>>,
    audit: Arc<dyn AuditSink>,
    stats: Arc<LookupStats>,
}

impl Classifier {
    /// Create classifier over a generation cell
    pub fn new(
        current: Arc<ArcSwap<Generation>>,
        cache: Option<Arc<VerdictCache>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            current,
            cache,
            audit,
            stats: Arc::new(LookupStats::default()),
        }
    }

    /// Classify a connection tuple
    ///
    /// Never fails: when nothing matches the verdict is the default deny.
    /// The whole lookup runs against the one generation loaded at entry.
    #[inline]
    pub fn classify(&self, tuple: &ConnectionTuple) -> Verdict {
        self.stats.lookups.inc();
        let generation = self.current.load();

        let verdict = match &self.cache {
            Some(cache) => match cache.get(tuple, generation.id()) {
                Some(hit) => {
                    self.stats.cache_hits.inc();
                    hit
                }
                None => {
                    let verdict = generation.classify(tuple);
                    cache.insert(*tuple, verdict);
                    verdict
                }
            },
            None => generation.classify(tuple),
        };

        match verdict.action {
            Action::Allow => self.stats.allowed.inc(),
            Action::Deny => self.stats.denied.inc(),
        };
        if verdict.is_default() {
            self.stats.default_denies.inc();
        }
        metrics::counter!("netgate_lookups_total", "action" => verdict.action.as_str()).increment(1);

        if self.audit.is_enabled() {
            self.audit.record(AuditEvent::new(*tuple, &verdict));
        }

        verdict
    }

    /// Current generation (kept alive for as long as the caller holds it)
    pub fn generation(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    /// Lookup counters
    pub fn stats(&self) -> &LookupStats {
        &self.stats
    }

    /// Audit sink
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("generation", &self.current.load().id())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{ChannelAuditSink, NoopAuditSink};
    use crate::rule::RuleSpec;
    use crate::store::RuleStore;
    use netgate_common::{GenerationId, RuleId};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn cell(specs: &[RuleSpec]) -> Arc<ArcSwap<Generation>> {
        let mut store = RuleStore::new();
        for spec in specs {
            store.add_rule(spec).unwrap();
        }
        let generation = Generation::build(GenerationId(1), store.snapshot()).unwrap();
        Arc::new(ArcSwap::from_pointee(generation))
    }

    fn tcp(src: [u8; 4], port: u16) -> ConnectionTuple {
        ConnectionTuple::tcp_v4(Ipv4Addr::from(src), Ipv4Addr::new(10, 0, 0, 254), port)
    }

    #[test]
    fn test_default_deny_is_counted() {
        let classifier = Classifier::new(cell(&[RuleSpec::allow().port(80)]), None, Arc::new(NoopAuditSink));

        assert!(classifier.classify(&tcp([1, 2, 3, 4], 80)).is_allowed());
        let verdict = classifier.classify(&tcp([1, 2, 3, 4], 81));
        assert_eq!(verdict.action, Action::Deny);
        assert_eq!(verdict.rule_id, None);

        let stats = classifier.stats();
        assert_eq!(stats.lookups.get(), 2);
        assert_eq!(stats.allowed.get(), 1);
        assert_eq!(stats.default_denies.get(), 1);
    }

    #[test]
    fn test_audit_event_per_lookup() {
        let (sink, rx) = ChannelAuditSink::bounded(16);
        let classifier = Classifier::new(cell(&[RuleSpec::deny().source("192.168.1.10")]), None, Arc::new(sink));

        classifier.classify(&tcp([192, 168, 1, 10], 443));
        classifier.classify(&tcp([10, 0, 0, 1], 22));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.verdict, Action::Deny);
        assert_eq!(first.rule_id, Some(RuleId(1)));
        assert_eq!(first.generation_id, GenerationId(1));

        // Default deny still produces an event, with no rule
        let second = rx.try_recv().unwrap();
        assert_eq!(second.rule_id, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cache_serves_current_generation_only() {
        let current = cell(&[RuleSpec::allow().port(80)]);
        let cache = Arc::new(VerdictCache::new(1024, Duration::from_secs(60)));
        let classifier = Classifier::new(current.clone(), Some(cache), Arc::new(NoopAuditSink));

        let tuple = tcp([1, 1, 1, 1], 80);
        assert!(classifier.classify(&tuple).is_allowed());
        assert!(classifier.classify(&tuple).is_allowed());
        assert_eq!(classifier.stats().cache_hits.get(), 1);

        // Publish a generation that denies the same tuple
        let mut store = RuleStore::new();
        store.add_rule(&RuleSpec::deny().port(80)).unwrap();
        current.store(Arc::new(Generation::build(GenerationId(2), store.snapshot()).unwrap()));

        let verdict = classifier.classify(&tuple);
        assert_eq!(verdict.action, Action::Deny);
        assert_eq!(verdict.generation, GenerationId(2));
        assert_eq!(classifier.stats().cache_hits.get(), 1);
    }

    #[test]
    fn test_old_generation_outlives_swap() {
        let current = cell(&[RuleSpec::allow()]);
        let classifier = Classifier::new(current.clone(), None, Arc::new(NoopAuditSink));

        let held = classifier.generation();
        current.store(Arc::new(Generation::empty()));

        // The held snapshot still answers with its own rules
        assert!(held.classify(&tcp([1, 1, 1, 1], 1)).is_allowed());
        assert!(!classifier.classify(&tcp([1, 1, 1, 1], 1)).is_allowed());
    }
}
