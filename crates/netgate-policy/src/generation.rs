//! Immutable rule-set generations

use std::sync::Arc;

use netgate_common::{ConnectionTuple, GenerationId, IndexBuildError, Timestamp, Verdict};

use crate::index::{IndexStats, MatcherIndex};
use crate::rule::Rule;

/// A published snapshot: the rule sequence, its compiled index, its number
///
/// Never mutated after construction. Readers hold it through an `Arc`; it is
/// dropped when the last lookup using it finishes.
#[derive(Debug)]
pub struct Generation {
    id: GenerationId,
    rules: Arc<[Rule]>,
    index: MatcherIndex,
    built_at: Timestamp,
}

impl Generation {
    /// The empty generation every engine starts from
    pub fn empty() -> Self {
        Self {
            id: GenerationId::INITIAL,
            rules: Arc::from(Vec::new()),
            index: MatcherIndex::empty(),
            built_at: Timestamp::now(),
        }
    }

    /// Compile a rule sequence into a generation
    pub fn build(id: GenerationId, rules: Arc<[Rule]>) -> Result<Self, IndexBuildError> {
        let index = MatcherIndex::build(&rules)?;
        Ok(Self {
            id,
            rules,
            index,
            built_at: Timestamp::now(),
        })
    }

    /// Classify a tuple against this generation
    ///
    /// Pure: the same generation and tuple always give the same verdict.
    #[inline]
    pub fn classify(&self, tuple: &ConnectionTuple) -> Verdict {
        match self.index.lookup(tuple) {
            Some(hit) => Verdict::matched(hit.action, hit.rule_id, self.id),
            None => Verdict::default_policy(self.id),
        }
    }

    /// Generation number
    #[inline(always)]
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Rules in insertion order, disabled ones included
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Compiled index
    pub fn index(&self) -> &MatcherIndex {
        &self.index
    }

    /// Index shape
    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// When the index was compiled
    pub fn built_at(&self) -> Timestamp {
        self.built_at
    }

    /// Number of rules, disabled ones included
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RuleStore;
    use crate::rule::RuleSpec;
    use netgate_common::{Action, RuleId};
    use std::net::Ipv4Addr;

    #[test]
    fn test_empty_generation_denies() {
        let generation = Generation::empty();
        let tuple = ConnectionTuple::tcp_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 22);

        let verdict = generation.classify(&tuple);
        assert_eq!(verdict.action, Action::Deny);
        assert_eq!(verdict.rule_id, None);
        assert_eq!(verdict.generation, GenerationId::INITIAL);
    }

    #[test]
    fn test_build_from_store() {
        let mut store = RuleStore::new();
        store.add_rule(&RuleSpec::allow().port(22)).unwrap();
        store.add_rule(&RuleSpec::deny().port(23).disabled()).unwrap();

        let generation = Generation::build(GenerationId(4), store.snapshot()).unwrap();
        assert_eq!(generation.len(), 2);
        assert_eq!(generation.index().len(), 1);

        let tuple = ConnectionTuple::tcp_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 22);
        assert_eq!(
            generation.classify(&tuple),
            Verdict::matched(Action::Allow, RuleId(1), GenerationId(4))
        );
    }
}
