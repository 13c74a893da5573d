//! Rule store: the mutable working set behind each generation
//!
//! The store is owned by the update coordinator, which mutates a clone and
//! only commits it once the resulting generation has been published. Every
//! operation validates before touching state, so a failed call leaves the
//! store exactly as it was.

use std::sync::Arc;

use netgate_common::{RuleError, RuleId};

use crate::rule::{Rule, RuleSpec};

/// Insertion-ordered set of validated rules
#[derive(Debug, Clone)]
pub struct RuleStore {
    /// Rules in insertion order; ids ascend along the vector
    rules: Vec<Rule>,
    /// Next id to hand out
    next_id: u64,
}

impl RuleStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            next_id: 1,
        }
    }

    /// Validate and append a rule
    pub fn add_rule(&mut self, spec: &RuleSpec) -> Result<RuleId, RuleError> {
        let id = RuleId(self.next_id);
        let rule = Rule::from_spec(id, spec)?;
        self.next_id += 1;
        self.rules.push(rule);
        Ok(id)
    }

    /// Remove a rule; `false` if the id is unknown
    pub fn remove_rule(&mut self, id: RuleId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.rules.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replace a rule in place, keeping its id and insertion position
    pub fn replace_rule(&mut self, id: RuleId, spec: &RuleSpec) -> Result<(), RuleError> {
        let pos = self.position(id).ok_or(RuleError::UnknownRule(id))?;
        self.rules[pos] = Rule::from_spec(id, spec)?;
        Ok(())
    }

    /// Enable or disable a rule
    pub fn set_enabled(&mut self, id: RuleId, enabled: bool) -> Result<(), RuleError> {
        let pos = self.position(id).ok_or(RuleError::UnknownRule(id))?;
        if self.rules[pos].enabled != enabled {
            // Rules are immutable once created; swap in an edited copy.
            let mut edited = self.rules[pos].clone();
            edited.enabled = enabled;
            self.rules[pos] = edited;
        }
        Ok(())
    }

    /// Replace the whole set; all specs are validated before anything changes
    ///
    /// New ids continue the sequence, old ids are never reused.
    pub fn replace_all(&mut self, specs: &[RuleSpec]) -> Result<Vec<RuleId>, RuleError> {
        let rules = specs
            .iter()
            .enumerate()
            .map(|(offset, spec)| Rule::from_spec(RuleId(self.next_id + offset as u64), spec))
            .collect::<Result<Vec<_>, _>>()?;

        self.next_id += rules.len() as u64;
        let ids = rules.iter().map(|rule| rule.id).collect();
        self.rules = rules;
        Ok(ids)
    }

    /// Look up a rule by id
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.position(id).map(|pos| &self.rules[pos])
    }

    /// Rules in insertion order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Immutable copy for a generation
    pub fn snapshot(&self) -> Arc<[Rule]> {
        Arc::from(self.rules.as_slice())
    }

    /// Get number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[inline]
    fn position(&self, id: RuleId) -> Option<usize> {
        self.rules.binary_search_by_key(&id, |rule| rule.id).ok()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgate_common::Action;

    #[test]
    fn test_ids_are_monotonic() {
        let mut store = RuleStore::new();
        let a = store.add_rule(&RuleSpec::allow().port(80)).unwrap();
        let b = store.add_rule(&RuleSpec::allow().port(443)).unwrap();
        assert!(b > a);

        assert!(store.remove_rule(b));
        let c = store.add_rule(&RuleSpec::deny()).unwrap();
        assert!(c > b, "ids are never reused");

        let replaced = store.replace_all(&[RuleSpec::deny()]).unwrap();
        assert!(replaced[0] > c);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_add_leaves_store_unchanged() {
        let mut store = RuleStore::new();
        store.add_rule(&RuleSpec::allow().port(80)).unwrap();

        assert!(store.add_rule(&RuleSpec::allow().port(70000)).is_err());
        assert_eq!(store.len(), 1);

        // The failed add did not burn an id
        let next = store.add_rule(&RuleSpec::allow()).unwrap();
        assert_eq!(next, RuleId(2));
    }

    #[test]
    fn test_replace_all_is_atomic() {
        let mut store = RuleStore::new();
        let kept = store.add_rule(&RuleSpec::allow().port(80)).unwrap();

        let result = store.replace_all(&[
            RuleSpec::deny().port(22),
            RuleSpec::deny().source("not-an-ip"),
        ]);
        assert!(matches!(result, Err(RuleError::InvalidNetwork { .. })));
        assert_eq!(store.len(), 1);
        assert!(store.get(kept).is_some());
    }

    #[test]
    fn test_remove_unknown() {
        let mut store = RuleStore::new();
        assert!(!store.remove_rule(RuleId(42)));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut store = RuleStore::new();
        let first = store.add_rule(&RuleSpec::allow().port(80)).unwrap();
        store.add_rule(&RuleSpec::allow().port(443)).unwrap();

        store.replace_rule(first, &RuleSpec::deny().port(8080)).unwrap();
        assert_eq!(store.rules()[0].id, first);
        assert_eq!(store.rules()[0].action, Action::Deny);

        assert_eq!(
            store.replace_rule(RuleId(99), &RuleSpec::deny()),
            Err(RuleError::UnknownRule(RuleId(99)))
        );
    }

    #[test]
    fn test_set_enabled() {
        let mut store = RuleStore::new();
        let id = store.add_rule(&RuleSpec::deny()).unwrap();

        store.set_enabled(id, false).unwrap();
        assert!(!store.get(id).unwrap().enabled);
        assert_eq!(store.set_enabled(RuleId(7), true), Err(RuleError::UnknownRule(RuleId(7))));
    }
}
