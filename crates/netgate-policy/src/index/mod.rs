//! Matcher index: compiled, read-only lookup structure for one generation
//!
//! # Layout
//!
//! ```text
//!  tuple ──► SourceAndPort  protocol ─► source trie ─► destination trie ─► port tree ──┐ hit
//!              │ miss                                                                  │
//!              ▼                                                                       │
//!            SourceOnly     protocol ─► source trie ─► destination trie ─► min rank ───┤
//!              │ miss                                                                  │
//!              ▼                                                                       ▼
//!            PortOnly       protocol ─► destination trie ─► port tree ──────────► [rule, action]
//!              │ miss                                                                  ▲
//!              ▼                                                                       │
//!            Wildcard       protocol ─► destination trie ─► min rank ─────────────────┘
//!              │ miss
//!              ▼
//!          [default deny]
//! ```
//!
//! Every enabled rule gets a rank: its position in [`canonical_order`].
//! Each stage settles one predicate structurally and yields the lowest rank
//! that matches, and classes are walked in rank order, so the first hit is
//! the rule a linear scan of the canonical order would have found.
//!
//! Each rule is stored once, in one leaf, where a port tree spends O(log R)
//! cells on it: build is O(R log R). A lookup touches two protocol buckets,
//! walks each trie along one address path (at most 33 or 129 nodes) and
//! does one binary search per port tree it reaches. None of that grows
//! with the number of rules sharing a bucket.

mod ports;
mod protocol;
mod trie;

use std::collections::HashSet;

use netgate_common::{Action, ConnectionTuple, IndexBuildError, RuleId};
use serde::Serialize;

use crate::rule::{canonical_order, Rule, SpecificityClass};
use ports::{MinRank, PortTree, RankBucket};
use protocol::ProtocolSplit;
use trie::{Destination, PrefixTrie, Source};

type ByDestination<B> = PrefixTrie<Destination, B>;
type BySource<B> = PrefixTrie<Source, ByDestination<B>>;

/// What a lookup reports about a compiled rule
#[derive(Debug, Clone, Copy)]
struct RankedRule {
    id: RuleId,
    action: Action,
    class: SpecificityClass,
}

/// Result of an index lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMatch {
    /// Matching rule
    pub rule_id: RuleId,
    /// Its action
    pub action: Action,
    /// Its specificity class
    pub class: SpecificityClass,
    /// Position in evaluation order
    pub rank: u32,
}

/// Shape of a compiled index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Enabled rules compiled
    pub rules: usize,
    /// Rules in the source+port class
    pub source_and_port: usize,
    /// Rules in the source-only class
    pub source_only: usize,
    /// Rules in the port-only class
    pub port_only: usize,
    /// Rules in the wildcard class
    pub wildcard: usize,
    /// Trie nodes across every source and destination trie
    pub trie_nodes: usize,
    /// Elementary port segments across every port tree
    pub port_segments: usize,
    /// Cells allocated across every port tree
    pub port_tree_cells: usize,
}

/// Compiled rule index
#[derive(Debug)]
pub struct MatcherIndex {
    ranked: Vec<RankedRule>,
    source_and_port: ProtocolSplit<BySource<PortTree>>,
    source_only: ProtocolSplit<BySource<MinRank>>,
    port_only: ProtocolSplit<ByDestination<PortTree>>,
    wildcard: ProtocolSplit<ByDestination<MinRank>>,
}

impl MatcherIndex {
    /// Index with no rules
    pub fn empty() -> Self {
        Self {
            ranked: Vec::new(),
            source_and_port: ProtocolSplit::default(),
            source_only: ProtocolSplit::default(),
            port_only: ProtocolSplit::default(),
            wildcard: ProtocolSplit::default(),
        }
    }

    /// Compile an insertion-ordered rule sequence
    ///
    /// Disabled rules are skipped.
    pub fn build(rules: &[Rule]) -> Result<Self, IndexBuildError> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.id) {
                return Err(IndexBuildError::DuplicateRuleId(rule.id));
            }
        }

        let ordered = canonical_order(rules);
        let mut index = Self::empty();
        index.ranked.reserve_exact(ordered.len());

        for (rank, rule) in ordered.into_iter().enumerate() {
            let rank = rank as u32;
            let class = rule.class();
            match class {
                SpecificityClass::SourceAndPort => index.source_and_port.push(rank, rule)?,
                SpecificityClass::SourceOnly => index.source_only.push(rank, rule)?,
                SpecificityClass::PortOnly => index.port_only.push(rank, rule)?,
                SpecificityClass::Wildcard => index.wildcard.push(rank, rule)?,
            }
            index.ranked.push(RankedRule {
                id: rule.id,
                action: rule.action,
                class,
            });
        }

        index.source_and_port.finish();
        index.source_only.finish();
        index.port_only.finish();
        index.wildcard.finish();

        let expected = rules.iter().filter(|rule| rule.enabled).count();
        let found = index.source_and_port.entries()
            + index.source_only.entries()
            + index.port_only.entries()
            + index.wildcard.entries();
        if found != expected || index.ranked.len() != expected {
            return Err(IndexBuildError::RankMismatch { expected, found });
        }

        Ok(index)
    }

    /// First rule in evaluation order matching the tuple
    #[inline]
    pub fn lookup(&self, tuple: &ConnectionTuple) -> Option<IndexMatch> {
        let rank = self
            .source_and_port
            .lowest(tuple)
            .or_else(|| self.source_only.lowest(tuple))
            .or_else(|| self.port_only.lowest(tuple))
            .or_else(|| self.wildcard.lowest(tuple))?;

        let rule = self.ranked.get(rank as usize)?;
        Some(IndexMatch {
            rule_id: rule.id,
            action: rule.action,
            class: rule.class,
            rank,
        })
    }

    /// Number of compiled (enabled) rules
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Shape of the compiled structures
    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            rules: self.ranked.len(),
            ..Default::default()
        };
        self.source_and_port.tally(&mut stats);
        self.source_only.tally(&mut stats);
        self.port_only.tally(&mut stats);
        self.wildcard.tally(&mut stats);

        for rule in &self.ranked {
            match rule.class {
                SpecificityClass::SourceAndPort => stats.source_and_port += 1,
                SpecificityClass::SourceOnly => stats.source_only += 1,
                SpecificityClass::PortOnly => stats.port_only += 1,
                SpecificityClass::Wildcard => stats.wildcard += 1,
            }
        }
        stats
    }
}
