//! Rank buckets: where the index keeps compiled rules
//!
//! Every structure in the index is a [`RankBucket`]: rules go in in rank
//! order, and a lookup asks for the lowest rank whose remaining predicates
//! match the tuple. Buckets nest (protocol split, then prefix tries, then
//! a port bucket), each settling one predicate, so no lookup ever filters
//! candidates one by one.
//!
//! The two leaf buckets live here: [`MinRank`] for rules with no port
//! predicate and [`PortTree`] for rules with one.

use netgate_common::{ConnectionTuple, IndexBuildError};

use super::IndexStats;
use crate::rule::{PortRange, Rule};

/// Empty segment-tree cell
const NO_RANK: u32 = u32::MAX;

const ALL_PORTS: PortRange = PortRange { start: 0, end: u16::MAX };

/// Compiled storage for ranked rules
pub(crate) trait RankBucket: Default {
    /// Add a rule; ranks arrive in ascending order
    fn push(&mut self, rank: u32, rule: &Rule) -> Result<(), IndexBuildError>;

    /// Seal the bucket after the last push
    fn finish(&mut self);

    /// Lowest rank whose predicates (those this bucket settles) match
    fn lowest(&self, tuple: &ConnectionTuple) -> Option<u32>;

    /// Ranks stored
    fn entries(&self) -> usize;

    /// Add this bucket's shape to `stats`
    fn tally(&self, stats: &mut IndexStats);
}

/// The lower of two optional ranks
#[inline(always)]
pub(crate) fn lower(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
thread_local! {
    /// Leaf buckets consulted by lookups on this thread
    pub(crate) static LEAF_VISITS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

#[inline(always)]
fn count_visit() {
    #[cfg(test)]
    LEAF_VISITS.with(|visits| visits.set(visits.get() + 1));
}

/// Leaf for rules with no port predicate: only the first rank can win
#[derive(Debug, Default)]
pub(crate) struct MinRank {
    lowest: Option<u32>,
    entries: usize,
}

impl RankBucket for MinRank {
    fn push(&mut self, rank: u32, _rule: &Rule) -> Result<(), IndexBuildError> {
        self.lowest.get_or_insert(rank);
        self.entries += 1;
        Ok(())
    }

    fn finish(&mut self) {}

    #[inline]
    fn lowest(&self, _tuple: &ConnectionTuple) -> Option<u32> {
        count_visit();
        self.lowest
    }

    fn entries(&self) -> usize {
        self.entries
    }

    fn tally(&self, _stats: &mut IndexStats) {}
}

/// Segment tree over elementary port intervals
///
/// The port space is cut at every range boundary; leaf `i` stands for
/// `starts[i]..starts[i + 1]` (the last one runs to 65535). A range is
/// stored at the O(log n) canonical nodes covering its leaves, and each
/// node keeps only the lowest rank assigned to it. A lookup is a binary
/// search for the leaf and a walk to the root.
#[derive(Debug, Default)]
pub(crate) struct PortTree {
    pending: Vec<(PortRange, u32)>,
    starts: Vec<u16>,
    leaves: usize,
    cells: Vec<u32>,
    entries: usize,
}

impl PortTree {
    /// Lower every cell covering leaves `lo..hi` to `rank`
    fn assign(&mut self, lo: usize, hi: usize, rank: u32) {
        let (mut lo, mut hi) = (lo + self.leaves, hi + self.leaves);
        while lo < hi {
            if lo & 1 == 1 {
                self.cells[lo] = self.cells[lo].min(rank);
                lo += 1;
            }
            if hi & 1 == 1 {
                hi -= 1;
                self.cells[hi] = self.cells[hi].min(rank);
            }
            lo >>= 1;
            hi >>= 1;
        }
    }
}

impl RankBucket for PortTree {
    fn push(&mut self, rank: u32, rule: &Rule) -> Result<(), IndexBuildError> {
        self.pending.push((rule.ports.unwrap_or(ALL_PORTS), rank));
        self.entries += 1;
        Ok(())
    }

    fn finish(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut bounds = Vec::with_capacity(2 * self.pending.len() + 1);
        bounds.push(0u32);
        for (range, _) in &self.pending {
            bounds.push(u32::from(range.start));
            bounds.push(u32::from(range.end) + 1);
        }
        bounds.sort_unstable();
        bounds.dedup();
        // 65536 closes the port space, it starts nothing.
        self.starts = bounds.into_iter().filter_map(|b| u16::try_from(b).ok()).collect();

        self.leaves = self.starts.len().next_power_of_two();
        self.cells = vec![NO_RANK; 2 * self.leaves];

        let pending = std::mem::take(&mut self.pending);
        for (range, rank) in pending {
            let lo = self.starts.partition_point(|&s| s < range.start);
            let hi = self.starts.partition_point(|&s| s <= range.end);
            self.assign(lo, hi, rank);
        }
    }

    #[inline]
    fn lowest(&self, tuple: &ConnectionTuple) -> Option<u32> {
        count_visit();
        let leaf = self.starts.partition_point(|&s| s <= tuple.dst_port).checked_sub(1)?;

        let mut node = leaf + self.leaves;
        let mut best = NO_RANK;
        while node > 0 {
            best = best.min(self.cells[node]);
            node >>= 1;
        }
        (best != NO_RANK).then_some(best)
    }

    fn entries(&self) -> usize {
        self.entries
    }

    fn tally(&self, stats: &mut IndexStats) {
        stats.port_segments += self.starts.len();
        stats.port_tree_cells += self.cells.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleSpec;
    use netgate_common::RuleId;
    use std::net::Ipv4Addr;

    fn ranged(ranges: &[(u32, u32)]) -> PortTree {
        let mut tree = PortTree::default();
        for (rank, &(start, end)) in ranges.iter().enumerate() {
            let rule = Rule::from_spec(RuleId(rank as u64 + 1), &RuleSpec::deny().ports(start, end)).unwrap();
            tree.push(rank as u32, &rule).unwrap();
        }
        tree.finish();
        tree
    }

    fn at(bucket: &impl RankBucket, port: u16) -> Option<u32> {
        bucket.lowest(&ConnectionTuple::tcp_v4(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_overlapping_ranges() {
        let tree = ranged(&[(80, 80), (1, 1024), (443, 443), (1000, 2000)]);

        assert_eq!(at(&tree, 80), Some(0));
        assert_eq!(at(&tree, 443), Some(1));
        assert_eq!(at(&tree, 1500), Some(3));
        assert_eq!(at(&tree, 0), None);
        assert_eq!(at(&tree, 2001), None);
        assert_eq!(at(&tree, 65535), None);
    }

    #[test]
    fn test_edges_of_port_space() {
        let tree = ranged(&[(0, 0), (65535, 65535)]);
        assert_eq!(at(&tree, 0), Some(0));
        assert_eq!(at(&tree, 1), None);
        assert_eq!(at(&tree, 65535), Some(1));

        let mut stats = IndexStats::default();
        tree.tally(&mut stats);
        assert_eq!(stats.port_segments, 3);
    }

    #[test]
    fn test_nested_ranges() {
        // Ranks run inside-out; each port sees the innermost range covering it
        let tree = ranged(&[(150, 160), (100, 200), (0, 65535)]);
        assert_eq!(at(&tree, 99), Some(2));
        assert_eq!(at(&tree, 120), Some(1));
        assert_eq!(at(&tree, 155), Some(0));
        assert_eq!(at(&tree, 201), Some(2));
    }

    #[test]
    fn test_empty_buckets() {
        let mut tree = PortTree::default();
        tree.finish();
        assert_eq!(at(&tree, 80), None);
        assert_eq!(at(&MinRank::default(), 80), None);
    }

    #[test]
    fn test_lower() {
        assert_eq!(lower(Some(3), Some(1)), Some(1));
        assert_eq!(lower(None, Some(4)), Some(4));
        assert_eq!(lower(Some(2), None), Some(2));
        assert_eq!(lower(None, None), None);
    }
}
