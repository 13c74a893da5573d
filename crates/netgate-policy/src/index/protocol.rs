//! Protocol split: one sub-bucket per exact protocol plus one for "any"

use netgate_common::{ConnectionTuple, IndexBuildError, Protocol};

use super::ports::{lower, RankBucket};
use super::IndexStats;
use crate::rule::Rule;

/// Rules partitioned by protocol predicate
///
/// A lookup consults the "any" bucket and the bucket for the tuple's
/// protocol, never the others.
#[derive(Debug, Default)]
pub(crate) struct ProtocolSplit<B> {
    any: B,
    /// Sorted by protocol
    exact: Vec<(Protocol, B)>,
}

impl<B: RankBucket> RankBucket for ProtocolSplit<B> {
    fn push(&mut self, rank: u32, rule: &Rule) -> Result<(), IndexBuildError> {
        let Some(protocol) = rule.protocol else {
            return self.any.push(rank, rule);
        };
        let slot = match self.exact.binary_search_by_key(&protocol, |(p, _)| *p) {
            Ok(slot) => slot,
            Err(slot) => {
                self.exact.insert(slot, (protocol, B::default()));
                slot
            }
        };
        self.exact[slot].1.push(rank, rule)
    }

    fn finish(&mut self) {
        self.any.finish();
        for (_, bucket) in &mut self.exact {
            bucket.finish();
        }
        self.exact.shrink_to_fit();
    }

    #[inline]
    fn lowest(&self, tuple: &ConnectionTuple) -> Option<u32> {
        let exact = self
            .exact
            .binary_search_by_key(&tuple.protocol, |(p, _)| *p)
            .ok()
            .and_then(|slot| self.exact[slot].1.lowest(tuple));
        lower(self.any.lowest(tuple), exact)
    }

    fn entries(&self) -> usize {
        self.any.entries() + self.exact.iter().map(|(_, bucket)| bucket.entries()).sum::<usize>()
    }

    fn tally(&self, stats: &mut IndexStats) {
        self.any.tally(stats);
        for (_, bucket) in &self.exact {
            bucket.tally(stats);
        }
    }
}
