//! Binary prefix tries over source or destination networks
//!
//! One trie per address family. A rule with prefix `p` lands in the bucket
//! of the node at depth `p` on the path of its network bits; a lookup walks
//! the path of the tuple's address, so it visits every covering prefix and
//! nothing else. Rules without a network for the trie's field go to the
//! `any` bucket.

use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use netgate_common::{ConnectionTuple, IndexBuildError};

use super::ports::{lower, RankBucket};
use super::IndexStats;
use crate::rule::Rule;

const NO_CHILD: u32 = 0;
const NO_BUCKET: u32 = u32::MAX;

/// Which address a trie is keyed on
pub(crate) trait AddressField {
    /// The rule's network for this field
    fn network(rule: &Rule) -> Option<IpNetwork>;
    /// The tuple's address for this field
    fn address(tuple: &ConnectionTuple) -> IpAddr;
}

/// Keyed on the source network
#[derive(Debug)]
pub(crate) struct Source;

/// Keyed on the destination network
#[derive(Debug)]
pub(crate) struct Destination;

impl AddressField for Source {
    #[inline(always)]
    fn network(rule: &Rule) -> Option<IpNetwork> {
        rule.source
    }

    #[inline(always)]
    fn address(tuple: &ConnectionTuple) -> IpAddr {
        tuple.src_ip
    }
}

impl AddressField for Destination {
    #[inline(always)]
    fn network(rule: &Rule) -> Option<IpNetwork> {
        rule.destination
    }

    #[inline(always)]
    fn address(tuple: &ConnectionTuple) -> IpAddr {
        tuple.dst_ip
    }
}

#[derive(Debug)]
struct Node {
    children: [u32; 2],
    bucket: u32,
}

impl Node {
    const EMPTY: Node = Node {
        children: [NO_CHILD; 2],
        bucket: NO_BUCKET,
    };
}

/// Trie for one address family; keys are left-aligned in a `u128`
///
/// Buckets are only allocated for nodes that hold rules.
#[derive(Debug)]
struct BitTrie<B> {
    nodes: Vec<Node>,
    buckets: Vec<B>,
    width: u8,
}

impl<B: RankBucket> BitTrie<B> {
    fn new(width: u8) -> Self {
        Self {
            nodes: vec![Node::EMPTY],
            buckets: Vec::new(),
            width,
        }
    }

    fn insert(&mut self, key: u128, prefix: u8, rank: u32, rule: &Rule) -> Result<(), IndexBuildError> {
        if prefix > self.width {
            return Err(IndexBuildError::PrefixTooLong {
                prefix,
                width: self.width,
            });
        }

        let mut node = 0usize;
        for depth in 0..prefix {
            let bit = bit_at(key, depth);
            node = match self.nodes[node].children[bit] {
                NO_CHILD => {
                    // Root is node 0, so 0 never names a child.
                    let child = self.nodes.len();
                    self.nodes.push(Node::EMPTY);
                    self.nodes[node].children[bit] = child as u32;
                    child
                }
                child => child as usize,
            };
        }

        let slot = match self.nodes[node].bucket {
            NO_BUCKET => {
                self.buckets.push(B::default());
                let slot = self.buckets.len() - 1;
                self.nodes[node].bucket = slot as u32;
                slot
            }
            slot => slot as usize,
        };
        self.buckets[slot].push(rank, rule)
    }

    fn finish(&mut self) {
        for bucket in &mut self.buckets {
            bucket.finish();
        }
        self.nodes.shrink_to_fit();
        self.buckets.shrink_to_fit();
    }

    #[inline]
    fn lowest(&self, key: u128, tuple: &ConnectionTuple) -> Option<u32> {
        let mut best = None;
        let mut node = 0usize;
        let mut depth = 0u8;

        loop {
            let current = &self.nodes[node];
            if let Some(bucket) = self.buckets.get(current.bucket as usize) {
                best = lower(best, bucket.lowest(tuple));
            }
            if depth == self.width {
                break;
            }
            match current.children[bit_at(key, depth)] {
                NO_CHILD => break,
                child => node = child as usize,
            }
            depth += 1;
        }

        best
    }
}

#[inline(always)]
fn bit_at(key: u128, depth: u8) -> usize {
    ((key >> (127 - u32::from(depth))) & 1) as usize
}

#[inline(always)]
fn v4_key(addr: Ipv4Addr) -> u128 {
    u128::from(u32::from(addr)) << 96
}

/// Prefix trie on field `K` for both address families
#[derive(Debug)]
pub(crate) struct PrefixTrie<K, B> {
    any: B,
    has_any: bool,
    v4: BitTrie<B>,
    v6: BitTrie<B>,
    field: PhantomData<K>,
}

impl<K, B: RankBucket> Default for PrefixTrie<K, B> {
    fn default() -> Self {
        Self {
            any: B::default(),
            has_any: false,
            v4: BitTrie::new(32),
            v6: BitTrie::new(128),
            field: PhantomData,
        }
    }
}

impl<K: AddressField, B: RankBucket> RankBucket for PrefixTrie<K, B> {
    fn push(&mut self, rank: u32, rule: &Rule) -> Result<(), IndexBuildError> {
        match K::network(rule) {
            None => {
                self.has_any = true;
                self.any.push(rank, rule)
            }
            Some(IpNetwork::V4(net)) => self.v4.insert(v4_key(net.network()), net.prefix(), rank, rule),
            Some(IpNetwork::V6(net)) => self.v6.insert(u128::from(net.network()), net.prefix(), rank, rule),
        }
    }

    fn finish(&mut self) {
        self.any.finish();
        self.v4.finish();
        self.v6.finish();
    }

    #[inline]
    fn lowest(&self, tuple: &ConnectionTuple) -> Option<u32> {
        let covered = match K::address(tuple) {
            IpAddr::V4(addr) => self.v4.lowest(v4_key(addr), tuple),
            IpAddr::V6(addr) => self.v6.lowest(u128::from(addr), tuple),
        };
        if self.has_any {
            lower(self.any.lowest(tuple), covered)
        } else {
            covered
        }
    }

    fn entries(&self) -> usize {
        self.any.entries()
            + self
                .v4
                .buckets
                .iter()
                .chain(&self.v6.buckets)
                .map(|bucket| bucket.entries())
                .sum::<usize>()
    }

    fn tally(&self, stats: &mut IndexStats) {
        stats.trie_nodes += self.v4.nodes.len() + self.v6.nodes.len();
        self.any.tally(stats);
        for bucket in self.v4.buckets.iter().chain(&self.v6.buckets) {
            bucket.tally(stats);
        }
    }
}
