//! Division of the token ring into engine partitions.

use bytes::Bytes;
use num_bigint::BigInt;
use tracing::{info, trace};

use crate::routing::{CassandraRing, Token, TokenRange};

/// Splits the ring into the token ranges the compute engine will read in
/// parallel, one range per engine partition.
///
/// Each ring sub-range is split proportionally to its share of the token
/// span, so a partition's range never crosses a sub-range boundary and
/// every partition is served by a single replica set. That property is
/// what lets the replica planner nominate a repair primary.
#[derive(Clone, Debug)]
pub struct TokenPartitioner {
    ranges: Vec<TokenRange>,
}

impl TokenPartitioner {
    /// `default_parallelism` and `num_cores` mirror how the engine sizes
    /// its task pool; their product is the target partition count.
    pub fn new(ring: &CassandraRing, default_parallelism: usize, num_cores: usize) -> Self {
        let target = std::cmp::max(1, default_parallelism * num_cores);
        let span: BigInt = ring
            .range_map()
            .iter()
            .map(|(range, _)| range.size())
            .sum();

        let mut ranges = Vec::with_capacity(target);
        for (range, _) in ring.range_map() {
            let weighted = (range.size() * BigInt::from(target as u64)) / &span;
            let splits = std::cmp::max(1, usize::try_from(&weighted).unwrap_or(1));
            subdivide(range, splits, &mut ranges);
        }

        info!(
            num_partitions = ranges.len(),
            target,
            num_ring_ranges = ring.range_map().len(),
            "Created token partitioner"
        );
        Self { ranges }
    }

    pub fn num_partitions(&self) -> usize {
        self.ranges.len()
    }

    /// Token range owned by an engine partition.
    pub fn token_range(&self, partition_id: usize) -> Option<&TokenRange> {
        self.ranges.get(partition_id)
    }

    /// All partition ranges, indexed by partition id.
    pub fn ranges(&self) -> &[TokenRange] {
        &self.ranges
    }

    /// The partition a token falls into.
    pub fn partition_for(&self, token: &Token) -> Option<usize> {
        self.ranges.iter().position(|range| range.contains(token))
    }

    /// Whether a partition key's token belongs to the given engine
    /// partition.
    pub fn is_in_partition(&self, token: &Token, key: &Bytes, partition_id: usize) -> bool {
        let in_partition = self
            .token_range(partition_id)
            .is_some_and(|range| range.contains(token));
        if !in_partition {
            trace!(
                %token,
                key_len = key.len(),
                partition_id,
                "Partition key token outside engine partition"
            );
        }
        in_partition
    }
}

/// Splits a range into `splits` chunks of near-equal width. The first
/// chunk inherits the range's lower bound, every later chunk opens where
/// the previous one closed.
fn subdivide(range: &TokenRange, splits: usize, out: &mut Vec<TokenRange>) {
    let step = range.size() / BigInt::from(splits as u64);
    if splits <= 1 || step == BigInt::from(0) {
        out.push(range.clone());
        return;
    }

    let mut cursor = range.lower().value().clone();
    for i in 0..splits {
        let last = i == splits - 1;
        let next = if last {
            range.upper().value().clone()
        } else {
            &cursor + &step
        };
        let chunk = if i == 0 && range.is_lower_inclusive() {
            TokenRange::closed(Token::new(cursor.clone()), Token::new(next.clone()))
        } else {
            TokenRange::open_closed(Token::new(cursor.clone()), Token::new(next.clone()))
        };
        out.push(chunk);
        cursor = next;
    }
}
