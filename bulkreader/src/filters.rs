//! Push-down filters the engine hands to the read path.

use std::fmt;

use bytes::Bytes;

use crate::data::SSTable;
use crate::routing::{Token, TokenRange};

/// A predicate over partitions and sstables. The read path uses filters
/// two ways: to drop token sub-ranges no filter is interested in before
/// replicas are selected, and to skip sstables or partition keys while
/// rows are decoded downstream.
pub trait CustomFilter: Send + Sync + fmt::Debug {
    /// Whether any partition this filter accepts can live in the given
    /// token range.
    fn overlaps(&self, range: &TokenRange) -> bool;

    /// Whether the decoder should skip a partition entirely.
    fn skip_partition(&self, key: &Bytes, token: &Token) -> bool;

    /// Whether the filter selects specific partition keys; only such
    /// filters can prune token sub-ranges.
    fn can_filter_by_key(&self) -> bool;

    /// Whether the filter accepts this partition key.
    fn filter_key(&self, key: &Bytes) -> bool;

    /// Whether an sstable may contain matching partitions.
    fn filter_sstable(&self, sstable: &dyn SSTable) -> bool;

    /// Whether the filter targets one specific narrow token range rather
    /// than whatever range the engine partition happens to own.
    fn is_specific_range(&self) -> bool;
}

/// Accepts everything inside an engine partition's token range. Exactly
/// one of these is appended per partition by `filters_in_range`.
#[derive(Clone, Debug)]
pub struct PartitionRangeFilter {
    token_range: TokenRange,
}

impl PartitionRangeFilter {
    pub fn new(token_range: TokenRange) -> Self {
        Self { token_range }
    }

    pub fn token_range(&self) -> &TokenRange {
        &self.token_range
    }
}

impl CustomFilter for PartitionRangeFilter {
    fn overlaps(&self, range: &TokenRange) -> bool {
        self.token_range.is_connected(range)
    }

    fn skip_partition(&self, _key: &Bytes, token: &Token) -> bool {
        !self.token_range.contains(token)
    }

    fn can_filter_by_key(&self) -> bool {
        false
    }

    fn filter_key(&self, _key: &Bytes) -> bool {
        true
    }

    fn filter_sstable(&self, sstable: &dyn SSTable) -> bool {
        // Without a token range of its own an sstable may contain
        // anything, so it has to be read.
        sstable
            .token_range()
            .map_or(true, |range| range.is_connected(&self.token_range))
    }

    fn is_specific_range(&self) -> bool {
        false
    }
}

/// Selects a single partition by its serialized key and token.
#[derive(Clone, Debug)]
pub struct PartitionKeyFilter {
    key: Bytes,
    token: Token,
}

impl PartitionKeyFilter {
    pub fn new(key: Bytes, token: Token) -> Self {
        Self { key, token }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

impl CustomFilter for PartitionKeyFilter {
    fn overlaps(&self, range: &TokenRange) -> bool {
        range.contains(&self.token)
    }

    fn skip_partition(&self, key: &Bytes, _token: &Token) -> bool {
        key != &self.key
    }

    fn can_filter_by_key(&self) -> bool {
        true
    }

    fn filter_key(&self, key: &Bytes) -> bool {
        key == &self.key
    }

    fn filter_sstable(&self, sstable: &dyn SSTable) -> bool {
        sstable
            .token_range()
            .map_or(true, |range| range.contains(&self.token))
    }

    fn is_specific_range(&self) -> bool {
        true
    }
}
