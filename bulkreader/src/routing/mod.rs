//! Token-ring geometry: tokens, token ranges, the cluster ring and its
//! division into engine partitions.

mod range;
mod ring;
mod token_partitioner;

use std::fmt;

use num_bigint::BigInt;

pub use bulkreader_cql::partitioner::{murmur3_token, Partitioner};
pub use range::TokenRange;
pub use ring::{CassandraInstance, CassandraRing};
pub use token_partitioner::TokenPartitioner;

/// Token is a result of computing a hash of a partition key.
///
/// Murmur3 tokens fit in an `i64`, but range arithmetic (widths, splits)
/// and the Random partitioner's 2^127 span do not, so tokens are big
/// integers throughout and comparisons never overflow.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(BigInt);

impl Token {
    pub fn new(value: BigInt) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &BigInt {
        &self.0
    }

    pub fn into_value(self) -> BigInt {
        self.0
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Self(BigInt::from(value))
    }
}

impl From<BigInt> for Token {
    fn from(value: BigInt) -> Self {
        Self(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
