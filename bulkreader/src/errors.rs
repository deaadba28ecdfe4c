//! Errors surfaced to the engine on a partition's future.

use std::sync::Arc;

use thiserror::Error;

use bulkreader_cql::ConsistencyLevel;

use crate::routing::TokenRange;

/// Error that occurred while planning or executing a partition read.
///
/// Everything except [`ReadError::Cancelled`] is fatal for the operation
/// that produced it; `Cancelled` only reports that the engine abandoned
/// the partition and the coordinator shut down quietly.
#[derive(Error, Debug, Clone)]
pub enum ReadError {
    /// The consistency level cannot be used for bulk reads, or it
    /// requires a datacenter and none was given.
    #[error("invalid consistency level {consistency_level} for the bulk reader: {reason}")]
    InvalidConsistency {
        consistency_level: ConsistencyLevel,
        reason: String,
    },

    /// The consistency level is recognized but not supported yet.
    #[error("{0} has not been implemented yet")]
    NotImplemented(&'static str),

    /// The instances handed to the ring cannot produce a valid
    /// sub-range → replica mapping.
    #[error("invalid ring: {0}")]
    InvalidRing(String),

    /// The engine asked for a partition id outside the partitioner's
    /// range.
    #[error("partition id outside expected range: {partition_id}")]
    UnknownPartition { partition_id: usize },

    /// A token sub-range has fewer primary replicas than the consistency
    /// level demands.
    #[error(
        "not enough replicas to satisfy {consistency_level} over token range {range} \
         (required: {want}, selected: {got}, datacenter: {datacenter:?})"
    )]
    NotEnoughReplicas {
        consistency_level: ConsistencyLevel,
        range: TokenRange,
        want: usize,
        got: usize,
        datacenter: Option<String>,
    },

    /// None of the caller-supplied filters intersects the partition's
    /// token range; the engine can skip the partition entirely.
    #[error("no filter matches the partition token range")]
    NoMatchFound,

    /// A replica did not answer within its deadline.
    #[error("listing sstables timed out on instance {0}")]
    Timeout(String),

    /// Every primary and backup replica was attempted and at least one
    /// fetch is still failing.
    #[error(
        "exhausted all replicas for partition {partition_id} over token range {range} \
         (attempted: {attempted:?})"
    )]
    ReadFailure {
        partition_id: usize,
        range: TokenRange,
        attempted: Vec<String>,
    },

    /// The engine cancelled the partition; not a failure.
    #[error("partition read cancelled")]
    Cancelled,

    /// Input/output error reported by the data layer.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// A bug: an executor task vanished or panicked.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl From<std::io::Error> for ReadError {
    fn from(error: std::io::Error) -> Self {
        ReadError::Io(Arc::new(error))
    }
}
