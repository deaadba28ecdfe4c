//! Replica-aware bulk reading of Cassandra-style clusters.
//!
//! The crate materializes a table stored across a token ring into the
//! partitions of an external parallel compute engine. For each engine
//! partition it maps the partition's token range to the replicas that can
//! satisfy the requested consistency level, fetches sstable listings from
//! those replicas concurrently with failover onto backups, and hands the
//! combined set of sstables to the downstream decoder.
//!
//! Schema concerns (CQL types, DDL parsing, consistency and replication
//! models) live in the `bulkreader-cql` crate, re-exported here under
//! [`cql`].

pub mod data;
pub mod errors;
pub mod filters;
pub mod routing;
pub mod stats;

pub use bulkreader_cql as cql;

pub use data::{
    AvailabilityHint, IoExecutor, MultipleReplicas, PartitionedDataLayer, RepairState, SSTable,
    SingleReplica,
};
pub use data::planner::{ConsistencyConfig, ReplicaSet};
pub use errors::ReadError;
pub use filters::{CustomFilter, PartitionKeyFilter, PartitionRangeFilter};
pub use routing::{CassandraInstance, CassandraRing, Token, TokenPartitioner, TokenRange};
pub use stats::Stats;

#[cfg(test)]
pub(crate) mod test_utils {
    /// Installs a subscriber printing to stderr, once per test binary.
    pub(crate) fn setup_tracing() {
        let _ = tracing_subscriber::fmt::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}
