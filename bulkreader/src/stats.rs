//! Observability sink for the read path.

use std::time::Duration;

use crate::errors::ReadError;
use crate::routing::CassandraInstance;

/// Hooks the data layer can implement to observe the read path. Every
/// method is a no-op by default, so implementations only override what
/// they record.
pub trait Stats: Send + Sync {
    /// An instance was selected as a primary replica for a partition.
    fn primary_replica_selected(&self, _instance: &CassandraInstance, _partition_id: usize) {}

    /// An instance was selected as a backup replica for a partition.
    fn backup_replica_selected(&self, _instance: &CassandraInstance, _partition_id: usize) {}

    /// A replica listed its sstables successfully.
    fn replica_fetch_succeeded(
        &self,
        _instance: &CassandraInstance,
        _num_sstables: usize,
        _elapsed: Duration,
    ) {
    }

    /// A replica fetch failed (including deadline expiry).
    fn replica_fetch_failed(&self, _instance: &CassandraInstance, _error: &ReadError) {}

    /// A backup replica was promoted after a primary failed.
    fn backup_promoted(&self, _instance: &CassandraInstance, _partition_id: usize) {}

    /// The engine cancelled the partition read.
    fn partition_cancelled(&self, _partition_id: usize) {}
}

/// The default sink: records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl Stats for NoopStats {}
