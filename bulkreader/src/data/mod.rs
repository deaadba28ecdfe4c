//! The data-layer contract: what a concrete cluster integration supplies
//! and the engine-facing operations built on top of it.

pub mod executor;
pub mod planner;
pub mod replica;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

pub use executor::IoExecutor;
pub use replica::{MultipleReplicas, SingleReplica};

use crate::data::planner::ConsistencyConfig;
use crate::errors::ReadError;
use crate::filters::{CustomFilter, PartitionRangeFilter};
use crate::routing::{CassandraInstance, CassandraRing, Token, TokenPartitioner, TokenRange};
use crate::stats::{NoopStats, Stats};

/// Out-of-band guess about a replica's health. Hints only order attempts
/// (known-up instances first); they are never treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AvailabilityHint {
    Up = 0,
    Unknown = 1,
    Down = 2,
}

/// Incremental-repair state of an sstable, as recorded in its metadata.
/// `Unknown` is merged like unrepaired data: dropping it could lose rows
/// on clusters without repair metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairState {
    Repaired,
    Unrepaired,
    Unknown,
}

/// Handle to one on-disk sorted-string table on some replica. Byte-level
/// decoding is the downstream reader's concern; the coordinator only
/// needs identity, repair state and (optionally) the covered token range.
pub trait SSTable: Send + Sync + fmt::Debug {
    /// Identifier of the table, unique within its replica.
    fn name(&self) -> &str;

    fn repair_state(&self) -> RepairState {
        RepairState::Unknown
    }

    /// Token range covered by the table, when the replica exposes it;
    /// used to skip tables that cannot intersect the partition.
    fn token_range(&self) -> Option<TokenRange> {
        None
    }
}

const DEFAULT_REPLICA_DEADLINE: Duration = Duration::from_secs(600);

/// A data layer that partitions the cluster's token range across engine
/// partitions and lists the sstables overlapping each one.
///
/// Implementations supply cluster topology (ring, partitioner), the
/// blocking-I/O executor, and per-replica sstable listing; the provided
/// methods implement the engine-facing read protocol on top. If a data
/// layer is used as a cache key its own equality must cover everything
/// that changes read semantics, including the ring and the
/// [`ConsistencyConfig`].
#[async_trait]
pub trait PartitionedDataLayer: Send + Sync {
    /// Consistency level and datacenter this job reads at.
    fn consistency_config(&self) -> &ConsistencyConfig;

    /// The cluster's token ring.
    fn ring(&self) -> &CassandraRing;

    /// Division of the ring into engine partitions.
    fn token_partitioner(&self) -> &TokenPartitioner;

    /// The bounded executor for blocking sstable I/O. Implementations
    /// size and own it; it is shared across partitions within a job.
    fn executor(&self) -> &IoExecutor;

    /// Asynchronously lists the sstables on `instance` overlapping
    /// `range`. Order of the returned listing is preserved per replica.
    async fn list_instance(
        &self,
        partition_id: usize,
        range: &TokenRange,
        instance: &CassandraInstance,
    ) -> Result<Vec<Arc<dyn SSTable>>, ReadError>;

    /// Availability hint for an instance, e.g. from an earlier snapshot
    /// request that already failed against it.
    fn availability(&self, _instance: &CassandraInstance) -> AvailabilityHint {
        AvailabilityHint::Unknown
    }

    /// Whether sstables that cannot intersect the partition's token
    /// range should be filtered out.
    fn filter_non_intersecting_sstables(&self) -> bool {
        true
    }

    /// Deadline for a single replica's listing; expiry is a fetch
    /// failure and triggers failover.
    fn replica_deadline(&self) -> Duration {
        DEFAULT_REPLICA_DEADLINE
    }

    /// Observability sink.
    fn stats(&self) -> Arc<dyn Stats> {
        Arc::new(NoopStats)
    }

    /// Number of engine partitions the ring was divided into.
    fn partition_count(&self) -> usize
    where
        Self: Sized,
    {
        self.token_partitioner().num_partitions()
    }

    /// Whether a partition key's token belongs to the given engine
    /// partition.
    fn is_in_partition(&self, partition_id: usize, token: &Token, key: &Bytes) -> bool
    where
        Self: Sized,
    {
        self.token_partitioner()
            .is_in_partition(token, key, partition_id)
    }

    /// Restricts caller-supplied filters to the engine partition's token
    /// range and appends the partition's own range filter. Fails with
    /// [`ReadError::NoMatchFound`] when the caller supplied filters and
    /// none of them can match the partition.
    fn filters_in_range(
        &self,
        partition_id: usize,
        filters: &[Arc<dyn CustomFilter>],
    ) -> Result<Vec<Arc<dyn CustomFilter>>, ReadError>
    where
        Self: Sized,
    {
        let range = self
            .token_partitioner()
            .token_range(partition_id)
            .ok_or(ReadError::UnknownPartition { partition_id })?;

        let mut filters_in_range: Vec<Arc<dyn CustomFilter>> = filters
            .iter()
            .filter(|filter| filter.overlaps(range))
            .cloned()
            .collect();
        if !filters.is_empty() && filters_in_range.is_empty() {
            debug!(
                partition_id,
                range = %range,
                "No filter overlaps with the engine partition's token range"
            );
            return Err(ReadError::NoMatchFound);
        }

        filters_in_range.push(Arc::new(PartitionRangeFilter::new(range.clone())));
        if self.filter_non_intersecting_sstables() {
            Ok(filters_in_range)
        } else {
            Ok(filters.to_vec())
        }
    }

    /// Plans and prepares the partition read: selects the replicas that
    /// satisfy the consistency level over the partition's token range
    /// and returns the coordinator that will fetch from them.
    fn sstables(
        &self,
        partition_id: usize,
        filters: &[Arc<dyn CustomFilter>],
    ) -> Result<MultipleReplicas<'_>, ReadError>
    where
        Self: Sized,
    {
        let token_partitioner = self.token_partitioner();
        let range = token_partitioner
            .token_range(partition_id)
            .ok_or(ReadError::UnknownPartition { partition_id })?
            .clone();

        let ring = self.ring();
        let rf = ring.replication_factor();
        let config = self.consistency_config();
        config.validate_replication_factor(rf)?;

        // Restrict the ring to the sub-ranges the partition and the
        // key-specific filters are interested in.
        let sub_ranges = ring.sub_ranges(&range);
        let key_filters: Vec<&Arc<dyn CustomFilter>> = filters
            .iter()
            .filter(|filter| filter.can_filter_by_key())
            .collect();
        let instance_ranges: Vec<(TokenRange, Vec<CassandraInstance>)> = if key_filters.is_empty()
        {
            sub_ranges
        } else {
            sub_ranges
                .into_iter()
                .filter(|(sub_range, _)| {
                    key_filters.iter().any(|filter| filter.overlaps(sub_range))
                })
                .collect()
        };

        let replicas = planner::ranges_to_replicas(config, &instance_ranges);
        debug!(
            partition_id,
            range = %range,
            num_replicas = replicas.len(),
            "Creating partitioned sstable supplier for engine partition"
        );

        let min_replicas = config.min_replicas(rf);
        let replica_set = planner::split_replicas(
            config,
            &instance_ranges,
            &replicas,
            |instance| self.availability(instance),
            min_replicas,
            partition_id,
        )?;
        if replica_set.primary().len() < min_replicas {
            // Backups are only ever the overflow beyond min_replicas.
            debug_assert!(replica_set.backup().is_empty());
            return Err(ReadError::NotEnoughReplicas {
                consistency_level: config.consistency_level(),
                range,
                want: min_replicas,
                got: replicas.len(),
                datacenter: config.datacenter().map(str::to_string),
            });
        }

        let stats = self.stats();
        let primary: Vec<SingleReplica> = replica_set
            .primary()
            .iter()
            .map(|instance| {
                stats.primary_replica_selected(instance, partition_id);
                SingleReplica::new(
                    instance.clone(),
                    range.clone(),
                    partition_id,
                    replica_set.is_repair_primary(instance),
                )
            })
            .collect();
        // Backups may replace the repair primary, so they read repaired
        // sstables too; repeats are identical across replicas.
        let backup: VecDeque<SingleReplica> = replica_set
            .backup()
            .iter()
            .map(|instance| {
                stats.backup_replica_selected(instance, partition_id);
                SingleReplica::new(instance.clone(), range.clone(), partition_id, true)
            })
            .collect();

        Ok(MultipleReplicas::new(
            self,
            range,
            partition_id,
            primary,
            backup,
            stats,
        ))
    }
}
