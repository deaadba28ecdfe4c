//! Fetching sstable listings from replicas: one fetch per replica, a
//! coordinator that drives the primaries concurrently and swaps in
//! backups on failure.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::data::{PartitionedDataLayer, RepairState, SSTable};
use crate::errors::ReadError;
use crate::routing::{CassandraInstance, TokenRange};
use crate::stats::Stats;

/// One replica's share of a partition read: list the sstables on
/// `instance` overlapping `range`.
#[derive(Debug, Clone)]
pub struct SingleReplica {
    instance: CassandraInstance,
    range: TokenRange,
    partition_id: usize,
    repair_primary: bool,
}

impl SingleReplica {
    pub(crate) fn new(
        instance: CassandraInstance,
        range: TokenRange,
        partition_id: usize,
        repair_primary: bool,
    ) -> Self {
        Self {
            instance,
            range,
            partition_id,
            repair_primary,
        }
    }

    pub fn instance(&self) -> &CassandraInstance {
        &self.instance
    }

    pub fn range(&self) -> &TokenRange {
        &self.range
    }

    /// Whether this replica contributes repaired sstables. Non-repair
    /// primaries only contribute unrepaired data: repaired data is
    /// identical across replicas by construction, so one replica serving
    /// it is enough.
    pub fn is_repair_primary(&self) -> bool {
        self.repair_primary
    }

    /// Lists this replica's sstables through the data layer, under the
    /// per-replica deadline. Listing order is preserved.
    pub async fn sstables(
        &self,
        data_layer: &dyn PartitionedDataLayer,
        deadline: Duration,
        stats: &dyn Stats,
    ) -> Result<Vec<Arc<dyn SSTable>>, ReadError> {
        let started = Instant::now();
        let listed = match tokio::time::timeout(
            deadline,
            data_layer.list_instance(self.partition_id, &self.range, &self.instance),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ReadError::Timeout(self.instance.node_name().to_string()));
            }
        };

        let total = listed.len();
        let sstables: Vec<Arc<dyn SSTable>> = if self.repair_primary {
            listed
        } else {
            listed
                .into_iter()
                .filter(|sstable| sstable.repair_state() != RepairState::Repaired)
                .collect()
        };
        debug!(
            instance = self.instance.node_name(),
            partition_id = self.partition_id,
            kept = sstables.len(),
            total,
            repair_primary = self.repair_primary,
            "Listed sstables on replica"
        );
        stats.replica_fetch_succeeded(&self.instance, sstables.len(), started.elapsed());
        Ok(sstables)
    }
}

/// Coordinates a partition read across its replica set.
///
/// One fetch runs per primary replica; when a fetch fails its partial
/// result is discarded and the next backup (in availability order) is
/// promoted. The read succeeds once every current primary has completed,
/// delivering the union of the per-replica sstable sets; no inter-replica
/// ordering is guaranteed. With the backup pool exhausted a failing
/// primary fails the partition with [`ReadError::ReadFailure`].
pub struct MultipleReplicas<'a> {
    data_layer: &'a (dyn PartitionedDataLayer + 'a),
    range: TokenRange,
    partition_id: usize,
    primary: Vec<SingleReplica>,
    backup: VecDeque<SingleReplica>,
    stats: Arc<dyn Stats>,
}

impl std::fmt::Debug for MultipleReplicas<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipleReplicas")
            .field("range", &self.range)
            .field("partition_id", &self.partition_id)
            .field("primary", &self.primary)
            .field("backup", &self.backup)
            .finish_non_exhaustive()
    }
}

impl<'a> MultipleReplicas<'a> {
    pub(crate) fn new(
        data_layer: &'a (dyn PartitionedDataLayer + 'a),
        range: TokenRange,
        partition_id: usize,
        primary: Vec<SingleReplica>,
        backup: VecDeque<SingleReplica>,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self {
            data_layer,
            range,
            partition_id,
            primary,
            backup,
            stats,
        }
    }

    /// Token range of the partition being read.
    pub fn range(&self) -> &TokenRange {
        &self.range
    }

    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    pub fn num_primary(&self) -> usize {
        self.primary.len()
    }

    pub fn num_backup(&self) -> usize {
        self.backup.len()
    }

    /// Runs the fetches and returns the combined sstable set.
    ///
    /// Cancelling `cancel` makes the coordinator drop all partial
    /// results and resolve with [`ReadError::Cancelled`]; per the error
    /// taxonomy that outcome is not a failure.
    pub async fn open_all(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<dyn SSTable>>, ReadError> {
        let deadline = self.data_layer.replica_deadline();
        let mut attempted: Vec<String> = Vec::new();
        let mut sstables: Vec<Arc<dyn SSTable>> = Vec::new();

        let mut in_flight = FuturesUnordered::new();
        for replica in self.primary.drain(..) {
            attempted.push(replica.instance().node_name().to_string());
            in_flight.push(Self::fetch(
                self.data_layer,
                replica,
                deadline,
                self.stats.clone(),
            ));
        }

        loop {
            let completed = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(
                        partition_id = self.partition_id,
                        "Partition read cancelled, dropping in-flight fetches"
                    );
                    self.stats.partition_cancelled(self.partition_id);
                    return Err(ReadError::Cancelled);
                }
                completed = in_flight.next() => completed,
            };
            let Some((replica, outcome)) = completed else {
                break;
            };

            match outcome {
                Ok(fetched) => {
                    sstables.extend(fetched);
                }
                Err(error) => {
                    warn!(
                        instance = replica.instance().node_name(),
                        partition_id = self.partition_id,
                        error = %error,
                        "Replica fetch failed"
                    );
                    self.stats.replica_fetch_failed(replica.instance(), &error);
                    match self.backup.pop_front() {
                        Some(promoted) => {
                            debug!(
                                instance = promoted.instance().node_name(),
                                partition_id = self.partition_id,
                                "Promoting backup replica"
                            );
                            self.stats
                                .backup_promoted(promoted.instance(), self.partition_id);
                            attempted.push(promoted.instance().node_name().to_string());
                            in_flight.push(Self::fetch(
                                self.data_layer,
                                promoted,
                                deadline,
                                self.stats.clone(),
                            ));
                        }
                        None => {
                            return Err(ReadError::ReadFailure {
                                partition_id: self.partition_id,
                                range: self.range,
                                attempted,
                            });
                        }
                    }
                }
            }
        }

        Ok(sstables)
    }

    async fn fetch(
        data_layer: &dyn PartitionedDataLayer,
        replica: SingleReplica,
        deadline: Duration,
        stats: Arc<dyn Stats>,
    ) -> (SingleReplica, Result<Vec<Arc<dyn SSTable>>, ReadError>) {
        let outcome = replica.sstables(data_layer, deadline, stats.as_ref()).await;
        (replica, outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use bulkreader_cql::{ConsistencyLevel, Partitioner, ReplicationFactor};

    use super::*;
    use crate::data::planner::ConsistencyConfig;
    use crate::data::{AvailabilityHint, IoExecutor};
    use crate::routing::{CassandraRing, TokenPartitioner};
    use crate::test_utils::setup_tracing;

    #[derive(Debug)]
    struct MockSSTable {
        name: String,
        repair_state: RepairState,
    }

    impl SSTable for MockSSTable {
        fn name(&self) -> &str {
            &self.name
        }

        fn repair_state(&self) -> RepairState {
            self.repair_state
        }

        fn token_range(&self) -> Option<TokenRange> {
            None
        }
    }

    fn sstable(name: &str, repair_state: RepairState) -> Arc<dyn SSTable> {
        Arc::new(MockSSTable {
            name: name.to_string(),
            repair_state,
        })
    }

    /// Data layer over a three-node ring; failures and availability are
    /// scripted per node.
    struct MockDataLayer {
        config: ConsistencyConfig,
        ring: CassandraRing,
        token_partitioner: TokenPartitioner,
        executor: IoExecutor,
        sstables: HashMap<String, Vec<Arc<dyn SSTable>>>,
        failing: HashSet<String>,
        hints: HashMap<String, AvailabilityHint>,
        listed: Mutex<Vec<String>>,
        deadline: Duration,
        block_forever: HashSet<String>,
    }

    impl MockDataLayer {
        fn new(consistency_level: ConsistencyLevel, tokens: &[i64], rf: u32) -> Self {
            let instances: Vec<_> = tokens
                .iter()
                .enumerate()
                .map(|(i, token)| CassandraInstance::new(format!("node-{i}"), *token, "DC1"))
                .collect();
            let ring = CassandraRing::new(
                Partitioner::Murmur3Partitioner,
                ReplicationFactor::simple(rf),
                instances,
            )
            .unwrap();
            let token_partitioner = TokenPartitioner::new(&ring, 1, 1);
            Self {
                config: ConsistencyConfig::new(Some(consistency_level), None).unwrap(),
                ring,
                token_partitioner,
                executor: IoExecutor::new(4),
                sstables: HashMap::new(),
                failing: HashSet::new(),
                hints: HashMap::new(),
                listed: Mutex::new(Vec::new()),
                deadline: Duration::from_secs(5),
                block_forever: HashSet::new(),
            }
        }

        fn with_sstables(mut self, node: &str, sstables: Vec<Arc<dyn SSTable>>) -> Self {
            self.sstables.insert(node.to_string(), sstables);
            self
        }

        fn with_failing(mut self, node: &str) -> Self {
            self.failing.insert(node.to_string());
            self
        }

        fn with_hint(mut self, node: &str, hint: AvailabilityHint) -> Self {
            self.hints.insert(node.to_string(), hint);
            self
        }

        fn listed(&self) -> Vec<String> {
            self.listed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PartitionedDataLayer for MockDataLayer {
        fn consistency_config(&self) -> &ConsistencyConfig {
            &self.config
        }

        fn ring(&self) -> &CassandraRing {
            &self.ring
        }

        fn token_partitioner(&self) -> &TokenPartitioner {
            &self.token_partitioner
        }

        fn executor(&self) -> &IoExecutor {
            &self.executor
        }

        fn availability(&self, instance: &CassandraInstance) -> AvailabilityHint {
            self.hints
                .get(instance.node_name())
                .copied()
                .unwrap_or(AvailabilityHint::Unknown)
        }

        fn replica_deadline(&self) -> Duration {
            self.deadline
        }

        async fn list_instance(
            &self,
            _partition_id: usize,
            _range: &TokenRange,
            instance: &CassandraInstance,
        ) -> Result<Vec<Arc<dyn SSTable>>, ReadError> {
            if self.block_forever.contains(instance.node_name()) {
                futures::future::pending::<()>().await;
            }
            self.listed
                .lock()
                .unwrap()
                .push(instance.node_name().to_string());
            if self.failing.contains(instance.node_name()) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "snapshot unavailable",
                )
                .into());
            }
            let sstables = self
                .sstables
                .get(instance.node_name())
                .cloned()
                .unwrap_or_default();
            let sstables = self
                .executor
                .submit(move || sstables)
                .await?;
            Ok(sstables)
        }
    }

    fn names(sstables: &[Arc<dyn SSTable>]) -> Vec<&str> {
        let mut names: Vec<&str> = sstables.iter().map(|sstable| sstable.name()).collect();
        names.sort();
        names
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failover_promotes_backup_and_succeeds() {
        setup_tracing();
        // Four nodes, CL=THREE over RF=4: three primaries, one backup.
        let data_layer = MockDataLayer::new(ConsistencyLevel::Three, &[0, 100, 200, 300], 4)
            .with_sstables("node-0", vec![sstable("a", RepairState::Unrepaired)])
            .with_sstables("node-1", vec![sstable("b", RepairState::Unrepaired)])
            .with_sstables("node-2", vec![sstable("c", RepairState::Unrepaired)])
            .with_sstables("node-3", vec![sstable("d", RepairState::Unrepaired)])
            .with_failing("node-1")
            .with_hint("node-3", AvailabilityHint::Down);

        let supplier = data_layer.sstables(0, &[]).unwrap();
        assert_eq!(supplier.num_primary(), 3);
        assert_eq!(supplier.num_backup(), 1);

        let sstables = supplier.open_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(names(&sstables), ["a", "c", "d"]);
        // The backup was only contacted after the primary failed.
        assert!(data_layer.listed().contains(&"node-3".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exhausted_backups_raise_read_failure() {
        setup_tracing();
        let data_layer = MockDataLayer::new(ConsistencyLevel::Two, &[0, 100, 200], 3)
            .with_sstables("node-0", vec![sstable("a", RepairState::Unrepaired)])
            .with_failing("node-1")
            .with_failing("node-2");

        let supplier = data_layer.sstables(0, &[]).unwrap();
        let error = supplier
            .open_all(&CancellationToken::new())
            .await
            .unwrap_err();
        match error {
            ReadError::ReadFailure {
                partition_id,
                attempted,
                ..
            } => {
                assert_eq!(partition_id, 0);
                assert_eq!(attempted.len(), 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_only_repair_primary_contributes_repaired_sstables() {
        setup_tracing();
        let data_layer = MockDataLayer::new(ConsistencyLevel::Two, &[0, 100, 200], 3)
            .with_sstables(
                "node-0",
                vec![
                    sstable("repaired-0", RepairState::Repaired),
                    sstable("unrepaired-0", RepairState::Unrepaired),
                ],
            )
            .with_sstables(
                "node-1",
                vec![
                    sstable("repaired-1", RepairState::Repaired),
                    sstable("unrepaired-1", RepairState::Unrepaired),
                    sstable("unknown-1", RepairState::Unknown),
                ],
            )
            // node-0 sorts first and becomes the repair primary.
            .with_hint("node-0", AvailabilityHint::Up);

        let supplier = data_layer.sstables(0, &[]).unwrap();
        let sstables = supplier.open_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            names(&sstables),
            ["repaired-0", "unknown-1", "unrepaired-0", "unrepaired-1"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timeout_counts_as_fetch_failure() {
        setup_tracing();
        let mut data_layer = MockDataLayer::new(ConsistencyLevel::One, &[0, 100], 2)
            .with_sstables("node-0", vec![sstable("a", RepairState::Unrepaired)])
            .with_sstables("node-1", vec![sstable("b", RepairState::Unrepaired)])
            .with_hint("node-1", AvailabilityHint::Up);
        data_layer.deadline = Duration::from_millis(50);
        data_layer.block_forever.insert("node-1".to_string());

        // node-1 is preferred but hangs; the backup finishes the read.
        let supplier = data_layer.sstables(0, &[]).unwrap();
        let sstables = supplier.open_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(names(&sstables), ["a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_completes_quietly() {
        setup_tracing();
        let mut data_layer = MockDataLayer::new(ConsistencyLevel::One, &[0, 100], 2)
            .with_sstables("node-0", vec![sstable("a", RepairState::Unrepaired)]);
        data_layer.block_forever.insert("node-0".to_string());
        data_layer.block_forever.insert("node-1".to_string());

        let cancel = CancellationToken::new();
        let supplier = data_layer.sstables(0, &[]).unwrap();

        let cancel_trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_trigger.cancel();
        });

        let outcome = supplier.open_all(&cancel).await;
        assert!(matches!(outcome, Err(ReadError::Cancelled)));
    }
}
