//! Replica planning: which instances a partition read contacts first,
//! which ones stand by as backups, and whether the selection satisfies
//! the requested consistency level.

use itertools::Itertools;
use tracing::{debug, warn};

use bulkreader_cql::replication::{ReplicationFactor, ReplicationStrategy};
use bulkreader_cql::ConsistencyLevel;

use crate::data::AvailabilityHint;
use crate::errors::ReadError;
use crate::routing::{CassandraInstance, TokenRange};

/// The consistency level a job reads at, plus the datacenter it is
/// pinned to (always stored upper-case; instance datacenters are
/// compared case-insensitively).
///
/// Equality and hashing cover both fields, so values are safe to use as
/// cache keys; data layers that also vary by ring or partitioner must
/// include those in their own keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsistencyConfig {
    consistency_level: ConsistencyLevel,
    datacenter: Option<String>,
}

impl ConsistencyConfig {
    pub const DEFAULT_CONSISTENCY_LEVEL: ConsistencyLevel = ConsistencyLevel::LocalQuorum;

    /// Validates the combination at construction: serial levels are
    /// meaningless for bulk reads and `EACH_QUORUM` is not implemented.
    pub fn new(
        consistency_level: Option<ConsistencyLevel>,
        datacenter: Option<&str>,
    ) -> Result<Self, ReadError> {
        let consistency_level = consistency_level.unwrap_or(Self::DEFAULT_CONSISTENCY_LEVEL);
        if consistency_level.is_serial() {
            return Err(ReadError::InvalidConsistency {
                consistency_level,
                reason: "serial consistency requires a live coordinator".to_string(),
            });
        }
        if consistency_level == ConsistencyLevel::EachQuorum {
            return Err(ReadError::NotImplemented("EACH_QUORUM"));
        }
        Ok(Self {
            consistency_level,
            datacenter: datacenter.map(str::to_uppercase),
        })
    }

    pub fn consistency_level(&self) -> ConsistencyLevel {
        self.consistency_level
    }

    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }

    /// Checks the consistency level against a keyspace's replication
    /// factor. Only NetworkTopologyStrategy carries a datacenter
    /// dimension; a single-DC keyspace with no datacenter configured
    /// implicitly reads from that one datacenter.
    pub fn validate_replication_factor(&self, rf: &ReplicationFactor) -> Result<(), ReadError> {
        if rf.strategy() != ReplicationStrategy::NetworkTopologyStrategy {
            return Ok(());
        }
        if self.datacenter.is_none() && rf.options().len() == 1 {
            return Ok(());
        }
        if self.consistency_level.is_dc_local() && self.datacenter.is_none() {
            return Err(ReadError::InvalidConsistency {
                consistency_level: self.consistency_level,
                reason: "a datacenter must be specified for a DC-local consistency level"
                    .to_string(),
            });
        }
        let Some(datacenter) = self.datacenter.as_deref() else {
            return Ok(());
        };
        match rf.datacenter_rf(datacenter) {
            None => Err(ReadError::InvalidConsistency {
                consistency_level: self.consistency_level,
                reason: format!(
                    "datacenter {datacenter} not found in replication options {:?}",
                    rf.options().keys().collect::<Vec<_>>()
                ),
            }),
            Some(0) => Err(ReadError::InvalidConsistency {
                consistency_level: self.consistency_level,
                reason: format!(
                    "cannot read from datacenter {datacenter} with replication factor 0"
                ),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Minimum number of replicas to satisfy the consistency level.
    pub fn min_replicas(&self, rf: &ReplicationFactor) -> usize {
        self.consistency_level.block_for(rf, self.datacenter())
    }
}

/// The replicas chosen for one engine partition: primaries are contacted
/// immediately, backups only replace failed primaries. The first primary
/// doubles as the repair primary when the partition observes a single
/// ring sub-range.
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    primary: Vec<CassandraInstance>,
    backup: Vec<CassandraInstance>,
    repair_primary: Option<CassandraInstance>,
    min_replicas: usize,
    partition_id: usize,
}

impl ReplicaSet {
    fn new(min_replicas: usize, partition_id: usize) -> Self {
        Self {
            primary: Vec::new(),
            backup: Vec::new(),
            repair_primary: None,
            min_replicas,
            partition_id,
        }
    }

    fn add(&mut self, instance: CassandraInstance) {
        if self.primary.len() < self.min_replicas {
            self.add_primary(instance);
        } else {
            self.add_backup(instance);
        }
    }

    fn add_primary(&mut self, instance: CassandraInstance) {
        debug!(
            node_name = instance.node_name(),
            token = %instance.token(),
            data_center = instance.data_center(),
            partition_id = self.partition_id,
            "Selecting instance as primary replica"
        );
        if self.repair_primary.is_none() {
            // The first primary reads repaired sstables on behalf of the
            // whole replica set.
            self.repair_primary = Some(instance.clone());
        }
        self.primary.push(instance);
    }

    fn add_backup(&mut self, instance: CassandraInstance) {
        debug!(
            node_name = instance.node_name(),
            token = %instance.token(),
            data_center = instance.data_center(),
            partition_id = self.partition_id,
            "Selecting instance as backup replica"
        );
        self.backup.push(instance);
    }

    /// Primaries in availability order.
    pub fn primary(&self) -> &[CassandraInstance] {
        &self.primary
    }

    /// Backups in availability order.
    pub fn backup(&self) -> &[CassandraInstance] {
        &self.backup
    }

    pub fn repair_primary(&self) -> Option<&CassandraInstance> {
        self.repair_primary.as_ref()
    }

    /// Whether an instance should read repaired sstables. True for the
    /// designated repair primary, and for everyone when repair awareness
    /// is disabled (no repair primary nominated).
    pub fn is_repair_primary(&self, instance: &CassandraInstance) -> bool {
        match &self.repair_primary {
            None => true,
            Some(repair_primary) => repair_primary == instance,
        }
    }

    pub fn min_replicas(&self) -> usize {
        self.min_replicas
    }

    pub fn partition_id(&self) -> usize {
        self.partition_id
    }
}

/// Flattens the replicas of the retained sub-ranges into the candidate
/// set, keeping only instances in the configured datacenter when the
/// consistency level is DC-local. First-seen order is preserved so the
/// later availability sort stays deterministic.
pub(crate) fn ranges_to_replicas(
    config: &ConsistencyConfig,
    ranges: &[(TokenRange, Vec<CassandraInstance>)],
) -> Vec<CassandraInstance> {
    ranges
        .iter()
        .flat_map(|(_, replicas)| replicas.iter())
        .filter(|instance| {
            !config.consistency_level().is_dc_local()
                || config
                    .datacenter()
                    .map_or(true, |dc| instance.data_center().eq_ignore_ascii_case(dc))
        })
        .unique()
        .cloned()
        .collect()
}

/// Splits the candidate replicas into primaries and backups so the read
/// achieves consistency: candidates are sorted by availability hint
/// (up first), primaries fill to `min_replicas`, the rest stand by.
/// Fails with [`ReadError::NotEnoughReplicas`] when any retained
/// sub-range has fewer primaries than the consistency level demands.
pub(crate) fn split_replicas(
    config: &ConsistencyConfig,
    ranges: &[(TokenRange, Vec<CassandraInstance>)],
    replicas: &[CassandraInstance],
    availability: impl Fn(&CassandraInstance) -> AvailabilityHint,
    min_replicas: usize,
    partition_id: usize,
) -> Result<ReplicaSet, ReadError> {
    let split = build_replica_set(ranges, replicas, availability, min_replicas, partition_id);
    validate_consistency(config, ranges, split.primary(), min_replicas)?;
    Ok(split)
}

fn build_replica_set(
    ranges: &[(TokenRange, Vec<CassandraInstance>)],
    replicas: &[CassandraInstance],
    availability: impl Fn(&CassandraInstance) -> AvailabilityHint,
    min_replicas: usize,
    partition_id: usize,
) -> ReplicaSet {
    let mut replica_set = ReplicaSet::new(min_replicas, partition_id);

    // Stable sort: instances known to be up are attempted first, ties
    // keep the candidate order.
    let mut sorted = replicas.to_vec();
    sorted.sort_by_key(|instance| availability(instance));
    for instance in sorted {
        replica_set.add(instance);
    }

    if ranges.len() != 1 {
        // Repaired/unrepaired segregation needs one authoritative
        // replica per partition, which only exists when the partition
        // owns a single replica set.
        warn!(
            num_ranges = ranges.len(),
            partition_id,
            "Cannot use incremental repair awareness when an engine partition owns more than \
             one replica set, performance will be degraded"
        );
        replica_set.repair_primary = None;
    }

    replica_set
}

/// The per-sub-range consistency check: every retained sub-range must
/// have at least `min_replicas` of its own replicas among the primaries.
fn validate_consistency(
    config: &ConsistencyConfig,
    ranges: &[(TokenRange, Vec<CassandraInstance>)],
    primary: &[CassandraInstance],
    min_replicas: usize,
) -> Result<(), ReadError> {
    for (range, replicas) in ranges {
        let selected = replicas
            .iter()
            .filter(|instance| primary.contains(instance))
            .count();
        if selected < min_replicas {
            return Err(ReadError::NotEnoughReplicas {
                consistency_level: config.consistency_level(),
                range: range.clone(),
                want: min_replicas,
                got: selected,
                datacenter: config.datacenter().map(str::to_string),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bulkreader_cql::ReplicationFactor;

    use super::*;
    use crate::routing::TokenRange;
    use crate::test_utils::setup_tracing;

    fn instance(name: &str, token: i64, dc: &str) -> CassandraInstance {
        CassandraInstance::new(name, token, dc)
    }

    fn local_quorum(dc: Option<&str>) -> ConsistencyConfig {
        ConsistencyConfig::new(Some(ConsistencyLevel::LocalQuorum), dc).unwrap()
    }

    #[test]
    fn test_serial_levels_rejected_at_construction() {
        for level in [ConsistencyLevel::Serial, ConsistencyLevel::LocalSerial] {
            assert!(matches!(
                ConsistencyConfig::new(Some(level), None),
                Err(ReadError::InvalidConsistency { .. })
            ));
        }
    }

    #[test]
    fn test_each_quorum_rejected_at_construction() {
        assert!(matches!(
            ConsistencyConfig::new(Some(ConsistencyLevel::EachQuorum), None),
            Err(ReadError::NotImplemented("EACH_QUORUM"))
        ));
    }

    #[test]
    fn test_default_level_is_local_quorum() {
        let config = ConsistencyConfig::new(None, Some("dc1")).unwrap();
        assert_eq!(config.consistency_level(), ConsistencyLevel::LocalQuorum);
        // Datacenters are normalized to upper case.
        assert_eq!(config.datacenter(), Some("DC1"));
    }

    #[test]
    fn test_validate_replication_factor() {
        let nts = ReplicationFactor::network_topology([
            ("DC1".to_string(), 3),
            ("DC2".to_string(), 3),
        ]);

        // Simple strategy has no datacenter dimension to check.
        local_quorum(None)
            .validate_replication_factor(&ReplicationFactor::simple(3))
            .unwrap();

        // DC-local level over a multi-DC keyspace needs a datacenter.
        assert!(matches!(
            local_quorum(None).validate_replication_factor(&nts),
            Err(ReadError::InvalidConsistency { .. })
        ));

        // Named datacenter must exist with a positive count.
        local_quorum(Some("DC1")).validate_replication_factor(&nts).unwrap();
        assert!(matches!(
            local_quorum(Some("DC3")).validate_replication_factor(&nts),
            Err(ReadError::InvalidConsistency { .. })
        ));
        let zero_rf =
            ReplicationFactor::network_topology([("DC1".to_string(), 0)]);
        assert!(matches!(
            local_quorum(Some("DC1")).validate_replication_factor(&zero_rf),
            Err(ReadError::InvalidConsistency { .. })
        ));

        // Single-DC keyspace with no datacenter configured is implicit.
        let single =
            ReplicationFactor::network_topology([("DC1".to_string(), 3)]);
        local_quorum(None).validate_replication_factor(&single).unwrap();

        // Non-DC-local levels don't require a datacenter.
        ConsistencyConfig::new(Some(ConsistencyLevel::Quorum), None)
            .unwrap()
            .validate_replication_factor(&nts)
            .unwrap();
    }

    fn single_range(replicas: &[CassandraInstance]) -> Vec<(TokenRange, Vec<CassandraInstance>)> {
        vec![(TokenRange::open_closed(0, 100), replicas.to_vec())]
    }

    #[test]
    fn test_split_replicas_local_quorum_with_down_instance() {
        setup_tracing();
        let up1 = instance("up-1", 10, "DC1");
        let up2 = instance("up-2", 20, "DC1");
        let down = instance("down-1", 30, "DC1");
        let replicas = [down.clone(), up1.clone(), up2.clone()];
        let ranges = single_range(&replicas);
        let hints: HashMap<&str, AvailabilityHint> = HashMap::from([
            ("up-1", AvailabilityHint::Up),
            ("up-2", AvailabilityHint::Up),
            ("down-1", AvailabilityHint::Down),
        ]);

        let config = local_quorum(Some("DC1"));
        let rf = ReplicationFactor::network_topology([("DC1".to_string(), 3)]);
        let min_replicas = config.min_replicas(&rf);
        assert_eq!(min_replicas, 2);

        let candidates = ranges_to_replicas(&config, &ranges);
        let split = split_replicas(
            &config,
            &ranges,
            &candidates,
            |instance| hints[instance.node_name()],
            min_replicas,
            7,
        )
        .unwrap();

        assert_eq!(split.primary(), [up1.clone(), up2.clone()]);
        assert_eq!(split.backup(), [down]);
        assert_eq!(split.repair_primary(), Some(&up1));
        assert!(split.is_repair_primary(&up1));
        assert!(!split.is_repair_primary(&up2));
        assert_eq!(split.partition_id(), 7);
    }

    #[test]
    fn test_dc_local_filtering_is_case_insensitive() {
        let local = instance("local", 10, "dc1");
        let remote = instance("remote", 20, "DC2");
        let ranges = single_range(&[local.clone(), remote]);

        let candidates = ranges_to_replicas(&local_quorum(Some("DC1")), &ranges);
        assert_eq!(candidates, [local]);
    }

    #[test]
    fn test_non_dc_local_keeps_all_replicas() {
        let config = ConsistencyConfig::new(Some(ConsistencyLevel::Quorum), Some("DC1")).unwrap();
        let ranges = single_range(&[
            instance("local", 10, "DC1"),
            instance("remote", 20, "DC2"),
        ]);
        assert_eq!(ranges_to_replicas(&config, &ranges).len(), 2);
    }

    #[test]
    fn test_split_replicas_quorum_boundary() {
        let config = ConsistencyConfig::new(Some(ConsistencyLevel::Quorum), None).unwrap();
        let rf = ReplicationFactor::simple(3);
        let min_replicas = config.min_replicas(&rf);
        assert_eq!(min_replicas, 2);

        // Two candidates satisfy quorum exactly.
        let two = [instance("a", 1, "DC1"), instance("b", 2, "DC1")];
        let ranges = single_range(&two);
        let split = split_replicas(
            &config,
            &ranges,
            &two,
            |_| AvailabilityHint::Unknown,
            min_replicas,
            0,
        )
        .unwrap();
        assert_eq!(split.primary().len(), 2);
        assert!(split.backup().is_empty());

        // One candidate does not.
        let one = [instance("a", 1, "DC1")];
        let ranges = single_range(&one);
        let err = split_replicas(
            &config,
            &ranges,
            &one,
            |_| AvailabilityHint::Unknown,
            min_replicas,
            0,
        )
        .unwrap_err();
        match err {
            ReadError::NotEnoughReplicas { want, got, .. } => {
                assert_eq!(want, 2);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_multiple_ranges_disable_repair_primary() {
        let a = instance("a", 10, "DC1");
        let b = instance("b", 20, "DC1");
        let ranges = vec![
            (TokenRange::open_closed(0, 50), vec![a.clone(), b.clone()]),
            (TokenRange::open_closed(50, 100), vec![a.clone(), b.clone()]),
        ];
        let config = ConsistencyConfig::new(Some(ConsistencyLevel::One), None).unwrap();

        let split = split_replicas(
            &config,
            &ranges,
            &[a.clone(), b.clone()],
            |_| AvailabilityHint::Unknown,
            1,
            0,
        )
        .unwrap();

        assert_eq!(split.repair_primary(), None);
        // With repair awareness disabled every replica reads repaired data.
        assert!(split.is_repair_primary(&a));
        assert!(split.is_repair_primary(&b));
    }

    #[test]
    fn test_per_sub_range_validation() {
        // A globally sufficient primary pool can still miss one
        // sub-range entirely.
        let a = instance("a", 10, "DC1");
        let b = instance("b", 20, "DC1");
        let c = instance("c", 30, "DC1");
        let ranges = vec![
            (TokenRange::open_closed(0, 50), vec![a.clone(), b.clone()]),
            (TokenRange::open_closed(50, 100), vec![c.clone()]),
        ];
        let config = ConsistencyConfig::new(Some(ConsistencyLevel::Two), None).unwrap();

        let err = split_replicas(
            &config,
            &ranges,
            &[a, b, c],
            |_| AvailabilityHint::Unknown,
            2,
            0,
        )
        .unwrap_err();
        match err {
            ReadError::NotEnoughReplicas { range, want, got, .. } => {
                assert_eq!(range, TokenRange::open_closed(50, 100));
                assert_eq!(want, 2);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_availability_ordering() {
        assert!(AvailabilityHint::Up < AvailabilityHint::Unknown);
        assert!(AvailabilityHint::Unknown < AvailabilityHint::Down);
    }
}
