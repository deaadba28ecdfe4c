//! Consistency levels and the replica counts they demand.

use strum_macros::{Display, EnumString};

use crate::replication::{ReplicationFactor, ReplicationStrategy};

/// The consistency level a bulk read runs at.
///
/// `Serial` and `LocalSerial` exist so that configuration strings parse,
/// but the read path rejects them at construction; `EachQuorum` is
/// likewise rejected as not implemented.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    #[default]
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

impl ConsistencyLevel {
    /// Whether the level is satisfied within a single datacenter.
    pub fn is_dc_local(&self) -> bool {
        matches!(
            self,
            ConsistencyLevel::LocalOne
                | ConsistencyLevel::LocalQuorum
                | ConsistencyLevel::LocalSerial
        )
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, ConsistencyLevel::Serial | ConsistencyLevel::LocalSerial)
    }

    /// Minimum number of replicas that must be read to satisfy this
    /// consistency level under the given replication factor.
    ///
    /// # Panics
    ///
    /// Panics for `EachQuorum`, `Serial` and `LocalSerial`; those levels
    /// never reach this point because the read path rejects them when the
    /// consistency configuration is constructed.
    pub fn block_for(&self, rf: &ReplicationFactor, datacenter: Option<&str>) -> usize {
        match self {
            ConsistencyLevel::Any | ConsistencyLevel::One | ConsistencyLevel::LocalOne => 1,
            ConsistencyLevel::Two => 2,
            ConsistencyLevel::Three => 3,
            ConsistencyLevel::Quorum => quorum_for(rf.total()),
            ConsistencyLevel::All => rf.total(),
            ConsistencyLevel::LocalQuorum => quorum_for(local_replication_count(rf, datacenter)),
            ConsistencyLevel::EachQuorum
            | ConsistencyLevel::Serial
            | ConsistencyLevel::LocalSerial => {
                panic!("block_for is undefined for consistency level {self}")
            }
        }
    }
}

fn quorum_for(replicas: usize) -> usize {
    replicas / 2 + 1
}

/// Replica count within the local datacenter. With SimpleStrategy there
/// is no datacenter dimension, so the total applies.
fn local_replication_count(rf: &ReplicationFactor, datacenter: Option<&str>) -> usize {
    match rf.strategy() {
        ReplicationStrategy::NetworkTopologyStrategy => datacenter
            .or_else(|| rf.sole_datacenter())
            .and_then(|datacenter| rf.datacenter_rf(datacenter))
            .map(|count| count as usize)
            .unwrap_or(0),
        ReplicationStrategy::SimpleStrategy => rf.total(),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(
            ConsistencyLevel::from_str("LOCAL_QUORUM"),
            Ok(ConsistencyLevel::LocalQuorum)
        );
        assert_eq!(ConsistencyLevel::EachQuorum.to_string(), "EACH_QUORUM");
        assert_eq!(ConsistencyLevel::default(), ConsistencyLevel::LocalQuorum);
    }

    #[test]
    fn test_block_for_fixed_levels() {
        let rf = ReplicationFactor::simple(3);
        assert_eq!(ConsistencyLevel::Any.block_for(&rf, None), 1);
        assert_eq!(ConsistencyLevel::One.block_for(&rf, None), 1);
        assert_eq!(ConsistencyLevel::LocalOne.block_for(&rf, None), 1);
        assert_eq!(ConsistencyLevel::Two.block_for(&rf, None), 2);
        assert_eq!(ConsistencyLevel::Three.block_for(&rf, None), 3);
    }

    #[test]
    fn test_block_for_quorum_and_all() {
        let rf = ReplicationFactor::network_topology([
            ("DC1".to_string(), 3),
            ("DC2".to_string(), 3),
        ]);
        assert_eq!(ConsistencyLevel::Quorum.block_for(&rf, None), 4);
        assert_eq!(ConsistencyLevel::All.block_for(&rf, None), 6);
        assert_eq!(ConsistencyLevel::LocalQuorum.block_for(&rf, Some("DC1")), 2);
    }

    #[test]
    fn test_local_quorum_uses_sole_datacenter() {
        let rf = ReplicationFactor::network_topology([("DC1".to_string(), 5)]);
        assert_eq!(ConsistencyLevel::LocalQuorum.block_for(&rf, None), 3);
    }

    #[test]
    fn test_local_quorum_on_simple_strategy_uses_total() {
        let rf = ReplicationFactor::simple(5);
        assert_eq!(ConsistencyLevel::LocalQuorum.block_for(&rf, None), 3);
    }

    #[test]
    fn test_dc_locality() {
        assert!(ConsistencyLevel::LocalOne.is_dc_local());
        assert!(ConsistencyLevel::LocalQuorum.is_dc_local());
        assert!(ConsistencyLevel::LocalSerial.is_dc_local());
        assert!(!ConsistencyLevel::Quorum.is_dc_local());
        assert!(!ConsistencyLevel::EachQuorum.is_dc_local());
    }
}
