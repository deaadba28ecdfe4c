//! The cluster's token ring: which replicas own which token sub-range.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use itertools::Itertools;

use bulkreader_cql::replication::{ReplicationFactor, ReplicationStrategy};
use bulkreader_cql::Partitioner;

use crate::errors::ReadError;
use crate::routing::{Token, TokenRange};

/// One node of the cluster. Equality and hashing go by node name alone:
/// the same node may be observed with a bounced token or datacenter
/// string, but it stays the same replica.
#[derive(Clone, Debug)]
pub struct CassandraInstance {
    node_name: String,
    token: Token,
    data_center: String,
}

impl CassandraInstance {
    pub fn new(
        node_name: impl Into<String>,
        token: impl Into<Token>,
        data_center: impl Into<String>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            token: token.into(),
            data_center: data_center.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn data_center(&self) -> &str {
        &self.data_center
    }
}

impl PartialEq for CassandraInstance {
    fn eq(&self, other: &Self) -> bool {
        self.node_name == other.node_name
    }
}

impl Eq for CassandraInstance {}

impl Hash for CassandraInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_name.hash(state);
    }
}

impl fmt::Display for CassandraInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.node_name, self.data_center)
    }
}

/// Immutable mapping from contiguous token sub-ranges to ordered replica
/// lists, together with the partitioner and replication factor that
/// produced it.
///
/// The sub-ranges cover the partitioner's token span exactly once; the
/// wrap-around interval is split into the two non-wrapping pieces
/// `[min, first_token]` and `(last_token, max]`, both owned by the node
/// at the first token. Every replica list has length equal to the total
/// replication factor.
#[derive(Clone, Debug)]
pub struct CassandraRing {
    partitioner: Partitioner,
    replication_factor: ReplicationFactor,
    instances: Vec<CassandraInstance>,
    range_map: Vec<(TokenRange, Vec<CassandraInstance>)>,
}

impl CassandraRing {
    pub fn new(
        partitioner: Partitioner,
        replication_factor: ReplicationFactor,
        instances: Vec<CassandraInstance>,
    ) -> Result<Self, ReadError> {
        if instances.is_empty() {
            return Err(ReadError::InvalidRing("no instances".to_string()));
        }
        let mut instances = instances;
        instances.sort_by(|a, b| a.token().cmp(b.token()));
        if let Some((a, b)) = instances.iter().tuple_windows().find(|(a, b)| a.token() == b.token())
        {
            return Err(ReadError::InvalidRing(format!(
                "instances {} and {} share token {}",
                a.node_name(),
                b.node_name(),
                a.token()
            )));
        }

        // Per-datacenter rings, needed to walk NetworkTopologyStrategy
        // replicas; each keeps the global token order.
        let mut datacenters: HashMap<&str, Vec<&CassandraInstance>> = HashMap::new();
        for instance in &instances {
            datacenters
                .entry(instance.data_center())
                .or_default()
                .push(instance);
        }

        let replicas_for = |token: &Token| -> Result<Vec<CassandraInstance>, ReadError> {
            let replicas = match replication_factor.strategy() {
                ReplicationStrategy::SimpleStrategy => {
                    walk_ring(&instances, token, replication_factor.total())
                }
                ReplicationStrategy::NetworkTopologyStrategy => {
                    let mut replicas = Vec::with_capacity(replication_factor.total());
                    for (datacenter, dc_rf) in replication_factor.options() {
                        let dc_ring = datacenters
                            .get(datacenter.as_str())
                            .map(Vec::as_slice)
                            .unwrap_or(&[]);
                        replicas.extend(
                            walk_ring_refs(dc_ring, token, *dc_rf as usize).into_iter().cloned(),
                        );
                    }
                    replicas
                }
            };
            if replicas.len() != replication_factor.total() {
                return Err(ReadError::InvalidRing(format!(
                    "replication factor {} cannot be satisfied by {} distinct replicas at token {}",
                    replication_factor.total(),
                    replicas.len(),
                    token
                )));
            }
            Ok(replicas)
        };

        let min = Token::new(partitioner.min_token());
        let max = Token::new(partitioner.max_token());
        let first = instances[0].token().clone();
        let last = instances[instances.len() - 1].token().clone();

        let mut range_map = Vec::with_capacity(instances.len() + 1);
        range_map.push((
            TokenRange::closed(min, first.clone()),
            replicas_for(&first)?,
        ));
        for (previous, owner) in instances.iter().tuple_windows() {
            range_map.push((
                TokenRange::open_closed(previous.token().clone(), owner.token().clone()),
                replicas_for(owner.token())?,
            ));
        }
        if last < max {
            // Wrap-around: ownership continues at the first token.
            range_map.push((
                TokenRange::open_closed(last, max),
                replicas_for(&first)?,
            ));
        }

        Ok(Self {
            partitioner,
            replication_factor,
            instances,
            range_map,
        })
    }

    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    pub fn replication_factor(&self) -> &ReplicationFactor {
        &self.replication_factor
    }

    /// All instances, ordered by ring token.
    pub fn instances(&self) -> &[CassandraInstance] {
        &self.instances
    }

    /// The full sub-range → replica list map, in token order.
    pub fn range_map(&self) -> &[(TokenRange, Vec<CassandraInstance>)] {
        &self.range_map
    }

    pub fn datacenters(&self) -> Vec<&str> {
        self.instances
            .iter()
            .map(CassandraInstance::data_center)
            .unique()
            .collect()
    }

    /// Restricts the sub-range map to the part intersecting `range`,
    /// trimming each sub-range to the intersection.
    pub fn sub_ranges(&self, range: &TokenRange) -> Vec<(TokenRange, Vec<CassandraInstance>)> {
        self.range_map
            .iter()
            .filter_map(|(sub_range, replicas)| {
                sub_range
                    .intersection(range)
                    .map(|intersection| (intersection, replicas.clone()))
            })
            .collect()
    }
}

/// Walks the sorted ring clockwise from the first instance whose token is
/// `>= token`, wrapping at the end, and takes the first `count` distinct
/// nodes.
fn walk_ring(
    instances: &[CassandraInstance],
    token: &Token,
    count: usize,
) -> Vec<CassandraInstance> {
    let start = instances.partition_point(|instance| instance.token() < token);
    instances[start..]
        .iter()
        .chain(instances.iter())
        .take(instances.len())
        .unique()
        .take(count)
        .cloned()
        .collect()
}

fn walk_ring_refs<'a>(
    instances: &[&'a CassandraInstance],
    token: &Token,
    count: usize,
) -> Vec<&'a CassandraInstance> {
    let start = instances.partition_point(|instance| instance.token() < token);
    instances[start..]
        .iter()
        .chain(instances.iter())
        .take(instances.len())
        .unique()
        .take(count)
        .copied()
        .collect()
}
