//! Replication strategies and per-datacenter replication factors.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use strum_macros::{Display, EnumString};

use crate::errors::SchemaError;
use crate::schema::SHADED_PACKAGE_PREFIX;

/// Replication strategies understood by the reader. Everything else is
/// rejected when the options map is parsed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ReplicationStrategy {
    SimpleStrategy,
    NetworkTopologyStrategy,
}

/// The replication factor of a keyspace: a strategy plus per-datacenter
/// replica counts. For `SimpleStrategy` the map holds the single
/// synthetic key [`ReplicationFactor::SIMPLE_OPTION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationFactor {
    strategy: ReplicationStrategy,
    options: BTreeMap<String, u32>,
}

impl ReplicationFactor {
    pub const SIMPLE_OPTION: &'static str = "replication_factor";

    pub fn simple(replication_factor: u32) -> Self {
        Self {
            strategy: ReplicationStrategy::SimpleStrategy,
            options: BTreeMap::from([(Self::SIMPLE_OPTION.to_string(), replication_factor)]),
        }
    }

    pub fn network_topology(options: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            strategy: ReplicationStrategy::NetworkTopologyStrategy,
            options: options.into_iter().collect(),
        }
    }

    pub fn strategy(&self) -> ReplicationStrategy {
        self.strategy
    }

    pub fn options(&self) -> &BTreeMap<String, u32> {
        &self.options
    }

    /// Total number of replicas across all datacenters.
    pub fn total(&self) -> usize {
        self.options.values().map(|rf| *rf as usize).sum()
    }

    /// Replica count for a datacenter, matched case-insensitively the way
    /// datacenter names are compared everywhere else in the reader.
    pub fn datacenter_rf(&self, datacenter: &str) -> Option<u32> {
        self.options
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(datacenter))
            .map(|(_, rf)| *rf)
    }

    /// The only datacenter of a single-DC NetworkTopologyStrategy
    /// keyspace, used when the caller did not name one.
    pub fn sole_datacenter(&self) -> Option<&str> {
        if self.strategy == ReplicationStrategy::NetworkTopologyStrategy && self.options.len() == 1
        {
            self.options.keys().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Parses a keyspace replication map, e.g.
    /// `{"class": "org.apache.cassandra.locator.NetworkTopologyStrategy", "DC1": "3"}`.
    /// The class may be bare, OSS-qualified or shaded-qualified.
    pub fn from_options_map(options: &HashMap<String, String>) -> Result<Self, SchemaError> {
        let class = options
            .get("class")
            .ok_or_else(|| SchemaError::InvalidReplication("missing 'class' option".to_string()))?;

        let strategy = class
            .rsplit('.')
            .next()
            .and_then(|name| ReplicationStrategy::from_str(name).ok())
            .ok_or_else(|| {
                SchemaError::InvalidReplication(format!("unknown replication strategy {class:?}"))
            })?;

        let parsed = match strategy {
            ReplicationStrategy::SimpleStrategy => {
                let rf = options.get(Self::SIMPLE_OPTION).ok_or_else(|| {
                    SchemaError::InvalidReplication(
                        "SimpleStrategy options do not have a replication factor".to_string(),
                    )
                })?;
                let rf = u32::from_str(rf).map_err(|_| {
                    SchemaError::InvalidReplication(format!(
                        "could not parse replication factor {rf:?} as an integer"
                    ))
                })?;
                Self::simple(rf)
            }
            ReplicationStrategy::NetworkTopologyStrategy => {
                let mut datacenters = BTreeMap::new();
                for (datacenter, rf) in options {
                    if datacenter == "class" {
                        continue;
                    }
                    // Other non-numeric options may ride along in the map.
                    let Ok(rf) = u32::from_str(rf) else { continue };
                    datacenters.insert(datacenter.clone(), rf);
                }
                Self::network_topology(datacenters)
            }
        };
        Ok(parsed)
    }

    /// Serializes the replication factor back into the options-map form,
    /// with the strategy class under the shaded package.
    pub fn to_options_map(&self) -> HashMap<String, String> {
        let mut options = HashMap::with_capacity(self.options.len() + 1);
        options.insert(
            "class".to_string(),
            format!("{}locator.{}", SHADED_PACKAGE_PREFIX, self.strategy),
        );
        for (name, rf) in &self.options {
            options.insert(name.clone(), rf.to_string());
        }
        options
    }
}
