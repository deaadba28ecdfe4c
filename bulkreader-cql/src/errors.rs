//! Errors reported while building a schema.

use thiserror::Error;

/// Error that occurred while parsing DDL fragments or assembling the
/// schema they describe. All variants are fatal for the schema build that
/// produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A `CREATE TABLE` / `CREATE TYPE` fragment or a type string could
    /// not be parsed.
    #[error("failed to parse {fragment:?} at position {position}: {reason}")]
    SchemaParse {
        fragment: String,
        position: usize,
        reason: String,
    },

    /// A column or nested type is outside the accepted set.
    #[error("{type_name} data type is not supported")]
    UnsupportedType { type_name: String },

    /// The user-defined types reference each other cyclically, so
    /// resolution cannot make progress.
    #[error("user-defined types in keyspace {keyspace} form a reference cycle: {remaining:?}")]
    UdtCycle {
        keyspace: String,
        remaining: Vec<String>,
    },

    /// A registry invariant did not hold after installing the schema.
    #[error("schema registry invariant violated: {0}")]
    SchemaRegistration(String),

    /// A replication-strategy options map could not be interpreted.
    #[error("invalid replication options: {0}")]
    InvalidReplication(String),
}
