//! CQL-level building blocks of the bulk reader.
//!
//! This crate is purely synchronous: it models keyspace schemas (native,
//! collection and user-defined types), parses the `CREATE TABLE` /
//! `CREATE TYPE` fragments a job is configured with, and knows how
//! replication strategies and consistency levels interact. The read path
//! (token ring, replica planning, fetching) lives in the `bulkreader`
//! crate and consumes the immutable values produced here.

pub mod consistency;
pub mod ddl;
pub mod errors;
pub(crate) mod parse;
pub mod partitioner;
pub mod replication;
pub mod schema;
pub mod types;

pub use consistency::ConsistencyLevel;
pub use errors::SchemaError;
pub use partitioner::{murmur3_token, Partitioner};
pub use replication::{ReplicationFactor, ReplicationStrategy};
pub use schema::{convert_to_shaded_packages, SchemaBuilder, SchemaRegistry};
pub use types::{CqlField, CqlSchema, CqlType, CqlUdt, NativeType};
