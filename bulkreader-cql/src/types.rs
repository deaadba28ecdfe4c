//! The CQL type graph and the schema values built from it.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use strum_macros::EnumString;

use crate::replication::ReplicationFactor;

/// A native (non-composite) CQL type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NativeType {
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Date,
    Decimal,
    Double,
    Duration,
    Empty,
    Float,
    Inet,
    Int,
    SmallInt,
    Text,
    Time,
    Timestamp,
    Timeuuid,
    TinyInt,
    Uuid,
    Varchar,
    Varint,
}

impl NativeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeType::Ascii => "ascii",
            NativeType::BigInt => "bigint",
            NativeType::Blob => "blob",
            NativeType::Boolean => "boolean",
            NativeType::Counter => "counter",
            NativeType::Date => "date",
            NativeType::Decimal => "decimal",
            NativeType::Double => "double",
            NativeType::Duration => "duration",
            NativeType::Empty => "empty",
            NativeType::Float => "float",
            NativeType::Inet => "inet",
            NativeType::Int => "int",
            NativeType::SmallInt => "smallint",
            NativeType::Text => "text",
            NativeType::Time => "time",
            NativeType::Timestamp => "timestamp",
            NativeType::Timeuuid => "timeuuid",
            NativeType::TinyInt => "tinyint",
            NativeType::Uuid => "uuid",
            NativeType::Varchar => "varchar",
            NativeType::Varint => "varint",
        }
    }

    /// Whether the bulk reader can decode values of this type.
    /// Counters only make sense behind a live coordinator, so they are
    /// parseable but rejected during schema validation.
    pub fn is_supported(&self) -> bool {
        !matches!(self, NativeType::Counter)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved CQL column type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CqlType {
    Native(NativeType),
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Tuple(Vec<CqlType>),
    Udt(Arc<CqlUdt>),
    /// Immutable, single-cell encoding of the inner type.
    Frozen(Box<CqlType>),
}

impl CqlType {
    pub fn frozen(inner: CqlType) -> CqlType {
        match inner {
            frozen @ CqlType::Frozen(_) => frozen,
            other => CqlType::Frozen(Box::new(other)),
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, CqlType::Frozen(_))
    }

    /// Types with a single-cell frozen encoding when used directly as a
    /// column type. Collections stay multi-cell unless declared frozen.
    pub(crate) fn is_freezable(&self) -> bool {
        matches!(self, CqlType::Tuple(_) | CqlType::Udt(_))
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Native(native) => write!(f, "{}", native),
            CqlType::List(inner) => write!(f, "list<{}>", inner),
            CqlType::Set(inner) => write!(f, "set<{}>", inner),
            CqlType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            CqlType::Tuple(fields) => write!(f, "tuple<{}>", fields.iter().join(", ")),
            CqlType::Udt(udt) => f.write_str(udt.name()),
            CqlType::Frozen(inner) => write!(f, "frozen<{}>", inner),
        }
    }
}

/// A user-defined type: a named, ordered list of (field name, type) pairs
/// scoped to a keyspace. Nested UDT references are already resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CqlUdt {
    keyspace: String,
    name: String,
    fields: Vec<(String, CqlType)>,
}

impl CqlUdt {
    pub fn new(
        keyspace: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<(String, CqlType)>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            fields,
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[(String, CqlType)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&CqlType> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, cql_type)| cql_type)
    }

    /// Re-emits the `CREATE TYPE` DDL for this type.
    pub fn create_stmt(&self) -> String {
        format!(
            "CREATE TYPE {}.{} ({});",
            self.keyspace,
            self.name,
            self.fields
                .iter()
                .map(|(name, cql_type)| format!("{} {}", name, cql_type))
                .join(", ")
        )
    }
}

/// A single column of a built schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CqlField {
    pub is_partition_key: bool,
    pub is_clustering_column: bool,
    pub is_static: bool,
    pub name: String,
    pub cql_type: CqlType,
    /// Index of the column in select order.
    pub position: usize,
}

impl CqlField {
    fn rank(&self) -> u8 {
        if self.is_partition_key {
            0
        } else if self.is_clustering_column {
            1
        } else {
            2
        }
    }
}

/// Partition keys sort first (in definition order), then clustering
/// columns (in definition order), then the remaining columns by name.
impl Ord for CqlField {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank()).then_with(|| {
            if self.rank() == 2 {
                self.name.cmp(&other.name)
            } else {
                self.position.cmp(&other.position)
            }
        })
    }
}

impl PartialOrd for CqlField {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The immutable output of a schema build: everything the read path needs
/// to know about one table.
#[derive(Clone, Debug)]
pub struct CqlSchema {
    keyspace: String,
    table: String,
    create_stmt: String,
    replication_factor: ReplicationFactor,
    fields: Vec<CqlField>,
    udts: HashSet<Arc<CqlUdt>>,
}

impl CqlSchema {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        create_stmt: impl Into<String>,
        replication_factor: ReplicationFactor,
        fields: Vec<CqlField>,
        udts: HashSet<Arc<CqlUdt>>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            create_stmt: create_stmt.into(),
            replication_factor,
            fields,
            udts,
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_stmt(&self) -> &str {
        &self.create_stmt
    }

    pub fn replication_factor(&self) -> &ReplicationFactor {
        &self.replication_factor
    }

    /// All columns in select order.
    pub fn fields(&self) -> &[CqlField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&CqlField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn partition_keys(&self) -> impl Iterator<Item = &CqlField> {
        self.fields.iter().filter(|field| field.is_partition_key)
    }

    pub fn clustering_columns(&self) -> impl Iterator<Item = &CqlField> {
        self.fields.iter().filter(|field| field.is_clustering_column)
    }

    pub fn udts(&self) -> &HashSet<Arc<CqlUdt>> {
        &self.udts
    }

    /// `CREATE TYPE` DDL for every resolved UDT, sorted by type name so
    /// the output is stable.
    pub fn udt_create_stmts(&self) -> Vec<String> {
        self.udts
            .iter()
            .sorted_by(|a, b| a.name().cmp(b.name()))
            .map(|udt| udt.create_stmt())
            .collect()
    }
}
