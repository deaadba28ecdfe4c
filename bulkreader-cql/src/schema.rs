//! Schema building: turning the DDL fragments a job is configured with
//! into an immutable [`CqlSchema`], and registering the result in a
//! process-wide registry so concurrent builds of the same keyspace agree.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use itertools::Itertools;
use regex::Regex;
use tracing::info;

use crate::ddl::{self, RawCqlType, RawCreateTable, RawCreateType};
use crate::errors::SchemaError;
use crate::partitioner::Partitioner;
use crate::replication::ReplicationFactor;
use crate::types::{CqlField, CqlSchema, CqlType, CqlUdt};

/// The package prefix the embedded engine classes are shaded under.
pub const SHADED_PACKAGE_PREFIX: &str = "org.apache.cassandra.spark.shaded.fourzero.cassandra.";

const SHADED_MARKER: &str = "spark.shaded.";

static OSS_PACKAGE_NAME: OnceLock<Regex> = OnceLock::new();

fn oss_package_name() -> &'static Regex {
    OSS_PACKAGE_NAME
        .get_or_init(|| Regex::new(r"\borg\.apache\.cassandra\.").expect("hard-coded regex"))
}

/// Converts an arbitrary string that contains OSS Cassandra package names
/// (such as a `CREATE TABLE` statement) into the equivalent string that
/// uses shaded package names. If the string does not contain OSS
/// Cassandra package names, it is returned unchanged; in particular the
/// function is idempotent.
pub fn convert_to_shaded_packages(string: &str) -> String {
    let mut shaded = String::with_capacity(string.len());
    let mut copied_up_to = 0;
    for occurrence in oss_package_name().find_iter(string) {
        if string[occurrence.end()..].starts_with(SHADED_MARKER) {
            // Already shaded.
            continue;
        }
        shaded.push_str(&string[copied_up_to..occurrence.start()]);
        shaded.push_str(SHADED_PACKAGE_PREFIX);
        copied_up_to = occurrence.end();
    }
    shaded.push_str(&string[copied_up_to..]);
    shaded
}

/// Whether a column is part of the partition key, the clustering key, or
/// neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Static,
    Regular,
}

/// A column of a registered table, with its fully resolved type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub cql_type: CqlType,
    pub kind: ColumnKind,
}

/// A registered table: columns in select order (partition keys, then
/// clustering keys, then the remaining columns by name), bound to the
/// partitioner its cluster hashes keys with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    keyspace: String,
    name: String,
    columns: Vec<ColumnMetadata>,
    partitioner: Partitioner,
}

impl TableMetadata {
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in select order.
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }
}

/// A registered keyspace.
#[derive(Debug, Clone)]
pub struct KeyspaceMetadata {
    pub name: String,
    pub replication: ReplicationFactor,
    pub tables: HashMap<String, Arc<TableMetadata>>,
    pub user_defined_types: HashMap<String, Arc<CqlUdt>>,
}

/// Registry of keyspaces known to this process.
///
/// Installs are serialized by a single mutex and are idempotent, so
/// concurrent builds of the same schema converge on one registration.
/// Jobs that want isolation can create their own registry; the
/// [`SchemaRegistry::global`] instance is the default.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    keyspaces: Mutex<HashMap<String, KeyspaceMetadata>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SchemaRegistry {
        static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SchemaRegistry::new)
    }

    pub fn keyspace_exists(&self, keyspace: &str) -> bool {
        self.lock().contains_key(keyspace)
    }

    pub fn table_exists(&self, keyspace: &str, table: &str) -> bool {
        self.lock()
            .get(keyspace)
            .is_some_and(|ks| ks.tables.contains_key(table))
    }

    pub fn keyspace(&self, keyspace: &str) -> Option<KeyspaceMetadata> {
        self.lock().get(keyspace).cloned()
    }

    pub fn table(&self, keyspace: &str, table: &str) -> Option<Arc<TableMetadata>> {
        self.lock()
            .get(keyspace)?
            .tables
            .get(table)
            .cloned()
    }

    /// Installs a keyspace, a table and its user-defined types. Existing
    /// entries are left untouched, so installing the same schema twice
    /// leaves the registry unchanged.
    fn install(
        &self,
        replication: &ReplicationFactor,
        table: Arc<TableMetadata>,
        udts: impl Iterator<Item = Arc<CqlUdt>>,
    ) {
        let mut keyspaces = self.lock();
        let keyspace = keyspaces
            .entry(table.keyspace().to_string())
            .or_insert_with(|| {
                info!(
                    keyspace = table.keyspace(),
                    strategy = %replication.strategy(),
                    "Registering keyspace"
                );
                KeyspaceMetadata {
                    name: table.keyspace().to_string(),
                    replication: replication.clone(),
                    tables: HashMap::new(),
                    user_defined_types: HashMap::new(),
                }
            });
        for udt in udts {
            keyspace
                .user_defined_types
                .entry(udt.name().to_string())
                .or_insert(udt);
        }
        if !keyspace.tables.contains_key(table.name()) {
            info!(
                keyspace = table.keyspace(),
                table = table.name(),
                partitioner = %table.partitioner(),
                "Registering table"
            );
            keyspace.tables.insert(table.name().to_string(), table);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, KeyspaceMetadata>> {
        // A poisoned registry only means another build panicked mid-read;
        // the map itself is always in a consistent state.
        match self.keyspaces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Builds a [`CqlSchema`] from a `CREATE TABLE` fragment, a replication
/// factor and the `CREATE TYPE` fragments of any user-defined types the
/// table references.
pub struct SchemaBuilder {
    create_stmt: String,
    keyspace: String,
    rf: ReplicationFactor,
    partitioner: Partitioner,
    udt_stmts: Vec<String>,
    registry: Option<Arc<SchemaRegistry>>,
}

impl SchemaBuilder {
    pub fn new(
        create_stmt: impl Into<String>,
        keyspace: impl Into<String>,
        rf: ReplicationFactor,
    ) -> Self {
        Self {
            create_stmt: create_stmt.into(),
            keyspace: keyspace.into(),
            rf,
            partitioner: Partitioner::Murmur3Partitioner,
            udt_stmts: Vec::new(),
            registry: None,
        }
    }

    /// Rebuilds (and re-registers) a schema produced by an earlier build,
    /// e.g. on the other side of a job-config round trip.
    pub fn from_schema(schema: &CqlSchema, partitioner: Partitioner) -> Self {
        Self::new(
            schema.create_stmt(),
            schema.keyspace(),
            schema.replication_factor().clone(),
        )
        .with_partitioner(partitioner)
        .with_udts(schema.udt_create_stmts())
    }

    pub fn with_partitioner(mut self, partitioner: Partitioner) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn with_udts(mut self, udt_stmts: impl IntoIterator<Item = String>) -> Self {
        self.udt_stmts.extend(udt_stmts);
        self
    }

    /// Points the builder at a private registry instead of the
    /// process-wide one.
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<CqlSchema, SchemaError> {
        let create_stmt = convert_to_shaded_packages(&self.create_stmt);

        // Parse the type fragments first and accumulate them into a
        // per-keyspace type set; a parse failure fails the whole build.
        let mut raw_types: Vec<RawCreateType> = Vec::with_capacity(self.udt_stmts.len());
        for stmt in &self.udt_stmts {
            raw_types.push(ddl::parse_create_type(stmt)?);
        }
        if let Some(duplicate) = raw_types
            .iter()
            .map(|raw_type| raw_type.name.as_str())
            .duplicates()
            .next()
        {
            return Err(SchemaError::SchemaParse {
                fragment: duplicate.to_string(),
                position: 0,
                reason: "user-defined type is declared more than once".to_string(),
            });
        }
        let udts = resolve_udts(&self.keyspace, raw_types)?;

        let raw_table = ddl::parse_create_table(&create_stmt)?;
        let metadata = Arc::new(finalize_table(
            &self.keyspace,
            raw_table,
            &udts,
            self.partitioner,
        )?);

        for column in metadata.columns() {
            validate_type(&column.cql_type)?;
        }

        let registry: &SchemaRegistry = match self.registry.as_deref() {
            Some(registry) => registry,
            None => SchemaRegistry::global(),
        };
        registry.install(&self.rf, metadata.clone(), udts.values().cloned());
        if !registry.keyspace_exists(metadata.keyspace()) {
            return Err(SchemaError::SchemaRegistration(format!(
                "keyspace {} does not exist after registration",
                metadata.keyspace()
            )));
        }
        if !registry.table_exists(metadata.keyspace(), metadata.name()) {
            return Err(SchemaError::SchemaRegistration(format!(
                "table {}.{} does not exist after registration",
                metadata.keyspace(),
                metadata.name()
            )));
        }

        let fields = build_fields(&metadata);
        Ok(CqlSchema::new(
            self.keyspace,
            metadata.name(),
            create_stmt,
            self.rf,
            fields,
            udts.into_values().collect::<HashSet<_>>(),
        ))
    }
}

/// Resolves raw type statements into [`CqlUdt`]s. Types may reference
/// each other in any declaration order, so resolution repeatedly takes a
/// statement off the queue iff everything it references is already
/// resolved and re-enqueues it otherwise. A full pass over the queue with
/// no progress means the references are cyclic (UDT graphs are acyclic in
/// valid schemas) or point at types that were never declared.
fn resolve_udts(
    keyspace: &str,
    raw_types: Vec<RawCreateType>,
) -> Result<HashMap<String, Arc<CqlUdt>>, SchemaError> {
    let declared: HashSet<String> = raw_types
        .iter()
        .map(|raw_type| raw_type.name.clone())
        .collect();
    let mut queue: VecDeque<RawCreateType> = raw_types.into();
    let mut resolved: HashMap<String, Arc<CqlUdt>> = HashMap::new();
    let mut stalled = 0;

    while let Some(raw_type) = queue.pop_front() {
        let mut references = HashSet::new();
        for (_, field_type) in &raw_type.fields {
            collect_udt_references(field_type, &mut references);
        }
        if let Some(unknown) = references.iter().find(|name| !declared.contains(*name)) {
            return Err(SchemaError::SchemaParse {
                fragment: raw_type.name.clone(),
                position: 0,
                reason: format!("references unknown user-defined type {unknown:?}"),
            });
        }
        if !references.iter().all(|name| resolved.contains_key(name)) {
            stalled += 1;
            if stalled > queue.len() {
                let mut remaining: Vec<String> =
                    queue.into_iter().map(|raw_type| raw_type.name).collect();
                remaining.push(raw_type.name);
                remaining.sort();
                return Err(SchemaError::UdtCycle {
                    keyspace: keyspace.to_string(),
                    remaining,
                });
            }
            queue.push_back(raw_type);
            continue;
        }
        stalled = 0;

        let mut fields = Vec::with_capacity(raw_type.fields.len());
        for (name, field_type) in raw_type.fields {
            fields.push((name, finalize_type(field_type, &resolved)?));
        }
        resolved.insert(
            raw_type.name.clone(),
            Arc::new(CqlUdt::new(keyspace, raw_type.name, fields)),
        );
    }

    Ok(resolved)
}

fn collect_udt_references(raw_type: &RawCqlType, references: &mut HashSet<String>) {
    match raw_type {
        RawCqlType::Native(_) => {}
        RawCqlType::List(inner) | RawCqlType::Set(inner) | RawCqlType::Frozen(inner) => {
            collect_udt_references(inner, references)
        }
        RawCqlType::Map(key, value) => {
            collect_udt_references(key, references);
            collect_udt_references(value, references);
        }
        RawCqlType::Tuple(fields) => {
            for field in fields {
                collect_udt_references(field, references);
            }
        }
        RawCqlType::UserDefined(name) => {
            references.insert(name.clone());
        }
    }
}

/// Replaces user-defined type references with the resolved types.
fn finalize_type(
    raw_type: RawCqlType,
    udts: &HashMap<String, Arc<CqlUdt>>,
) -> Result<CqlType, SchemaError> {
    let finalized = match raw_type {
        RawCqlType::Native(native) => CqlType::Native(native),
        RawCqlType::List(inner) => CqlType::List(Box::new(finalize_type(*inner, udts)?)),
        RawCqlType::Set(inner) => CqlType::Set(Box::new(finalize_type(*inner, udts)?)),
        RawCqlType::Map(key, value) => CqlType::Map(
            Box::new(finalize_type(*key, udts)?),
            Box::new(finalize_type(*value, udts)?),
        ),
        RawCqlType::Tuple(fields) => CqlType::Tuple(
            fields
                .into_iter()
                .map(|field| finalize_type(field, udts))
                .collect::<Result<_, _>>()?,
        ),
        RawCqlType::Frozen(inner) => CqlType::Frozen(Box::new(finalize_type(*inner, udts)?)),
        RawCqlType::UserDefined(name) => match udts.get(&name) {
            Some(udt) => CqlType::Udt(udt.clone()),
            None => {
                return Err(SchemaError::SchemaParse {
                    fragment: name.clone(),
                    position: 0,
                    reason: "unknown type".to_string(),
                })
            }
        },
    };
    Ok(finalized)
}

/// Binds raw table metadata to the keyspace and partitioner and lays the
/// columns out in select order.
fn finalize_table(
    keyspace: &str,
    raw_table: RawCreateTable,
    udts: &HashMap<String, Arc<CqlUdt>>,
    partitioner: Partitioner,
) -> Result<TableMetadata, SchemaError> {
    let mut columns = Vec::with_capacity(raw_table.columns.len());
    let mut remaining: Vec<&ddl::RawColumn> = Vec::new();

    for key in &raw_table.partition_keys {
        let column = raw_column(&raw_table, key)?;
        columns.push(ColumnMetadata {
            name: column.name.clone(),
            cql_type: finalize_type(column.cql_type.clone(), udts)?,
            kind: ColumnKind::PartitionKey,
        });
    }
    for key in &raw_table.clustering_keys {
        let column = raw_column(&raw_table, key)?;
        columns.push(ColumnMetadata {
            name: column.name.clone(),
            cql_type: finalize_type(column.cql_type.clone(), udts)?,
            kind: ColumnKind::Clustering,
        });
    }
    for column in &raw_table.columns {
        let is_key = raw_table.partition_keys.contains(&column.name)
            || raw_table.clustering_keys.contains(&column.name);
        if !is_key {
            remaining.push(column);
        }
    }
    remaining.sort_by(|a, b| a.name.cmp(&b.name));
    for column in remaining {
        columns.push(ColumnMetadata {
            name: column.name.clone(),
            cql_type: finalize_type(column.cql_type.clone(), udts)?,
            kind: if column.is_static {
                ColumnKind::Static
            } else {
                ColumnKind::Regular
            },
        });
    }

    Ok(TableMetadata {
        keyspace: keyspace.to_string(),
        name: raw_table.name,
        columns,
        partitioner,
    })
}

fn raw_column<'a>(
    raw_table: &'a RawCreateTable,
    name: &str,
) -> Result<&'a ddl::RawColumn, SchemaError> {
    raw_table
        .columns
        .iter()
        .find(|column| column.name == name)
        .ok_or_else(|| SchemaError::SchemaParse {
            fragment: name.to_string(),
            position: 0,
            reason: "primary key column is not defined".to_string(),
        })
}

/// Structural recursion over a column type; every native leaf must be in
/// the supported set.
fn validate_type(cql_type: &CqlType) -> Result<(), SchemaError> {
    match cql_type {
        CqlType::Native(native) => {
            if native.is_supported() {
                Ok(())
            } else {
                Err(SchemaError::UnsupportedType {
                    type_name: native.as_str().to_string(),
                })
            }
        }
        CqlType::List(inner) | CqlType::Set(inner) | CqlType::Frozen(inner) => {
            validate_type(inner)
        }
        CqlType::Map(key, value) => {
            validate_type(key)?;
            validate_type(value)
        }
        CqlType::Tuple(fields) => fields.iter().try_for_each(validate_type),
        CqlType::Udt(udt) => udt
            .fields()
            .iter()
            .try_for_each(|(_, field_type)| validate_type(field_type)),
    }
}

/// Builds the schema's field list from registered table metadata. Types
/// with a single-cell frozen encoding (tuples and UDTs used directly as a
/// column type) are wrapped in `Frozen` unless the DDL already froze
/// them.
fn build_fields(metadata: &TableMetadata) -> Vec<CqlField> {
    let mut fields: Vec<CqlField> = metadata
        .columns()
        .iter()
        .enumerate()
        .map(|(position, column)| {
            let cql_type = if column.cql_type.is_freezable() && !column.cql_type.is_frozen() {
                CqlType::frozen(column.cql_type.clone())
            } else {
                column.cql_type.clone()
            };
            CqlField {
                is_partition_key: column.kind == ColumnKind::PartitionKey,
                is_clustering_column: column.kind == ColumnKind::Clustering,
                is_static: column.kind == ColumnKind::Static,
                name: column.name.clone(),
                cql_type,
                position,
            }
        })
        .collect();
    fields.sort();
    fields
}
