//! Parsing of the `CREATE TABLE` and `CREATE TYPE` fragments a bulk-read
//! job is configured with.
//!
//! The grammar here is deliberately the subset those fragments use:
//! column definitions, primary-key specs (inline and table-level,
//! including composite partition keys), static columns and the CQL type
//! language. A trailing `WITH ...` clause is accepted and ignored, since
//! table options do not affect how rows are decoded.

use std::str::FromStr;

use crate::errors::SchemaError;
use crate::parse::{ParseError, ParseErrorCause, ParseResult, ParserState};
use crate::types::NativeType;

/// A parsed type expression. User-defined types are still name
/// references at this stage; the schema builder resolves them against
/// the keyspace's type registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawCqlType {
    Native(NativeType),
    List(Box<RawCqlType>),
    Set(Box<RawCqlType>),
    Map(Box<RawCqlType>, Box<RawCqlType>),
    Tuple(Vec<RawCqlType>),
    Frozen(Box<RawCqlType>),
    UserDefined(String),
}

/// A column definition inside a `CREATE TABLE` fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub cql_type: RawCqlType,
    pub is_static: bool,
}

/// Raw table metadata: the direct output of parsing a `CREATE TABLE`
/// fragment, before keyspace binding and type resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCreateTable {
    pub keyspace: Option<String>,
    pub name: String,
    pub columns: Vec<RawColumn>,
    pub partition_keys: Vec<String>,
    pub clustering_keys: Vec<String>,
}

/// Raw type statement: the direct output of parsing a `CREATE TYPE`
/// fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCreateType {
    pub keyspace: Option<String>,
    pub name: String,
    pub fields: Vec<(String, RawCqlType)>,
}

/// Parses a `CREATE TABLE` fragment to raw table metadata.
pub fn parse_create_table(ddl: &str) -> Result<RawCreateTable, SchemaError> {
    run_parser(ddl, create_table)
}

/// Parses a `CREATE TYPE` fragment to a raw type statement.
pub fn parse_create_type(ddl: &str) -> Result<RawCreateType, SchemaError> {
    run_parser(ddl, create_type)
}

/// Parses a bare CQL type expression, e.g. `map<text, frozen<address>>`.
pub fn parse_type_string(type_str: &str) -> Result<RawCqlType, SchemaError> {
    run_parser(type_str, cql_type)
}

fn run_parser<T>(
    input: &str,
    parser: impl FnOnce(ParserState) -> ParseResult<(T, ParserState)>,
) -> Result<T, SchemaError> {
    match parser(ParserState::new(input)) {
        Err(err) => Err(schema_parse_error(input, err)),
        Ok((_, p)) if !p.skip_white().is_at_eof() => Err(SchemaError::SchemaParse {
            fragment: input.to_string(),
            position: position_of(input, p),
            reason: "leftover characters".to_string(),
        }),
        Ok((parsed, _)) => Ok(parsed),
    }
}

fn schema_parse_error(input: &str, err: ParseError) -> SchemaError {
    SchemaError::SchemaParse {
        fragment: input.to_string(),
        position: err.calculate_position(input).unwrap_or(0),
        reason: err.get_cause().to_string(),
    }
}

fn position_of(input: &str, p: ParserState) -> usize {
    input.len() - p.get_remaining() + 1
}

fn create_table(p: ParserState) -> ParseResult<(RawCreateTable, ParserState)> {
    let p = p.skip_white().accept_ci("create")?;
    let p = p.skip_white().accept_ci("table")?;
    let p = accept_if_not_exists(p.skip_white());

    let ((keyspace, name), p) = qualified_name(p)?;
    let p = p.skip_white().accept("(")?;

    let mut columns: Vec<RawColumn> = Vec::new();
    let mut partition_keys: Vec<String> = Vec::new();
    let mut clustering_keys: Vec<String> = Vec::new();

    let p = p.parse_while(|p| {
        let p = p.skip_white();
        // Elements start with an identifier either way; `PRIMARY KEY`
        // is told apart from a column definition after the fact, so a
        // column named e.g. `primary_id` still parses.
        let (word, after_word) = p.parse_identifier()?;
        let p = if word == "primary" {
            if !partition_keys.is_empty() {
                return Err(p.error(ParseErrorCause::Other("duplicate primary key")));
            }
            let p = after_word.skip_white().accept_ci("key")?;
            let p = p.skip_white().accept("(")?;
            primary_key_spec(p, &mut partition_keys, &mut clustering_keys)?
        } else {
            let (column, p) = column_definition(word, after_word, partition_keys.is_empty())?;
            if let Some(inline_key) = column.1 {
                partition_keys.push(inline_key);
            }
            columns.push(column.0);
            p
        };

        let p = p.skip_white();
        if let Ok(p) = p.accept(",") {
            Ok((true, p))
        } else if let Ok(p) = p.accept(")") {
            Ok((false, p))
        } else {
            Err(p.error(ParseErrorCause::Other("expected \",\" or \")\"")))
        }
    })?;

    if partition_keys.is_empty() {
        return Err(p.error(ParseErrorCause::Other("table has no partition key")));
    }
    for key in partition_keys.iter().chain(clustering_keys.iter()) {
        if !columns.iter().any(|column| &column.name == key) {
            return Err(p.error(ParseErrorCause::Other("primary key column is not defined")));
        }
    }

    let p = table_options(p.skip_white())?;
    let table = RawCreateTable {
        keyspace,
        name,
        columns,
        partition_keys,
        clustering_keys,
    };
    Ok((table, p))
}

fn create_type(p: ParserState) -> ParseResult<(RawCreateType, ParserState)> {
    let p = p.skip_white().accept_ci("create")?;
    let p = p.skip_white().accept_ci("type")?;
    let p = accept_if_not_exists(p.skip_white());

    let ((keyspace, name), p) = qualified_name(p)?;
    let p = p.skip_white().accept("(")?;

    let mut fields = Vec::new();
    let p = p.parse_while(|p| {
        let (field_name, p) = p.skip_white().parse_identifier()?;
        let (field_type, p) = cql_type(p.skip_white())?;
        fields.push((field_name, field_type));

        let p = p.skip_white();
        if let Ok(p) = p.accept(",") {
            Ok((true, p))
        } else if let Ok(p) = p.accept(")") {
            Ok((false, p))
        } else {
            Err(p.error(ParseErrorCause::Other("expected \",\" or \")\"")))
        }
    })?;

    let p = match p.skip_white().accept(";") {
        Ok(p) => p,
        Err(_) => p,
    };
    let parsed = RawCreateType {
        keyspace,
        name,
        fields,
    };
    Ok((parsed, p))
}

fn accept_if_not_exists(p: ParserState) -> ParserState {
    let accepted = p
        .accept_ci("if")
        .and_then(|p| p.skip_white().accept_ci("not"))
        .and_then(|p| p.skip_white().accept_ci("exists"));
    match accepted {
        Ok(p) => p.skip_white(),
        Err(_) => p,
    }
}

fn qualified_name(p: ParserState) -> ParseResult<((Option<String>, String), ParserState)> {
    let (first, p) = p.parse_identifier()?;
    if let Ok(p) = p.accept(".") {
        let (name, p) = p.parse_identifier()?;
        Ok(((Some(first), name), p))
    } else {
        Ok(((None, first), p))
    }
}

/// One `name type [STATIC | PRIMARY KEY]` column definition, with the
/// name already consumed by the caller. The second tuple element carries
/// the column name when it declared itself the partition key inline.
#[allow(clippy::type_complexity)]
fn column_definition(
    name: String,
    p: ParserState,
    inline_key_allowed: bool,
) -> ParseResult<((RawColumn, Option<String>), ParserState)> {
    let (cql_type, p) = cql_type(p.skip_white())?;

    let mut is_static = false;
    let mut inline_key = None;

    let after_type = p.skip_white();
    let p = if let Ok(p) = after_type.accept_ci("static") {
        is_static = true;
        p
    } else if let Ok(p) = after_type.accept_ci("primary") {
        if !inline_key_allowed {
            return Err(after_type.error(ParseErrorCause::Other("duplicate primary key")));
        }
        let p = p.skip_white().accept_ci("key")?;
        inline_key = Some(name.clone());
        p
    } else {
        after_type
    };

    let column = RawColumn {
        name,
        cql_type,
        is_static,
    };
    Ok(((column, inline_key), p))
}

/// The inside of `PRIMARY KEY ( ... )`, cursor already past the opening
/// parenthesis. The first element is the partition key, either a single
/// column or a parenthesized composite; the rest are clustering columns.
fn primary_key_spec<'s>(
    p: ParserState<'s>,
    partition_keys: &mut Vec<String>,
    clustering_keys: &mut Vec<String>,
) -> ParseResult<ParserState<'s>> {
    let p = p.skip_white();
    let p = if let Ok(p) = p.accept("(") {
        p.parse_while(|p| {
            let (key, p) = p.skip_white().parse_identifier()?;
            partition_keys.push(key);
            let p = p.skip_white();
            if let Ok(p) = p.accept(",") {
                Ok((true, p))
            } else if let Ok(p) = p.accept(")") {
                Ok((false, p))
            } else {
                Err(p.error(ParseErrorCause::Other("expected \",\" or \")\"")))
            }
        })?
    } else {
        let (key, p) = p.parse_identifier()?;
        partition_keys.push(key);
        p
    };

    let p = p.parse_while(|p| {
        let p = p.skip_white();
        if let Ok(p) = p.accept(",") {
            let (key, p) = p.skip_white().parse_identifier()?;
            clustering_keys.push(key);
            Ok((true, p))
        } else if let Ok(p) = p.accept(")") {
            Ok((false, p))
        } else {
            Err(p.error(ParseErrorCause::Other("expected \",\" or \")\"")))
        }
    })?;
    Ok(p)
}

/// Swallows an optional `WITH ...` clause and trailing semicolon.
fn table_options(p: ParserState) -> ParseResult<ParserState> {
    let p = if p.accept_ci("with").is_ok() {
        // Table options do not affect decoding; skip to the end.
        let (_, p) = p.take_while(|_| true);
        p
    } else {
        match p.accept(";") {
            Ok(p) => p,
            Err(_) => p,
        }
    };
    Ok(p)
}

fn cql_type(p: ParserState) -> ParseResult<(RawCqlType, ParserState)> {
    if let Ok(p) = p.accept_ci("frozen<") {
        let (inner, p) = cql_type(p.skip_white())?;
        let p = p.skip_white().accept(">")?;
        Ok((RawCqlType::Frozen(Box::new(inner)), p))
    } else if let Ok(p) = p.accept_ci("map<") {
        let (key, p) = cql_type(p.skip_white())?;
        let p = p.skip_white().accept(",")?.skip_white();
        let (value, p) = cql_type(p)?;
        let p = p.skip_white().accept(">")?;
        Ok((RawCqlType::Map(Box::new(key), Box::new(value)), p))
    } else if let Ok(p) = p.accept_ci("list<") {
        let (inner, p) = cql_type(p.skip_white())?;
        let p = p.skip_white().accept(">")?;
        Ok((RawCqlType::List(Box::new(inner)), p))
    } else if let Ok(p) = p.accept_ci("set<") {
        let (inner, p) = cql_type(p.skip_white())?;
        let p = p.skip_white().accept(">")?;
        Ok((RawCqlType::Set(Box::new(inner)), p))
    } else if let Ok(p) = p.accept_ci("tuple<") {
        let mut types = Vec::new();
        let p = p.parse_while(|p| {
            let (inner, p) = cql_type(p.skip_white())?;
            types.push(inner);

            let p = p.skip_white();
            if let Ok(p) = p.accept(",") {
                Ok((true, p))
            } else if let Ok(p) = p.accept(">") {
                Ok((false, p))
            } else {
                Err(p.error(ParseErrorCause::Other("expected \",\" or \">\"")))
            }
        })?;
        Ok((RawCqlType::Tuple(types), p))
    } else {
        let (name, p) = p.parse_identifier()?;
        match NativeType::from_str(&name) {
            Ok(native) => Ok((RawCqlType::Native(native), p)),
            // Any other identifier is a user-defined type reference,
            // possibly keyspace-qualified.
            Err(_) => {
                if let Ok(p) = p.accept(".") {
                    let (unqualified, p) = p.parse_identifier()?;
                    Ok((RawCqlType::UserDefined(unqualified), p))
                } else {
                    Ok((RawCqlType::UserDefined(name), p))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(native: NativeType) -> RawCqlType {
        RawCqlType::Native(native)
    }

    #[test]
    fn test_type_parsing() {
        let test_cases = [
            ("bigint", native(NativeType::BigInt)),
            ("list<int>", RawCqlType::List(Box::new(native(NativeType::Int)))),
            ("set<ascii>", RawCqlType::Set(Box::new(native(NativeType::Ascii)))),
            (
                "map<blob, timeuuid>",
                RawCqlType::Map(
                    Box::new(native(NativeType::Blob)),
                    Box::new(native(NativeType::Timeuuid)),
                ),
            ),
            (
                "tuple<int, text, float>",
                RawCqlType::Tuple(vec![
                    native(NativeType::Int),
                    native(NativeType::Text),
                    native(NativeType::Float),
                ]),
            ),
            (
                "frozen<map<text, frozen<address>>>",
                RawCqlType::Frozen(Box::new(RawCqlType::Map(
                    Box::new(native(NativeType::Text)),
                    Box::new(RawCqlType::Frozen(Box::new(RawCqlType::UserDefined(
                        "address".to_string(),
                    )))),
                ))),
            ),
            (
                "ks.address",
                RawCqlType::UserDefined("address".to_string()),
            ),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_type_string(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_type_parsing_rejects_leftovers() {
        assert!(matches!(
            parse_type_string("int>"),
            Err(SchemaError::SchemaParse { .. })
        ));
    }

    #[test]
    fn test_create_table_inline_primary_key() {
        let table =
            parse_create_table("CREATE TABLE ks.backup (id uuid PRIMARY KEY, data blob)").unwrap();
        assert_eq!(table.keyspace.as_deref(), Some("ks"));
        assert_eq!(table.name, "backup");
        assert_eq!(table.partition_keys, ["id"]);
        assert!(table.clustering_keys.is_empty());
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn test_create_table_composite_primary_key() {
        let table = parse_create_table(
            "CREATE TABLE IF NOT EXISTS sensor_data (\
               station text, \
               sensor text, \
               reading_time timestamp, \
               value double, \
               owner text STATIC, \
               PRIMARY KEY ((station, sensor), reading_time)\
             ) WITH CLUSTERING ORDER BY (reading_time DESC)",
        )
        .unwrap();
        assert_eq!(table.keyspace, None);
        assert_eq!(table.name, "sensor_data");
        assert_eq!(table.partition_keys, ["station", "sensor"]);
        assert_eq!(table.clustering_keys, ["reading_time"]);
        let owner = table.columns.iter().find(|c| c.name == "owner").unwrap();
        assert!(owner.is_static);
    }

    #[test]
    fn test_column_name_starting_with_keyword() {
        let table =
            parse_create_table("CREATE TABLE t (primary_id int PRIMARY KEY, v text)").unwrap();
        assert_eq!(table.partition_keys, ["primary_id"]);
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn test_create_table_requires_primary_key() {
        assert!(matches!(
            parse_create_table("CREATE TABLE t (a int, b text)"),
            Err(SchemaError::SchemaParse { .. })
        ));
    }

    #[test]
    fn test_create_table_rejects_unknown_key_column() {
        assert!(matches!(
            parse_create_table("CREATE TABLE t (a int, PRIMARY KEY (missing))"),
            Err(SchemaError::SchemaParse { .. })
        ));
    }

    #[test]
    fn test_create_table_rejects_duplicate_primary_key() {
        assert!(matches!(
            parse_create_table("CREATE TABLE t (a int PRIMARY KEY, b int, PRIMARY KEY (b))"),
            Err(SchemaError::SchemaParse { .. })
        ));
    }

    #[test]
    fn test_create_type() {
        let parsed =
            parse_create_type("CREATE TYPE ks.address (street text, number int, tags set<text>);")
                .unwrap();
        assert_eq!(parsed.keyspace.as_deref(), Some("ks"));
        assert_eq!(parsed.name, "address");
        assert_eq!(parsed.fields.len(), 3);
        assert_eq!(parsed.fields[0].0, "street");
        assert_eq!(
            parsed.fields[2].1,
            RawCqlType::Set(Box::new(native(NativeType::Text)))
        );
    }

    #[test]
    fn test_create_type_rejects_garbage() {
        assert!(matches!(
            parse_create_type("CREATE TYPE broken ("),
            Err(SchemaError::SchemaParse { .. })
        ));
        assert!(matches!(
            parse_create_type("SELECT * FROM t"),
            Err(SchemaError::SchemaParse { .. })
        ));
    }
}
