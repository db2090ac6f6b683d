//! Field inference for view collections.
//!
//! The select query is materialized as a throwaway view to learn the real
//! column list, while a light parser over the query text tries to map every
//! column back to a field of a known collection.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::collection::Collection;
use crate::db::Db;
use crate::errors::{CoreError, CoreResult};
use crate::fields::{BoolField, FIELD_NAME_ID, FIELD_TYPE_TEXT, Field, JsonField, NumberField, RelationField, TextField};
use crate::fields_list::FieldsList;
use crate::id::{DEFAULT_ID_PATTERN, field_id};
use crate::tools::security::pseudorandom_string;
use crate::tools::tokenizer::Tokenizer;

static JOIN_REPLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)\s+(full\s+outer\s+join|left\s+outer\s+join|right\s+outer\s+join|full\s+join|cross\s+join|inner\s+join|outer\s+join|left\s+join|right\s+join|join)\s+",
    )
    .expect("valid join regex")
});

static DISCARD_REPLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\s+(where|group\s+by|having|order|limit|with)\s+").expect("valid discard regex")
});

static COMMENTS_REPLACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(/\*[\s\S]*?\*/)|(--.*$)").expect("valid comments regex"));

static CAST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^cast\s*\(.*\s+as\s+(\w+)\s*\)$").expect("valid cast regex"));

const JOIN_MARKER: &str = "__pb_join__";
const DISCARD_MARKER: &str = "__pb_discard__";

/// A select column or table reference with its alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlIdentifier {
    pub original: String,
    pub alias: String,
}

/// Column and table identifiers extracted from a select query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryIdentifiers {
    pub columns: Vec<SqlIdentifier>,
    /// The `FROM` tables first, followed by the joined ones.
    pub tables: Vec<SqlIdentifier>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Part {
    None,
    Select,
    From,
    Join,
}

/// Extracts the select columns and the referenced tables of `query`.
///
/// Everything after `WHERE`, `GROUP BY`, `HAVING`, `ORDER`, `LIMIT` and the
/// `ON` constraints of joins is ignored.
pub fn parse_query_identifiers(query: &str) -> CoreResult<QueryIdentifiers> {
    let normalized = JOIN_REPLACE.replace_all(query.trim(), format!(" {JOIN_MARKER} "));
    let normalized = DISCARD_REPLACE.replace_all(&normalized, format!(" {DISCARD_MARKER} "));
    let normalized = COMMENTS_REPLACE.replace_all(&normalized, "");

    let tokens = Tokenizer::new(&normalized)
        .separators(&[',', ' ', '\n', '\t'])
        .keep_separator(true)
        .scan_all()
        .map_err(CoreError::invalid)?;

    let mut skip = false;
    let mut part = Part::None;
    let mut select_parts = String::new();
    let mut from_parts = String::new();
    let mut join_parts = String::new();

    for token in tokens {
        let lower = token.trim().to_lowercase();
        match lower.as_str() {
            "select" => {
                skip = false;
                part = Part::Select;
            }
            "distinct" => {}
            "from" => {
                skip = false;
                part = Part::From;
            }
            JOIN_MARKER => {
                skip = false;
                if part == Part::Join {
                    join_parts.push(',');
                }
                part = Part::Join;
            }
            DISCARD_MARKER => skip = true,
            _ => {
                if part == Part::Join && lower == "on" {
                    skip = true;
                }
                if skip {
                    continue;
                }
                let target = match part {
                    Part::Select => &mut select_parts,
                    Part::From => &mut from_parts,
                    Part::Join => &mut join_parts,
                    Part::None => continue,
                };
                target.push(' ');
                target.push_str(&token);
            }
        }
    }

    let mut tables = extract_identifiers(&from_parts)?;
    tables.extend(extract_identifiers(&join_parts)?);
    Ok(QueryIdentifiers {
        columns: extract_identifiers(&select_parts)?,
        tables,
    })
}

fn extract_identifiers(raw: &str) -> CoreResult<Vec<SqlIdentifier>> {
    let items = Tokenizer::new(raw).separators(&[',']).scan_all().map_err(CoreError::invalid)?;

    let mut result = Vec::with_capacity(items.len());
    for item in items {
        let parts = Tokenizer::new(&item)
            .separators(&[' ', '\n', '\t'])
            .scan_all()
            .map_err(CoreError::invalid)?;

        let (original, alias) = match parts.as_slice() {
            [original] => {
                let alias = original.rsplit('.').next().unwrap_or(original);
                (original.as_str(), alias)
            }
            [original, alias] => (original.as_str(), alias.as_str()),
            [original, keyword, alias] => {
                if !keyword.eq_ignore_ascii_case("as") {
                    return Err(CoreError::invalid(format!(
                        "invalid identifier part - expected \"as\", got {keyword:?}"
                    )));
                }
                (original.as_str(), alias.as_str())
            }
            _ => return Err(CoreError::invalid(format!("invalid identifier parts {parts:?}"))),
        };

        result.push(SqlIdentifier {
            original: trim_identifier(original, ""),
            // sqlite accepts single quoted aliases where an identifier is expected
            alias: trim_identifier(alias, "'"),
        });
    }
    Ok(result)
}

fn trim_identifier(raw: &str, extra: &str) -> String {
    let is_trim = |c: char| "`\"[];".contains(c) || extra.contains(c);
    raw.split('.').map(|part| part.trim_matches(is_trim)).collect::<Vec<_>>().join(".")
}

/// Resolves the table identifiers to collections, keyed by table alias.
fn collections_by_alias(db: &Db, tables: &[SqlIdentifier]) -> CoreResult<HashMap<String, Collection>> {
    let names: Vec<String> = tables
        .iter()
        .filter(|table| !table.alias.contains('('))
        .map(|table| table.original.clone())
        .collect();
    if names.is_empty() {
        return Ok(HashMap::new());
    }

    let collections = db.find_collections_by_names(&names)?;
    let mut result = HashMap::new();
    for table in tables {
        if let Some(collection) = collections.iter().find(|c| c.name.eq_ignore_ascii_case(&table.original)) {
            result.insert(table.alias.clone(), collection.clone());
        }
    }
    Ok(result)
}

fn view_primary_key() -> Field {
    let mut field = TextField::new(FIELD_NAME_ID);
    field.base.id = field_id(FIELD_TYPE_TEXT, FIELD_NAME_ID);
    field.base.system = true;
    field.required = true;
    field.primary_key = true;
    field.pattern = DEFAULT_ID_PATTERN.to_string();
    field.into()
}

fn cast_field(cast_type: &str, alias: &str) -> Option<Field> {
    match cast_type {
        "real" | "integer" | "int" | "decimal" | "numeric" => Some(NumberField::new(alias).into()),
        "text" => Some(TextField::new(alias).into()),
        "bool" | "boolean" => Some(BoolField::new(alias).into()),
        "json" => Some(JsonField::new(alias).into()),
        _ => None,
    }
}

/// Suggests a field for every select column of `query`, keyed by column alias.
fn suggest_fields(db: &Db, query: &str) -> CoreResult<HashMap<String, Field>> {
    let identifiers = parse_query_identifiers(query)?;
    let collections = collections_by_alias(db, &identifiers.tables)?;
    let main_alias = identifiers.tables.first().map(|t| t.alias.as_str()).unwrap_or_default();

    let mut result = HashMap::new();
    for column in &identifiers.columns {
        let alias = column.alias.as_str();
        let lower = column.original.to_lowercase();

        if alias == FIELD_NAME_ID {
            result.insert(alias.to_string(), view_primary_key());
            continue;
        }

        if lower.starts_with("count(") || lower.starts_with("total(") {
            result.insert(alias.to_string(), NumberField::new(alias).into());
            continue;
        }

        if let Some(field) = CAST_REGEX
            .captures(&lower)
            .and_then(|caps| caps.get(1))
            .and_then(|cast| cast_field(cast.as_str(), alias))
        {
            result.insert(alias.to_string(), field);
            continue;
        }

        let (collection, field_name) = match column.original.split_once('.') {
            Some((table, name)) if !name.contains('.') => (collections.get(table), name),
            _ => (collections.get(main_alias), column.original.as_str()),
        };

        let Some(collection) = collection else {
            result.insert(alias.to_string(), JsonField::new(alias).into());
            continue;
        };

        if field_name == "*" {
            return Err(CoreError::invalid("dynamic column names are not supported"));
        }

        let field = match collection.fields.iter().find(|f| f.name().eq_ignore_ascii_case(field_name)) {
            None => JsonField::new(alias).into(),
            Some(found) if found.name() == FIELD_NAME_ID => {
                RelationField::new(alias, collection.id.clone()).multiple(1).into()
            }
            Some(found) => {
                let mut clone = found.clone();
                clone.set_id(format!("_clone_{}", pseudorandom_string(4)));
                clone.set_system(false);
                clone.set_name(alias);
                clone
            }
        };
        result.insert(alias.to_string(), field);
    }

    Ok(result)
}

/// Infers the field list of a view collection from its select query.
///
/// The query must expose an `id` column. The returned fields follow the
/// column order reported by SQLite; columns that can't be traced back to a
/// collection field become json fields.
pub fn create_view_fields(db: &Db, query: &str) -> CoreResult<FieldsList> {
    db.run_in_transaction(|db| {
        let temp_view = format!("_temp_{}", pseudorandom_string(6));
        db.save_view(&temp_view, query)?;

        let columns = db.table_columns(&temp_view);
        let dropped = db.delete_view(&temp_view);
        let columns = columns?;
        dropped?;

        if !columns.iter().any(|c| c.name == FIELD_NAME_ID) {
            return Err(CoreError::invalid(
                "missing required id column (you can use `(ROW_NUMBER() OVER()) as id` if you don't have one)",
            ));
        }

        let mut suggested = suggest_fields(db, query)?;
        let mut fields = FieldsList::new();
        for column in columns {
            let field = suggested
                .remove(&column.name)
                .unwrap_or_else(|| JsonField::new(column.name.as_str()).into());
            fields.add(field);
        }
        log::debug!("inferred {} view field(s)", fields.len());
        Ok(fields)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(original: &str, alias: &str) -> SqlIdentifier {
        SqlIdentifier {
            original: original.to_string(),
            alias: alias.to_string(),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let parsed = parse_query_identifiers("select id, a.title as t, `b`.name n from demo a").unwrap();
        assert_eq!(parsed.columns, vec![ident("id", "id"), ident("a.title", "t"), ident("b.name", "n")]);
        assert_eq!(parsed.tables, vec![ident("demo", "a")]);
    }

    #[test]
    fn test_parse_joins_and_discarded_parts() {
        let parsed = parse_query_identifiers(
            "SELECT DISTINCT a.id, count(b.id) as total
             FROM demo1 a
             LEFT JOIN demo2 b ON b.rel = a.id
             INNER JOIN demo3 AS c ON c.id = b.id
             -- a comment
             WHERE a.id != '' GROUP BY a.id ORDER BY a.id LIMIT 10",
        )
        .unwrap();
        assert_eq!(parsed.columns, vec![ident("a.id", "id"), ident("count(b.id)", "total")]);
        assert_eq!(parsed.tables, vec![ident("demo1", "a"), ident("demo2", "b"), ident("demo3", "c")]);
    }

    #[test]
    fn test_parse_invalid_alias_keyword() {
        assert!(parse_query_identifiers("select a x y from demo").is_err());
    }

    #[test]
    fn test_view_fields_require_id() {
        let db = Db::open_in_memory().unwrap();
        let err = create_view_fields(&db, "select 1 as a").unwrap_err();
        assert!(err.to_string().contains("missing required id column"));
        assert!(db.find_all_views().unwrap().is_empty());
    }

    #[test]
    fn test_view_fields_from_expressions() {
        let db = Db::open_in_memory().unwrap();
        let fields = create_view_fields(
            &db,
            "select 'x' as id, cast(1 as int) as num, cast('a' as text) as txt, count(1) as cnt, 1 as other",
        )
        .unwrap();

        let types: Vec<&str> = fields.iter().map(Field::type_name).collect();
        assert_eq!(types, vec!["text", "number", "text", "number", "json"]);
        let pk = fields.get_by_name("id").and_then(Field::as_text).unwrap();
        assert!(pk.primary_key);
        assert!(db.find_all_views().unwrap().is_empty());
    }
}
