//! Parser and builder for raw `CREATE INDEX` statements.

use std::sync::LazyLock;

use regex::Regex;

use super::tokenizer::Tokenizer;

static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)create\s+(unique\s+)?\s*index\s*(if\s+not\s+exists\s+)?(\S*)\s+on\s+(\S*)\s*\(([\s\S]*)\)(?:\s*where\s+([\s\S]*))?",
    )
    .expect("index pattern is valid")
});

static INDEX_COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^([\s\S]+?)(?:\s+collate\s+([\w]+))?(?:\s+(asc|desc))?$").expect("index column pattern is valid")
});

const TRIM_CHARS: &[char] = &['`', '"', '\'', '[', ']', '\r', '\n', '\t', '\u{000C}', '\u{000B}', ' '];

/// A single indexed column or expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub collate: String,
    pub sort: String,
}

/// Parsed representation of a `CREATE [UNIQUE] INDEX` statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub schema_name: String,
    pub index_name: String,
    pub table_name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    pub optional: bool,
    pub where_clause: String,
}

impl Index {
    pub fn is_valid(&self) -> bool {
        !self.index_name.is_empty() && !self.table_name.is_empty() && !self.columns.is_empty()
    }

    /// Renders the index back into a normalized `CREATE INDEX` statement.
    ///
    /// Returns an empty string for invalid indexes.
    pub fn build(&self) -> String {
        if !self.is_valid() {
            return String::new();
        }

        let mut out = String::from("CREATE ");
        if self.unique {
            out.push_str("UNIQUE ");
        }
        out.push_str("INDEX ");
        if self.optional {
            out.push_str("IF NOT EXISTS ");
        }
        if !self.schema_name.is_empty() {
            out.push_str(&format!("`{}`.", self.schema_name));
        }
        out.push_str(&format!("`{}` ON `{}` (", self.index_name, self.table_name));

        let multiline = self.columns.len() > 1;
        if multiline {
            out.push_str("\n  ");
        }

        let mut has_column = false;
        for column in &self.columns {
            let name = column.name.trim();
            if name.is_empty() {
                continue;
            }
            if has_column {
                out.push_str(",\n  ");
            }
            if name.contains('(') || name.contains(' ') {
                out.push_str(name);
            } else {
                out.push_str(&format!("`{name}`"));
            }
            if !column.collate.is_empty() {
                out.push_str(" COLLATE ");
                out.push_str(&column.collate);
            }
            if !column.sort.is_empty() {
                out.push(' ');
                out.push_str(&column.sort.to_uppercase());
            }
            has_column = true;
        }

        if multiline {
            out.push('\n');
        }
        out.push(')');

        if !self.where_clause.is_empty() {
            out.push_str(" WHERE ");
            out.push_str(&self.where_clause);
        }

        out
    }

    /// Compares uniqueness and the indexed column names, ignoring names, collation, sort and predicate.
    pub fn is_equivalent_to(&self, other: &Index) -> bool {
        self.unique == other.unique
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name.eq_ignore_ascii_case(&b.name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Parses a raw `CREATE INDEX` statement.
///
/// Anything that doesn't look like an index definition produces an empty (invalid) [`Index`].
pub fn parse_index(create_index: &str) -> Index {
    let mut result = Index::default();

    let Some(caps) = INDEX_RE.captures(create_index) else {
        return result;
    };
    let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

    result.unique = !group(1).trim().is_empty();
    result.optional = !group(2).trim().is_empty();

    let name_parts = Tokenizer::new(group(3)).separators(&['.']).scan_all().unwrap_or_default();
    match name_parts.as_slice() {
        [schema, name] => {
            result.schema_name = schema.trim_matches(TRIM_CHARS).to_string();
            result.index_name = name.trim_matches(TRIM_CHARS).to_string();
        }
        [name, ..] => result.index_name = name.trim_matches(TRIM_CHARS).to_string(),
        [] => {}
    }

    result.table_name = group(4).trim_matches(TRIM_CHARS).to_string();

    let raw_columns = Tokenizer::new(group(5)).separators(&[',']).scan_all().unwrap_or_default();
    for raw in raw_columns {
        let Some(col) = INDEX_COLUMN_RE.captures(&raw) else {
            continue;
        };
        let name = col.get(1).map(|m| m.as_str()).unwrap_or_default().trim_matches(TRIM_CHARS);
        if name.is_empty() {
            continue;
        }
        result.columns.push(IndexColumn {
            name: name.to_string(),
            collate: col.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            sort: col.get(3).map(|m| m.as_str().to_uppercase()).unwrap_or_default(),
        });
    }

    result.where_clause = group(6).trim().to_string();

    result
}

/// Finds a unique index that covers exactly `column`.
pub fn find_single_column_unique_index(indexes: &[String], column: &str) -> Option<Index> {
    indexes.iter().map(|raw| parse_index(raw)).find(|parsed| {
        parsed.unique && parsed.columns.len() == 1 && parsed.columns[0].name.eq_ignore_ascii_case(column)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_definition() {
        let idx = parse_index(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"main\".[idx_title] ON `demo` (title COLLATE nocase DESC, lower(name), `created`) WHERE title != ''",
        );
        assert!(idx.is_valid());
        assert!(idx.unique);
        assert!(idx.optional);
        assert_eq!(idx.schema_name, "main");
        assert_eq!(idx.index_name, "idx_title");
        assert_eq!(idx.table_name, "demo");
        assert_eq!(idx.columns.len(), 3);
        assert_eq!(idx.columns[0], IndexColumn { name: "title".into(), collate: "nocase".into(), sort: "DESC".into() });
        assert_eq!(idx.columns[1].name, "lower(name)");
        assert_eq!(idx.where_clause, "title != ''");
    }

    #[test]
    fn build_output_reparses_to_same_index() {
        let raw = "create index idx_a on demo (a asc, b)";
        let first = parse_index(raw);
        let second = parse_index(&first.build());
        assert_eq!(first, second);
        assert_eq!(first.build(), "CREATE INDEX `idx_a` ON `demo` (\n  `a` ASC,\n  `b`\n)");
    }

    #[test]
    fn rejects_garbage() {
        assert!(!parse_index("select 1").is_valid());
        assert_eq!(parse_index("CREATE INDEX idx ON demo ()").columns.len(), 0);
        assert_eq!(parse_index("nope").build(), "");
    }

    #[test]
    fn finds_single_column_unique_index() {
        let indexes = vec![
            "CREATE INDEX idx_a ON t (a)".to_string(),
            "CREATE UNIQUE INDEX idx_ab ON t (a, b)".to_string(),
            "CREATE UNIQUE INDEX idx_b ON t (`B`) WHERE b != ''".to_string(),
        ];
        assert!(find_single_column_unique_index(&indexes, "a").is_none());
        assert_eq!(find_single_column_unique_index(&indexes, "b").map(|i| i.index_name), Some("idx_b".into()));
    }

    #[test]
    fn equivalence_ignores_non_semantic_parts() {
        let a = parse_index("CREATE UNIQUE INDEX a ON t (email)");
        let b = parse_index("CREATE UNIQUE INDEX b ON x (email COLLATE nocase DESC) WHERE email != ''");
        let c = parse_index("CREATE UNIQUE INDEX a ON t (email, name)");
        let d = parse_index("CREATE INDEX a ON t (email)");
        assert!(a.is_equivalent_to(&b));
        assert!(!a.is_equivalent_to(&c));
        assert!(!a.is_equivalent_to(&d));
    }
}
