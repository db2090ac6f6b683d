//! SQL expression builders for the JSON1 functions and identifier quoting.

/// Quotes a possibly dotted identifier (`alias.column` becomes `` `alias`.`column` ``).
///
/// Parts that look like expressions (contain parentheses or spaces) are left untouched.
pub fn quote_column(identifier: &str) -> String {
    if identifier.contains('(') || identifier.contains(' ') {
        return identifier.to_string();
    }
    identifier
        .split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                format!("`{}`", part.replace('`', "``"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes a single table or alias name.
pub fn quote_table(name: &str) -> String {
    if name.contains('(') {
        return name.to_string();
    }
    format!("`{}`", name.replace('`', "``"))
}

/// `json_each` over a column that may hold either a JSON array or a plain scalar.
pub fn json_each(column: &str) -> String {
    let col = quote_column(column);
    format!("json_each(CASE WHEN json_valid({col}) THEN {col} ELSE json_array({col}) END)")
}

/// Array length of a column that may hold either a JSON array or a plain scalar.
///
/// Empty and NULL scalars count as zero elements.
pub fn json_array_length(column: &str) -> String {
    let col = quote_column(column);
    format!(
        "json_array_length(CASE WHEN json_valid({col}) THEN {col} ELSE (CASE WHEN {col} = '' OR {col} IS NULL THEN json_array() ELSE json_array({col}) END) END)"
    )
}

/// `json_extract` with a best-effort fallback to the raw column value for non-JSON content.
///
/// `path` uses the `a.b[0]` notation without the leading `$`.
pub fn json_extract(column: &str, path: &str) -> String {
    let col = quote_column(column);
    let full_path = if path.is_empty() {
        "$".to_string()
    } else if path.starts_with('[') {
        format!("${path}")
    } else {
        format!("$.{path}")
    };
    format!(
        "(CASE WHEN json_valid({col}) THEN JSON_EXTRACT({col}, '{full_path}') ELSE JSON_EXTRACT(json_object('pb', {col}), '$.pb{}') END)",
        full_path.trim_start_matches('$')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_dotted_identifiers() {
        assert_eq!(quote_column("demo1.title"), "`demo1`.`title`");
        assert_eq!(quote_column("t.*"), "`t`.*");
        assert_eq!(quote_column("LOWER(x)"), "LOWER(x)");
    }

    #[test]
    fn json_helpers_wrap_scalars() {
        assert_eq!(
            json_each("demo.rel"),
            "json_each(CASE WHEN json_valid(`demo`.`rel`) THEN `demo`.`rel` ELSE json_array(`demo`.`rel`) END)"
        );
        let extract = json_extract("demo.meta", "a[1].b");
        assert!(extract.contains("JSON_EXTRACT(`demo`.`meta`, '$.a[1].b')"));
        assert!(extract.contains("'$.pb.a[1].b'"));
    }
}
