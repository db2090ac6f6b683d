use std::sync::LazyLock;

use regex::Regex;

use super::{FieldResolver, ResolverResult, SelectQuery};
use crate::errors::{CoreError, CoreResult};
use crate::tools::dbutils::quote_column;

static NUMERIC_PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("numeric pattern is valid"));

/// Resolver over a fixed set of plain table columns, without joins.
///
/// Entries starting with `^` are treated as regular expressions. Dotted
/// identifiers (`data.items.0`) resolve to a `JSON_EXTRACT` of their first part.
#[derive(Debug, Clone)]
pub struct SimpleFieldResolver {
    allowed: Vec<String>,
}

impl SimpleFieldResolver {
    pub fn new(allowed: &[&str]) -> Self {
        Self {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_allowed(&self, field: &str) -> bool {
        self.allowed.iter().any(|pattern| {
            if pattern.starts_with('^') {
                Regex::new(pattern).map(|re| re.is_match(field)).unwrap_or(false)
            } else {
                pattern == field
            }
        })
    }
}

impl FieldResolver for SimpleFieldResolver {
    fn resolve(&mut self, field: &str) -> CoreResult<ResolverResult> {
        if !self.is_allowed(field) {
            return Err(CoreError::filter(format!("failed to resolve field {field:?}")));
        }

        let mut parts = field.split('.');
        let column = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return Ok(ResolverResult::identifier(quote_column(column)));
        }

        let mut path = String::from("$");
        for part in rest {
            if NUMERIC_PART.is_match(part) {
                path.push_str(&format!("[{part}]"));
            } else {
                path.push('.');
                path.push_str(part);
            }
        }

        Ok(ResolverResult {
            identifier: format!("JSON_EXTRACT({}, '{path}')", quote_column(column)),
            no_coalesce: true,
            ..ResolverResult::default()
        })
    }

    fn update_query(&self, _query: &mut SelectQuery) -> CoreResult<()> {
        Ok(())
    }
}
