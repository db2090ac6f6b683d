use super::{FieldResolver, SortOrder};
use crate::errors::{CoreError, CoreResult};
use crate::tools::dbutils::quote_column;

pub const RANDOM_SORT_KEY: &str = "@random";
pub const ROWID_SORT_KEY: &str = "@rowid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub name: String,
    pub order: SortOrder,
}

impl SortField {
    /// Resolves the field into an `ORDER BY` term.
    pub fn build_expr(&self, resolver: &mut dyn FieldResolver, main_alias: &str) -> CoreResult<String> {
        if self.name == RANDOM_SORT_KEY {
            return Ok("RANDOM()".to_string());
        }
        if self.name == ROWID_SORT_KEY {
            return Ok(format!("{} {}", quote_column(&format!("{main_alias}._rowid_")), self.order.as_str()));
        }

        let result = resolver.resolve(&self.name)?;
        if !result.params.is_empty() || result.identifier.is_empty() || result.identifier.eq_ignore_ascii_case("null") {
            return Err(CoreError::filter(format!("invalid sort field {:?}", self.name)));
        }
        Ok(format!("{} {}", result.identifier, self.order.as_str()))
    }
}

/// Parses `-created,+title,id` into sort fields.
///
/// A leading `-` sorts descending; `+` or no prefix sorts ascending.
pub fn parse_sort(raw: &str) -> Vec<SortField> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            if let Some(name) = part.strip_prefix('-') {
                SortField { name: name.trim().to_string(), order: SortOrder::Desc }
            } else {
                SortField {
                    name: part.strip_prefix('+').unwrap_or(part).trim().to_string(),
                    order: SortOrder::Asc,
                }
            }
        })
        .filter(|field| !field.name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SimpleFieldResolver;

    #[test]
    fn test_parse_sort() {
        let fields = parse_sort(" -created, +title,id,, -");
        assert_eq!(
            fields,
            vec![
                SortField { name: "created".into(), order: SortOrder::Desc },
                SortField { name: "title".into(), order: SortOrder::Asc },
                SortField { name: "id".into(), order: SortOrder::Asc },
            ]
        );
    }

    #[test]
    fn test_build_sort_expr() {
        let mut resolver = SimpleFieldResolver::new(&["title"]);
        let desc = SortField { name: "title".into(), order: SortOrder::Desc };
        assert_eq!(desc.build_expr(&mut resolver, "demo").unwrap(), "`title` DESC");

        let random = SortField { name: "@random".into(), order: SortOrder::Asc };
        assert_eq!(random.build_expr(&mut resolver, "demo").unwrap(), "RANDOM()");

        let rowid = SortField { name: "@rowid".into(), order: SortOrder::Desc };
        assert_eq!(rowid.build_expr(&mut resolver, "demo").unwrap(), "`demo`.`_rowid_` DESC");

        let unknown = SortField { name: "missing".into(), order: SortOrder::Asc };
        assert!(unknown.build_expr(&mut resolver, "demo").is_err());
    }
}
