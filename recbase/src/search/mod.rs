//! # Filter language and record search
//!
//! Filters are small boolean expressions such as
//! `title ~ 'abc' && (author.name = @request.auth.name || @collection.posts.likes ?> 10)`.
//! They are parsed by [`parser::parse`] and compiled to SQL by [`FilterData`] with the
//! help of a [`FieldResolver`], which turns identifiers into column expressions and
//! registers the joins they need.
//!
//! ## Multi-valued operands
//!
//! When an identifier goes through a multi-valued hop (a multiple relation, a back
//! relation or a multiple select/file field) the resolver attaches a
//! [`MultiMatchSubquery`] that lists every candidate value of the current row. The
//! comparison is then evaluated against that subquery:
//!
//! | Operator            | Meaning on a multi-valued operand         |
//! |---------------------|-------------------------------------------|
//! | `=`, `~`, `<`, ...  | at least one value matches                |
//! | `!=`, `!~`          | no value matches the positive form        |
//! | `?=`, `?!=`, ...    | at least one value matches the operator   |
//! | `field:each = x`    | every value matches (and at least one exists) |

mod filter;
pub mod lexer;
mod macros;
pub mod parser;
mod provider;
mod query;
mod simple_resolver;
mod sort;

use serde::{Deserialize, Serialize};

pub use filter::FilterData;
pub(crate) use filter::placeholder;
pub use provider::{SearchProvider, SearchQuery};
pub use query::{Expr, Join, SelectQuery, register_join};
pub use simple_resolver::SimpleFieldResolver;
pub use sort::{SortField, parse_sort};

use crate::db::Params;
use crate::errors::CoreResult;
use crate::tools::dbutils::{quote_column, quote_table};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PER_PAGE: u64 = 30;
pub const MAX_PER_PAGE: u64 = 1000;
pub const MAX_SORT_FIELDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Auxiliary query listing every value of a multi-valued path for the current row.
///
/// The subquery mirrors the joins of the main query under `__mm_` prefixed
/// aliases and is correlated to the main row by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiMatchSubquery {
    pub base_table_alias: String,
    pub from_table_name: String,
    pub from_table_alias: String,
    pub value_identifier: String,
    pub joins: Vec<Join>,
    pub wheres: Vec<String>,
    pub params: Params,
    /// Every value has to satisfy the comparison (`:each`).
    pub universal: bool,
}

impl MultiMatchSubquery {
    pub fn build(&self) -> String {
        let mut sql = format!(
            "SELECT {} AS `multiMatchValue` FROM {} {}",
            self.value_identifier,
            quote_table(&self.from_table_name),
            quote_table(&self.from_table_alias)
        );
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.build());
        }
        sql.push_str(&format!(
            " WHERE {} = {}",
            quote_column(&format!("{}.id", self.from_table_alias)),
            quote_column(&format!("{}.id", self.base_table_alias))
        ));
        for condition in &self.wheres {
            sql.push_str(" AND ");
            sql.push_str(condition);
        }
        sql
    }

    /// Parameters of the subquery and all of its joins.
    pub fn all_params(&self) -> Params {
        let mut params = self.params.clone();
        for join in &self.joins {
            params.extend(join.params.iter().cloned());
        }
        params
    }
}

/// Resolved form of a filter identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverResult {
    /// SQL expression of the operand (column, placeholder or literal).
    pub identifier: String,
    /// Compare with `IS`/`IS NOT` instead of the coalesced equality.
    pub no_coalesce: bool,
    pub params: Params,
    pub multi_match: Option<MultiMatchSubquery>,
    /// Condition ANDed with the built comparison.
    pub extra_condition: Option<String>,
}

impl ResolverResult {
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }
}

/// Maps filter and sort identifiers to SQL.
pub trait FieldResolver {
    fn resolve(&mut self, field: &str) -> CoreResult<ResolverResult>;

    /// Adds the joins required by the identifiers resolved so far.
    fn update_query(&self, query: &mut SelectQuery) -> CoreResult<()>;
}

#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    pub items: Vec<T>,
    /// `None` when the total count was skipped.
    pub total: Option<u64>,
    pub page: u64,
    pub per_page: u64,
}

impl<T> SearchResult<T> {
    #[inline]
    pub fn total_pages(&self) -> Option<u64> {
        self.total.map(|total| total.div_ceil(self.per_page.max(1)))
    }

    #[inline]
    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => self.page * self.per_page < total,
            None => self.items.len() as u64 >= self.per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> SearchResult<U> {
        SearchResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T: Serialize> From<SearchResult<T>> for PaginatedResponse<T> {
    fn from(value: SearchResult<T>) -> Self {
        let total_pages = value.total_pages().map_or(-1, |p| p as i64);
        Self {
            total_items: value.total.map_or(-1, |t| t as i64),
            total_pages,
            page: value.page,
            per_page: value.per_page,
            items: value.items,
        }
    }
}
