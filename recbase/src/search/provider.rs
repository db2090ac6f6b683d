use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    DEFAULT_PAGE, DEFAULT_PER_PAGE, FieldResolver, FilterData, MAX_PER_PAGE, MAX_SORT_FIELDS, SearchResult,
    SelectQuery, SortField, parse_sort,
};
use crate::db::Db;
use crate::errors::{CoreError, CoreResult};

/// Raw list parameters as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub sort: Option<String>,
    pub filter: Option<String>,
    #[serde(default)]
    pub skip_total: bool,
}

/// Paginated, filtered and sorted listing over a base [`SelectQuery`].
pub struct SearchProvider<'a> {
    db: &'a Db,
    resolver: &'a mut dyn FieldResolver,
    query: SelectQuery,
    count_column: String,
    sort: Vec<SortField>,
    filter: Vec<FilterData>,
    page: u64,
    per_page: u64,
    skip_total: bool,
}

impl<'a> SearchProvider<'a> {
    pub fn new(db: &'a Db, resolver: &'a mut dyn FieldResolver, query: SelectQuery) -> Self {
        Self {
            db,
            resolver,
            query,
            count_column: "id".to_string(),
            sort: Vec::new(),
            filter: Vec::new(),
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            skip_total: false,
        }
    }

    pub fn count_column(mut self, column: impl Into<String>) -> Self {
        self.count_column = column.into();
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    pub fn add_sort(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    pub fn filter(mut self, filter: Vec<FilterData>) -> Self {
        self.filter = filter;
        self
    }

    pub fn add_filter(mut self, filter: FilterData) -> Self {
        self.filter.push(filter);
        self
    }

    pub fn skip_total(mut self, skip: bool) -> Self {
        self.skip_total = skip;
        self
    }

    /// Applies the client supplied parameters on top of the current settings.
    pub fn parse(mut self, params: &SearchQuery) -> Self {
        if let Some(page) = params.page {
            self.page = page;
        }
        if let Some(per_page) = params.per_page {
            self.per_page = per_page;
        }
        if let Some(sort) = params.sort.as_deref() {
            self.sort.extend(parse_sort(sort));
        }
        if let Some(filter) = params.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            self.filter.push(FilterData::new(filter));
        }
        self.skip_total = self.skip_total || params.skip_total;
        self
    }

    /// Runs the count and list queries.
    pub fn exec(self) -> CoreResult<SearchResult<Map<String, Value>>> {
        let SearchProvider {
            db,
            resolver,
            mut query,
            count_column,
            sort,
            filter,
            page,
            per_page,
            skip_total,
        } = self;

        let page = page.max(1);
        let per_page = match per_page {
            0 => DEFAULT_PER_PAGE,
            n => n.min(MAX_PER_PAGE),
        };

        for item in &filter {
            let expr = item.build_expr_with(resolver, &db.config().filter)?;
            query.and_where(expr);
        }

        if sort.len() > MAX_SORT_FIELDS {
            return Err(CoreError::filter(format!("too many sort expressions (max {MAX_SORT_FIELDS})")));
        }
        let main_alias = query.table_alias.clone();
        for field in &sort {
            let term = field.build_expr(resolver, &main_alias)?;
            query.and_order_by(term);
        }

        resolver.update_query(&mut query)?;

        let total = if skip_total {
            None
        } else {
            let (count_sql, count_params) = query.build_count(&count_column);
            Some(db.query_count(&count_sql, &count_params)?.max(0) as u64)
        };

        query.limit = Some(per_page);
        query.offset = Some((page - 1) * per_page);
        let (sql, params) = query.build();
        log::debug!("search query: {sql}");
        let items = db.query_maps(&sql, &params)?;

        Ok(SearchResult {
            items,
            total,
            page,
            per_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SimpleFieldResolver;

    fn setup() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.exec("CREATE TABLE items (id TEXT PRIMARY KEY, title TEXT, score INTEGER)").unwrap();
        for i in 1..=7 {
            db.exec(&format!("INSERT INTO items VALUES ('i{i}', 'item {i}', {})", i * 10)).unwrap();
        }
        db
    }

    #[test]
    fn test_paginated_filtered_search() {
        let db = setup();
        let mut resolver = SimpleFieldResolver::new(&["id", "title", "score"]);
        let query = SearchQuery {
            page: Some(2),
            per_page: Some(2),
            sort: Some("-score".into()),
            filter: Some("score >= 20".into()),
            skip_total: false,
        };
        let result = SearchProvider::new(&db, &mut resolver, SelectQuery::from("items", "items").distinct(true))
            .parse(&query)
            .exec()
            .unwrap();

        assert_eq!(result.total, Some(6));
        assert_eq!(result.total_pages(), Some(3));
        let ids: Vec<&str> = result.items.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["i5", "i4"]);
    }

    #[test]
    fn test_skip_total_and_limits() {
        let db = setup();
        let mut resolver = SimpleFieldResolver::new(&["id"]);
        let result = SearchProvider::new(&db, &mut resolver, SelectQuery::from("items", "items"))
            .page(0)
            .per_page(5000)
            .skip_total(true)
            .exec()
            .unwrap();
        assert_eq!(result.total, None);
        assert_eq!(result.page, 1);
        assert_eq!(result.per_page, MAX_PER_PAGE);
        assert_eq!(result.items.len(), 7);

        let mut resolver = SimpleFieldResolver::new(&["id"]);
        let too_many = (0..9).map(|_| "id").collect::<Vec<_>>().join(",");
        let err = SearchProvider::new(&db, &mut resolver, SelectQuery::from("items", "items"))
            .parse(&SearchQuery { sort: Some(too_many), ..SearchQuery::default() })
            .exec();
        assert!(err.is_err());
    }
}
