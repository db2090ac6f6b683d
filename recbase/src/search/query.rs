//! Minimal `SELECT` builder used by the search provider and the field resolvers.

use crate::db::Params;
use crate::tools::dbutils::{quote_column, quote_table};

/// A built SQL fragment together with the named parameters it references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expr {
    pub sql: String,
    pub params: Params,
}

impl Expr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Params) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// A `LEFT JOIN` clause. Joins without `on` behave as cross joins.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table_name: String,
    pub table_alias: String,
    pub on: Option<String>,
    pub params: Params,
}

impl Join {
    pub fn new(table_name: impl Into<String>, table_alias: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            table_alias: table_alias.into(),
            on: None,
            params: Params::new(),
        }
    }

    pub fn on(mut self, condition: impl Into<String>) -> Self {
        self.on = Some(condition.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn build(&self) -> String {
        let mut sql = format!("LEFT JOIN {} {}", quote_table(&self.table_name), quote_table(&self.table_alias));
        if let Some(on) = &self.on {
            sql.push_str(" ON ");
            sql.push_str(on);
        }
        sql
    }
}

/// Adds `join` to `joins`, replacing a previous join with the same alias.
pub fn register_join(joins: &mut Vec<Join>, join: Join) {
    match joins.iter_mut().find(|j| j.table_alias == join.table_alias) {
        Some(existing) => *existing = join,
        None => joins.push(join),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub columns: Vec<String>,
    pub table_name: String,
    pub table_alias: String,
    pub joins: Vec<Join>,
    pub wheres: Vec<Expr>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    /// `SELECT alias.* FROM table alias`.
    pub fn from(table_name: impl Into<String>, table_alias: impl Into<String>) -> Self {
        let table_alias = table_alias.into();
        Self {
            columns: vec![format!("{}.*", quote_table(&table_alias))],
            table_name: table_name.into(),
            table_alias,
            ..Self::default()
        }
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn join(&mut self, join: Join) {
        register_join(&mut self.joins, join);
    }

    pub fn and_where(&mut self, expr: Expr) {
        if !expr.sql.is_empty() {
            self.wheres.push(expr);
        }
    }

    pub fn and_order_by(&mut self, term: impl Into<String>) {
        self.order_by.push(term.into());
    }

    fn build_tail(&self, sql: &mut String, params: &mut Params) {
        sql.push_str(&format!(" FROM {} {}", quote_table(&self.table_name), quote_table(&self.table_alias)));
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.build());
            params.extend(join.params.iter().cloned());
        }
        if !self.wheres.is_empty() {
            let conditions: Vec<String> = self.wheres.iter().map(|w| format!("({})", w.sql)).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
            for w in &self.wheres {
                params.extend(w.params.iter().cloned());
            }
        }
    }

    pub fn build(&self) -> (String, Params) {
        let mut params = Params::new();
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.columns.join(", "));
        self.build_tail(&mut sql, &mut params);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        (sql, params)
    }

    /// `COUNT(DISTINCT alias.column)` over the same joins and conditions, ignoring sort and paging.
    pub fn build_count(&self, column: &str) -> (String, Params) {
        let mut params = Params::new();
        let mut sql = format!("SELECT COUNT(DISTINCT {})", quote_column(&format!("{}.{column}", self.table_alias)));
        self.build_tail(&mut sql, &mut params);
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value as SqlValue;

    #[test]
    fn test_build_select() {
        let mut query = SelectQuery::from("demo", "demo").distinct(true);
        query.join(Join::new("other", "o").on("`o`.`id` = `demo`.`rel`"));
        query.join(Join::new("other2", "o").on("1 = 1"));
        query.and_where(Expr::with_params("`demo`.`a` = :p1", vec![("p1".into(), SqlValue::Integer(1))]));
        query.and_order_by("`demo`.`a` DESC");
        query.limit = Some(10);
        query.offset = Some(20);

        let (sql, params) = query.build();
        assert_eq!(
            sql,
            "SELECT DISTINCT `demo`.* FROM `demo` `demo` LEFT JOIN `other2` `o` ON 1 = 1 WHERE (`demo`.`a` = :p1) ORDER BY `demo`.`a` DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(params.len(), 1);

        let (count_sql, _) = query.build_count("id");
        assert_eq!(
            count_sql,
            "SELECT COUNT(DISTINCT `demo`.`id`) FROM `demo` `demo` LEFT JOIN `other2` `o` ON 1 = 1 WHERE (`demo`.`a` = :p1)"
        );
    }
}
