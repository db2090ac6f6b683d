//! Compiles parsed filter expressions into SQL conditions.

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use super::lexer::{Token, TokenKind};
use super::macros::macro_value;
use super::parser::{Expr as ParsedExpr, ExprGroup, ExprItem, JoinOp, SignOp, parse};
use super::query::Expr;
use super::{FieldResolver, MultiMatchSubquery, ResolverResult};
use crate::config::FilterSettings;
use crate::db::Params;
use crate::errors::{CoreError, CoreResult};
use crate::tools::security::{LOWER_ALPHANUM, random_string_with_alphabet};

/// Generates a unique named parameter key.
pub(crate) fn placeholder(prefix: &str) -> String {
    format!("{prefix}{}", random_string_with_alphabet(10, LOWER_ALPHANUM))
}

/// A raw filter string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterData(String);

impl FilterData {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Replaces `{:key}` placeholders with quoted literals of the matching values.
    pub fn with_params(raw: &str, params: &Map<String, Value>) -> Self {
        let mut result = raw.to_string();
        for (key, value) in params {
            let literal = match value {
                Value::Null => "null".to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::String(s) => quote_literal(s),
                other => quote_literal(&other.to_string()),
            };
            result = result.replace(&format!("{{:{key}}}"), &literal);
        }
        Self(result)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn build_expr(&self, resolver: &mut dyn FieldResolver) -> CoreResult<Expr> {
        self.build_expr_with(resolver, &FilterSettings::default())
    }

    /// Builds the SQL condition, enforcing the length and expression count limits.
    pub fn build_expr_with(&self, resolver: &mut dyn FieldResolver, limits: &FilterSettings) -> CoreResult<Expr> {
        if self.0.len() > limits.max_length {
            return Err(CoreError::filter(format!(
                "the filter expression is too long (max {} bytes)",
                limits.max_length
            )));
        }
        let groups = parse(&self.0)?;
        let mut counter = 0;
        build_groups(&groups, resolver, limits.max_expressions, &mut counter)
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn build_groups(
    groups: &[ExprGroup],
    resolver: &mut dyn FieldResolver,
    max_expressions: usize,
    counter: &mut usize,
) -> CoreResult<Expr> {
    let mut result = Expr::default();
    for (i, group) in groups.iter().enumerate() {
        let part = match &group.item {
            ExprItem::Expr(expr) => {
                *counter += 1;
                if *counter > max_expressions {
                    return Err(CoreError::filter(format!(
                        "the filter has too many expressions (max {max_expressions})"
                    )));
                }
                build_single(expr, resolver)?
            }
            ExprItem::Group(inner) => build_groups(inner, resolver, max_expressions, counter)?,
        };

        if i > 0 {
            result.sql.push_str(match group.join {
                JoinOp::And => " AND ",
                JoinOp::Or => " OR ",
            });
        }
        result.sql.push('(');
        result.sql.push_str(&part.sql);
        result.sql.push(')');
        result.params.extend(part.params);
    }
    Ok(result)
}

fn build_single(expr: &ParsedExpr, resolver: &mut dyn FieldResolver) -> CoreResult<Expr> {
    let left = resolve_token(&expr.left, resolver)
        .map_err(|err| CoreError::filter(format!("invalid left operand {:?} - {err}", expr.left.literal)))?;
    if left.identifier.is_empty() {
        return Err(CoreError::filter(format!("invalid left operand {:?}", expr.left.literal)));
    }
    let right = resolve_token(&expr.right, resolver)
        .map_err(|err| CoreError::filter(format!("invalid right operand {:?} - {err}", expr.right.literal)))?;
    if right.identifier.is_empty() {
        return Err(CoreError::filter(format!("invalid right operand {:?}", expr.right.literal)));
    }
    Ok(build_resolvers_expr(&left, expr.op, &right))
}

/// Resolves a single operand token.
fn resolve_token(token: &Token, resolver: &mut dyn FieldResolver) -> CoreResult<ResolverResult> {
    match token.kind {
        TokenKind::Identifier => {
            if let Some(value) = macro_value(&token.literal, Utc::now()) {
                let key = placeholder("m");
                return Ok(ResolverResult {
                    identifier: format!(":{key}"),
                    params: vec![(key, value)],
                    ..ResolverResult::default()
                });
            }

            match resolver.resolve(&token.literal) {
                Ok(result) if !result.identifier.is_empty() => Ok(result),
                other => {
                    let literal = match token.literal.to_lowercase().as_str() {
                        "null" => "NULL",
                        "true" => "1",
                        "false" => "0",
                        _ => return other,
                    };
                    Ok(ResolverResult::identifier(literal))
                }
            }
        }
        TokenKind::Text => {
            let key = placeholder("t");
            Ok(ResolverResult {
                identifier: format!(":{key}"),
                params: vec![(key, SqlValue::Text(token.literal.clone()))],
                ..ResolverResult::default()
            })
        }
        TokenKind::Number => {
            let value = match token.literal.parse::<i64>() {
                Ok(int) => SqlValue::Integer(int),
                Err(_) => SqlValue::Real(
                    token
                        .literal
                        .parse::<f64>()
                        .map_err(|_| CoreError::filter(format!("invalid number {:?}", token.literal)))?,
                ),
            };
            let key = placeholder("n");
            Ok(ResolverResult {
                identifier: format!(":{key}"),
                params: vec![(key, value)],
                ..ResolverResult::default()
            })
        }
        TokenKind::Function => resolve_function(token, resolver),
        _ => Err(CoreError::filter(format!("unexpected operand {:?}", token.literal))),
    }
}

fn resolve_function(token: &Token, resolver: &mut dyn FieldResolver) -> CoreResult<ResolverResult> {
    match token.literal.as_str() {
        "geoDistance" => {
            if token.args.len() != 4 {
                return Err(CoreError::filter(format!(
                    "[geoDistance] expected 4 arguments, got {}",
                    token.args.len()
                )));
            }
            let mut resolved = Vec::with_capacity(4);
            for (i, arg) in token.args.iter().enumerate() {
                if !matches!(arg.kind, TokenKind::Identifier | TokenKind::Number | TokenKind::Function) {
                    return Err(CoreError::filter(format!(
                        "[geoDistance] argument {i} must be an identifier, number or function"
                    )));
                }
                resolved.push(resolve_token(arg, resolver)?);
            }

            let [lon_a, lat_a, lon_b, lat_b] = [0, 1, 2, 3].map(|i| resolved[i].identifier.as_str());
            let identifier = format!(
                "(6371 * acos(cos(radians({lat_a})) * cos(radians({lat_b})) * cos(radians({lon_b}) - radians({lon_a})) + sin(radians({lat_a})) * sin(radians({lat_b}))))"
            );
            let params = resolved.iter().flat_map(|r| r.params.iter().cloned()).collect();
            Ok(ResolverResult {
                identifier,
                no_coalesce: true,
                params,
                ..ResolverResult::default()
            })
        }
        other => Err(CoreError::filter(format!("unknown function {other:?}"))),
    }
}

/// Operand view used by the comparison builders.
struct Operand<'a> {
    identifier: &'a str,
    no_coalesce: bool,
    params: &'a [(String, SqlValue)],
}

impl<'a> Operand<'a> {
    fn from_result(result: &'a ResolverResult) -> Self {
        Self {
            identifier: &result.identifier,
            no_coalesce: result.no_coalesce,
            params: &result.params,
        }
    }

    fn is_empty_identifier(&self) -> bool {
        matches!(self.identifier.to_lowercase().as_str(), "" | "null" | "''" | "\"\"" | "``")
    }

    fn has_empty_param_value(&self) -> bool {
        self.params.len() == 1
            && match &self.params[0].1 {
                SqlValue::Null => true,
                SqlValue::Text(s) => s.is_empty(),
                _ => false,
            }
    }

    fn is_empty(&self) -> bool {
        self.is_empty_identifier() || self.has_empty_param_value()
    }

    fn is_known_non_empty(&self) -> bool {
        matches!(self.identifier.to_lowercase().as_str(), "1" | "0" | "true" | "false")
            || (!self.params.is_empty() && !self.has_empty_param_value() && !self.is_empty_identifier())
    }
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

fn contains_unescaped_percent(value: &str) -> bool {
    let mut escaped = false;
    for c in value.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '%' if !escaped => return true,
            _ => escaped = false,
        }
    }
    false
}

/// Wraps text parameters with `%` for a "contains" match unless they already carry a wildcard.
fn wrap_like_params(params: &[(String, SqlValue)]) -> Params {
    params
        .iter()
        .map(|(key, value)| {
            let text = match value {
                SqlValue::Text(s) => s.clone(),
                SqlValue::Integer(i) => i.to_string(),
                SqlValue::Real(f) => f.to_string(),
                _ => return (key.clone(), value.clone()),
            };
            let wrapped = if contains_unescaped_percent(&text) {
                text
            } else {
                format!("%{}%", escape_like(&text))
            };
            (key.clone(), SqlValue::Text(wrapped))
        })
        .collect()
}

/// Equality with coalesced NULL/empty-string semantics.
fn equal_expr(equal: bool, left: &Operand<'_>, right: &Operand<'_>) -> Expr {
    let (equal_op, null_equal_op, concat_op, null_expr) = if equal {
        ("=", "IS", "OR", "IS NULL")
    } else {
        // `IS NOT` so that comparisons with NULL columns still yield TRUE
        ("IS NOT", "IS NOT", "AND", "IS NOT NULL")
    };

    let all_params = || -> Params { left.params.iter().chain(right.params).cloned().collect() };

    if left.no_coalesce || right.no_coalesce {
        return Expr::with_params(
            format!("{} {null_equal_op} {}", left.identifier, right.identifier),
            all_params(),
        );
    }

    let left_empty = left.is_empty();
    let right_empty = right.is_empty();

    if left_empty && right_empty {
        return Expr::new(format!("'' {equal_op} ''"));
    }

    if left.is_known_non_empty() || right.is_known_non_empty() {
        let (l, mut params) = if left_empty { ("''", Params::new()) } else { (left.identifier, left.params.to_vec()) };
        let r = if right_empty {
            "''"
        } else {
            params.extend(right.params.iter().cloned());
            right.identifier
        };
        return Expr::with_params(format!("{l} {equal_op} {r}"), params);
    }

    if left_empty {
        let r = right.identifier;
        return Expr::with_params(
            format!("('' {equal_op} {r} {concat_op} {r} {null_expr})"),
            right.params.to_vec(),
        );
    }

    if right_empty {
        let l = left.identifier;
        return Expr::with_params(
            format!("({l} {equal_op} '' {concat_op} {l} {null_expr})"),
            left.params.to_vec(),
        );
    }

    Expr::with_params(
        format!("COALESCE({}, '') {equal_op} COALESCE({}, '')", left.identifier, right.identifier),
        all_params(),
    )
}

fn like_expr(negate: bool, left: &Operand<'_>, right: &Operand<'_>) -> Expr {
    let not = if negate { "NOT " } else { "" };
    let mut params = left.params.to_vec();
    if right.params.is_empty() {
        // the right side is a column, wrap it for a "contains" match
        Expr::with_params(
            format!("{} {not}LIKE ('%' || {} || '%') ESCAPE '\\'", left.identifier, right.identifier),
            params,
        )
    } else {
        params.extend(wrap_like_params(right.params));
        Expr::with_params(
            format!("{} {not}LIKE {} ESCAPE '\\'", left.identifier, right.identifier),
            params,
        )
    }
}

/// Plain (single-valued) comparison of two operands.
fn compare(left: &Operand<'_>, op: SignOp, right: &Operand<'_>) -> Expr {
    let simple = |sign: &str| {
        Expr::with_params(
            format!("{} {sign} {}", left.identifier, right.identifier),
            left.params.iter().chain(right.params).cloned().collect(),
        )
    };
    match op.base() {
        SignOp::Eq => equal_expr(true, left, right),
        SignOp::Neq => equal_expr(false, left, right),
        SignOp::Like => like_expr(false, left, right),
        SignOp::Nlike => like_expr(true, left, right),
        SignOp::Lt => simple("<"),
        SignOp::Lte => simple("<="),
        SignOp::Gt => simple(">"),
        SignOp::Gte => simple(">="),
        _ => simple("="),
    }
}

const MM_VALUE: &str = "`multiMatchValue`";

/// Wraps `cmp` (built against the subquery aliases) into an existential or
/// universal check over the multi-match subqueries.
fn multi_match_expr(sources: &[(&MultiMatchSubquery, String)], op: SignOp, cmp: Expr, universal: bool, negated_cmp: Option<Expr>) -> Expr {
    let from = sources
        .iter()
        .map(|(sub, alias)| format!("({}) `{alias}`", sub.build()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Params = sources.iter().flat_map(|(sub, _)| sub.all_params()).collect();

    let sql = if universal {
        format!(
            "(EXISTS (SELECT 1 FROM {from}) AND NOT EXISTS (SELECT 1 FROM {from} WHERE NOT COALESCE(({}), 0)))",
            cmp.sql
        )
    } else if op.is_any() || !op.is_negative() {
        format!("EXISTS (SELECT 1 FROM {from} WHERE {})", cmp.sql)
    } else {
        let positive = negated_cmp.as_ref().map_or(cmp.sql.as_str(), |e| e.sql.as_str());
        format!("NOT EXISTS (SELECT 1 FROM {from} WHERE {positive})")
    };

    match negated_cmp {
        Some(positive) if !universal && !op.is_any() && op.is_negative() => params.extend(positive.params),
        _ => params.extend(cmp.params),
    }
    Expr::with_params(sql, params)
}

/// Combines two resolved operands with `op`, honoring multi-valued operands.
fn build_resolvers_expr(left: &ResolverResult, op: SignOp, right: &ResolverResult) -> Expr {
    let left_alias = format!("__mml{}", random_string_with_alphabet(5, LOWER_ALPHANUM));
    let right_alias = format!("__mmr{}", random_string_with_alphabet(5, LOWER_ALPHANUM));
    let left_mm_value = format!("`{left_alias}`.{MM_VALUE}");
    let right_mm_value = format!("`{right_alias}`.{MM_VALUE}");
    let no_params: Params = Params::new();

    let left_mm = left.multi_match.as_ref();
    let right_mm = right.multi_match.as_ref();

    let l = match left_mm {
        Some(_) => Operand { identifier: &left_mm_value, no_coalesce: left.no_coalesce, params: &no_params },
        None => Operand::from_result(left),
    };
    let r = match right_mm {
        Some(_) => Operand { identifier: &right_mm_value, no_coalesce: right.no_coalesce, params: &no_params },
        None => Operand::from_result(right),
    };

    let mut sources = Vec::new();
    if let Some(mm) = left_mm {
        sources.push((mm, left_alias.clone()));
    }
    if let Some(mm) = right_mm {
        sources.push((mm, right_alias.clone()));
    }

    let mut expr = if sources.is_empty() {
        compare(&l, op, &r)
    } else {
        let universal = sources.iter().any(|(mm, _)| mm.universal);
        let cmp = compare(&l, if universal { op.base() } else { op }, &r);
        let positive = (!universal && !op.is_any() && op.is_negative()).then(|| compare(&l, op.positive(), &r));
        multi_match_expr(&sources, op, cmp, universal, positive)
    };

    for condition in [&left.extra_condition, &right.extra_condition].into_iter().flatten() {
        expr.sql = format!("({}) AND ({condition})", expr.sql);
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SimpleFieldResolver;

    fn build(filter: &str) -> CoreResult<Expr> {
        let mut resolver = SimpleFieldResolver::new(&["id", "title", "count", r"^data\.[\w\.]+$"]);
        FilterData::new(filter).build_expr(&mut resolver)
    }

    fn param_names(expr: &Expr) -> Vec<&str> {
        expr.params.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_equality_against_text_param() {
        let expr = build("title = 'abc'").unwrap();
        let key = param_names(&expr)[0].to_string();
        assert_eq!(expr.sql, format!("(`title` = :{key})"));
        assert_eq!(expr.params[0].1, SqlValue::Text("abc".into()));
    }

    #[test]
    fn test_equality_against_empty_and_null() {
        assert_eq!(build("title = ''").unwrap().sql, "((`title` = '' OR `title` IS NULL))");
        assert_eq!(build("title != null").unwrap().sql, "((`title` IS NOT '' AND `title` IS NOT NULL))");
        assert!(build("title = ''").unwrap().params.is_empty());
        assert_eq!(build("null = ''").unwrap().sql, "('' = '')");
        assert_eq!(build("title = id").unwrap().sql, "(COALESCE(`title`, '') = COALESCE(`id`, ''))");
    }

    #[test]
    fn test_like_wrapping() {
        let expr = build("title ~ 'a_b%'").unwrap();
        assert!(expr.sql.contains("LIKE :"));
        assert_eq!(expr.params[0].1, SqlValue::Text("a_b%".into()));

        let expr = build("title !~ 'a_b'").unwrap();
        assert!(expr.sql.contains("NOT LIKE"));
        assert_eq!(expr.params[0].1, SqlValue::Text("%a\\_b%".into()));

        let expr = build("title ~ id").unwrap();
        assert_eq!(expr.sql, "(`title` LIKE ('%' || `id` || '%') ESCAPE '\\')");
    }

    #[test]
    fn test_groups_and_joins() {
        let expr = build("count > 1 && (title = 'a' || title = 'b')").unwrap();
        assert!(expr.sql.starts_with("(`count` > :"));
        assert!(expr.sql.contains(" AND ((`title` = :"));
        assert!(expr.sql.contains(") OR (`title` = :"));
        assert_eq!(expr.params.len(), 3);
        assert_eq!(expr.params[0].1, SqlValue::Integer(1));
    }

    #[test]
    fn test_json_path_is_not_coalesced() {
        let expr = build("data.a.0 = 5").unwrap();
        assert!(expr.sql.starts_with("(JSON_EXTRACT(`data`, '$.a[0]') IS :"));
    }

    #[test]
    fn test_unknown_field_and_literals() {
        assert!(build("missing = 1").is_err());
        assert_eq!(build("true = false").unwrap().sql, "(1 = 0)");
    }

    #[test]
    fn test_limits() {
        let mut resolver = SimpleFieldResolver::new(&["title"]);
        let limits = FilterSettings { max_expressions: 2, max_length: 100 };
        let filter = FilterData::new("title = 1 && title = 2 && title = 3");
        assert!(filter.build_expr_with(&mut resolver, &limits).is_err());
        let long = FilterData::new(format!("title = '{}'", "a".repeat(200)));
        assert!(long.build_expr_with(&mut resolver, &limits).is_err());
    }

    #[test]
    fn test_macros_and_geo_distance() {
        let expr = build("title > @now").unwrap();
        assert_eq!(expr.params.len(), 1);

        let expr = build("geoDistance(count, count, 1, 2) < 10").unwrap();
        assert!(expr.sql.contains("6371 * acos("));
        assert_eq!(expr.params.len(), 3);
    }

    #[test]
    fn test_with_params() {
        let mut params = Map::new();
        params.insert("name".into(), Value::from("it's"));
        params.insert("n".into(), Value::from(3));
        let filter = FilterData::with_params("title = {:name} && count > {:n}", &params);
        assert_eq!(filter.as_str(), "title = 'it\\'s' && count > 3");
    }
}
