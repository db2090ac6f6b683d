//! Single identifier resolution: walks the dotted path one segment at a time,
//! registering joins on the main query and their mirrors on the multi-match subquery.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::{MAX_RELATION_DEPTH, RecordFieldResolver};
use crate::collection::Collection;
use crate::db::Params;
use crate::errors::{CoreError, CoreResult};
use crate::fields::{
    FIELD_NAME_COLLECTION_ID, FIELD_NAME_COLLECTION_NAME, FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_ID,
    Field,
};
use crate::search::{Join, MultiMatchSubquery, ResolverResult, placeholder, register_join};
use crate::tools::dbutils::{json_array_length, json_each, json_extract, quote_column};
use crate::tools::index::find_single_column_unique_index;
use crate::tools::inflector::columnify;
use crate::tools::list::to_unique_string_vec;

static BACK_RELATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)_via_(\w+)$").expect("back relation pattern is valid"));

const MODIFIER_EACH: &str = "each";
const MODIFIER_ISSET: &str = "isset";
const MODIFIER_LENGTH: &str = "length";
const MODIFIER_LOWER: &str = "lower";

fn split_modifier(prop: &str) -> (String, Option<String>) {
    match prop.split_once(':') {
        Some((name, modifier)) => (name.to_string(), Some(modifier.to_string())),
        None => (prop.to_string(), None),
    }
}

fn column(alias: &str, name: &str) -> String {
    quote_column(&format!("{alias}.{name}"))
}

fn is_index(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

/// Request value bound as a statement parameter. `None` stands for SQL `NULL`.
fn static_sql_value(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        other => Some(SqlValue::Text(other.to_string())),
    }
}

fn number_from_str(raw: &str) -> SqlValue {
    let number = raw.trim().parse::<f64>().unwrap_or_default();
    if number.fract() == 0.0 && number.abs() < 9e15 {
        SqlValue::Integer(number as i64)
    } else {
        SqlValue::Real(number)
    }
}

fn lookup<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) if is_index(key) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn modifier_error(modifier: &str, message: &str) -> CoreError {
    CoreError::filter(format!("invalid :{modifier} modifier - {message}"))
}

pub(super) struct Runner<'r, 'a> {
    resolver: &'r mut RecordFieldResolver<'a>,
    field: String,
    active_props: Vec<String>,
    active_collection: Arc<Collection>,
    active_table_alias: String,
    mm_active_table_alias: String,
    multi_match: MultiMatchSubquery,
    with_multi_match: bool,
    /// Joins are registered only on the multi-match subquery (`@request.*:each`).
    mm_only: bool,
    /// `@collection.*` paths compare against the main query join so that
    /// conditions sharing an alias address the same joined row.
    any_of: bool,
    allow_hidden_fields: bool,
    hops: usize,
}

impl<'r, 'a> Runner<'r, 'a> {
    pub(super) fn new(resolver: &'r mut RecordFieldResolver<'a>, field: &str) -> Self {
        let base_alias = resolver.base_alias();
        let mm_alias = format!("__mm_{base_alias}");
        Self {
            field: field.to_string(),
            active_props: field.split('.').map(str::to_string).collect(),
            active_collection: Arc::clone(&resolver.base),
            active_table_alias: base_alias.clone(),
            mm_active_table_alias: mm_alias.clone(),
            multi_match: MultiMatchSubquery {
                base_table_alias: base_alias,
                from_table_name: resolver.base.name.clone(),
                from_table_alias: mm_alias,
                ..MultiMatchSubquery::default()
            },
            with_multi_match: false,
            mm_only: false,
            any_of: false,
            allow_hidden_fields: resolver.allow_hidden_fields,
            hops: 0,
            resolver,
        }
    }

    pub(super) fn run(self) -> CoreResult<ResolverResult> {
        match self.active_props.first().map(String::as_str) {
            Some("@collection") => self.process_collection(),
            Some("@request") => {
                let field = self.field.clone();
                self.process_request().or_else(|err| {
                    log::debug!("unresolved request field {field:?} nullified: {err}");
                    Ok(ResolverResult::identifier("NULL"))
                })
            }
            Some(_) => self.process_active_props(),
            None => Err(CoreError::filter("empty field identifier")),
        }
    }

    fn join_main(&mut self, join: Join) {
        if !self.mm_only {
            self.resolver.register_join(join);
        }
    }

    fn join_mm(&mut self, join: Join) {
        register_join(&mut self.multi_match.joins, join);
    }

    fn activate(&mut self, collection: Arc<Collection>, alias: String, mm_alias: String) {
        self.active_collection = collection;
        self.active_table_alias = alias;
        self.mm_active_table_alias = mm_alias;
    }

    fn uses_multi_match(&self) -> bool {
        self.with_multi_match && (!self.any_of || self.multi_match.universal)
    }

    fn next_hop(&mut self) -> CoreResult<()> {
        self.hops += 1;
        if self.hops > MAX_RELATION_DEPTH {
            return Err(CoreError::filter(format!(
                "max nested relations reached for {:?} (max {MAX_RELATION_DEPTH})",
                self.field
            )));
        }
        Ok(())
    }

    fn finalize(
        mut self,
        identifier: String,
        mm_identifier: String,
        no_coalesce: bool,
        params: Params,
        extra_condition: Option<String>,
    ) -> ResolverResult {
        let mut result = ResolverResult {
            identifier,
            no_coalesce,
            params,
            multi_match: None,
            extra_condition,
        };
        if self.uses_multi_match() {
            self.multi_match.value_identifier = mm_identifier;
            self.multi_match.params.extend(result.params.iter().cloned());
            if self.mm_only {
                result.identifier = "NULL".to_string();
                result.params.clear();
            }
            result.multi_match = Some(self.multi_match);
        }
        result
    }

    // @collection.name[:alias].field...
    fn process_collection(mut self) -> CoreResult<ResolverResult> {
        if self.active_props.len() < 3 {
            return Err(CoreError::filter(format!("invalid @collection field path {:?}", self.field)));
        }
        let (name, alias) = split_modifier(&self.active_props[1]);
        let collection = self
            .resolver
            .load_collection(&name)
            .map_err(|_| CoreError::filter(format!("unknown collection {name:?} in {:?}", self.field)))?;

        let clean = match alias {
            Some(alias) => columnify(&format!("__collection_{name}_{alias}")),
            None => columnify(&format!("__collection_{name}")),
        };
        let mm_alias = format!("__mm_{clean}");

        // any row of the other collection may satisfy the condition
        self.with_multi_match = true;
        self.any_of = true;
        self.join_main(Join::new(collection.name.clone(), clean.clone()));
        self.join_mm(Join::new(collection.name.clone(), mm_alias.clone()));
        self.activate(collection, clean, mm_alias);
        self.active_props.drain(..2);
        self.process_active_props()
    }

    fn process_request(self) -> CoreResult<ResolverResult> {
        let props = self.active_props.clone();
        match props.get(1).map(String::as_str) {
            Some("auth") => self.process_request_auth(),
            Some("body") if props.len() > 3 => self.process_request_body(),
            _ => self.resolve_static(&props[1..]),
        }
    }

    // @request.auth.field...
    fn process_request_auth(mut self) -> CoreResult<ResolverResult> {
        let Some(auth) = self.resolver.request_info.and_then(|info| info.auth.as_ref()) else {
            return Ok(ResolverResult::identifier("NULL"));
        };

        let props = self.active_props.clone();
        if props.len() == 3 {
            return self.resolve_static(&props[1..]);
        }

        let (first, modifier) = split_modifier(&props[2]);
        let auth_collection = self.resolver.load_collection(&auth.collection().id)?;
        let is_relation = matches!(auth_collection.fields.get_by_name(&first), Some(Field::Relation(_)));
        if !is_relation || modifier.is_some() {
            return self.resolve_static(&props[1..]);
        }

        let alias = format!("__auth_{}", columnify(&auth_collection.name));
        let mm_alias = format!("__mm_{alias}");
        let key = placeholder("auth");
        let params = vec![(key.clone(), SqlValue::Text(auth.id()))];

        self.join_main(
            Join::new(auth_collection.name.clone(), alias.clone())
                .on(format!("{} = :{key}", column(&alias, FIELD_NAME_ID)))
                .params(params.clone()),
        );
        self.join_mm(
            Join::new(auth_collection.name.clone(), mm_alias.clone())
                .on(format!("{} = :{key}", column(&mm_alias, FIELD_NAME_ID)))
                .params(params),
        );

        self.activate(auth_collection, alias, mm_alias);
        self.active_props.drain(..2);
        self.process_active_props()
    }

    // @request.body.relField.field...
    fn process_request_body(mut self) -> CoreResult<ResolverResult> {
        let props = self.active_props.clone();
        let (name, modifier) = split_modifier(&props[2]);
        let relation = match self.resolver.base.fields.get_by_name(&name) {
            Some(field @ Field::Relation(rel)) if modifier.is_none() => Some((field.is_multiple(), rel.collection_id.clone())),
            _ => None,
        };
        let Some((multiple, collection_id)) = relation else {
            return self.resolve_static(&props[1..]);
        };

        let Some(info) = self.resolver.request_info else {
            return Ok(ResolverResult::identifier("NULL"));
        };
        let ids = to_unique_string_vec(info.body.get(&name).unwrap_or(&Value::Null));
        let collection = self.resolver.load_collection(&collection_id)?;

        let alias = columnify(&format!("__data_{}_{name}", collection.name));
        let mm_alias = format!("__mm_{alias}");
        let key = placeholder("ids");
        let params = vec![(key.clone(), SqlValue::Text(Value::from(ids).to_string()))];
        let on = |a: &str| format!("{} IN (SELECT `value` FROM json_each(:{key}))", column(a, FIELD_NAME_ID));

        self.join_main(Join::new(collection.name.clone(), alias.clone()).on(on(&alias)).params(params.clone()));
        self.join_mm(Join::new(collection.name.clone(), mm_alias.clone()).on(on(&mm_alias)).params(params));

        if multiple {
            self.with_multi_match = true;
        }
        self.activate(collection, alias, mm_alias);
        self.active_props.drain(..3);
        self.process_active_props()
    }

    /// Resolves a request path (`body.title`, `headers.x_token`, ...) against the static request data.
    fn resolve_static(mut self, path: &[String]) -> CoreResult<ResolverResult> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(ResolverResult::identifier("NULL"));
        };
        let (last_name, modifier) = split_modifier(last);

        let mut current = self.resolver.static_request_data.get(parents.first().unwrap_or(&last_name).as_str());
        if !parents.is_empty() {
            for part in parents.iter().skip(1).chain(std::iter::once(&last_name)) {
                current = current.and_then(|value| lookup(value, part));
            }
        }
        let value = current.cloned();

        match modifier.as_deref() {
            Some(MODIFIER_ISSET) => {
                return Ok(ResolverResult::identifier(if value.is_some() { "TRUE" } else { "FALSE" }));
            }
            Some(MODIFIER_LENGTH) => {
                let length = match &value {
                    Some(Value::Array(items)) => items.len(),
                    None | Some(Value::Null) => 0,
                    Some(_) => 1,
                };
                return Ok(ResolverResult::identifier(length.to_string()));
            }
            Some(MODIFIER_EACH) => {
                let items = match value {
                    Some(Value::Array(items)) => items,
                    None | Some(Value::Null) => Vec::new(),
                    Some(other) => vec![other],
                };
                let key = placeholder("each");
                let je_alias = columnify(&format!("__data_each_{last_name}_je"));
                self.join_mm(
                    Join::new(format!("json_each(:{key})"), je_alias.clone())
                        .params(vec![(key, SqlValue::Text(Value::Array(items).to_string()))]),
                );
                self.with_multi_match = true;
                self.mm_only = true;
                self.multi_match.universal = true;
                let mm_identifier = column(&je_alias, "value");
                return Ok(self.finalize(String::new(), mm_identifier, false, Params::new(), None));
            }
            Some(MODIFIER_LOWER) | None => {}
            Some(other) => return Err(modifier_error(other, "unsupported for request fields")),
        }

        let is_body_field = path.len() == 2 && path[0] == "body";
        let sql_value = match value.as_ref() {
            Some(Value::String(raw))
                if is_body_field
                    && matches!(self.resolver.base.fields.get_by_name(&last_name), Some(Field::Number(_))) =>
            {
                Some(number_from_str(raw))
            }
            Some(value) => static_sql_value(value),
            None => None,
        };

        let Some(sql_value) = sql_value else {
            return Ok(ResolverResult::identifier("NULL"));
        };
        let key = placeholder("r");
        let identifier = if modifier.as_deref() == Some(MODIFIER_LOWER) {
            format!("LOWER(:{key})")
        } else {
            format!(":{key}")
        };
        Ok(ResolverResult {
            identifier,
            params: vec![(key, sql_value)],
            ..ResolverResult::default()
        })
    }

    fn process_active_props(mut self) -> CoreResult<ResolverResult> {
        let total = self.active_props.len();
        let mut i = 0;
        while i < total {
            let (prop, modifier) = split_modifier(&self.active_props[i]);
            let is_last = i == total - 1;
            let collection = Arc::clone(&self.active_collection);

            if prop == FIELD_NAME_COLLECTION_ID || prop == FIELD_NAME_COLLECTION_NAME {
                if !is_last || modifier.is_some() {
                    return Err(CoreError::filter(format!("invalid {prop} path in {:?}", self.field)));
                }
                let value = if prop == FIELD_NAME_COLLECTION_ID { &collection.id } else { &collection.name };
                let key = placeholder("c");
                let identifier = format!(":{key}");
                let params = vec![(key, SqlValue::Text(value.clone()))];
                return Ok(self.finalize(identifier.clone(), identifier, false, params, None));
            }

            let Some(field) = collection.fields.get_by_name(&prop) else {
                let Some(caps) = BACK_RELATION_RE.captures(&prop) else {
                    return Err(CoreError::filter(format!(
                        "unknown field {prop:?} in collection {:?}",
                        collection.name
                    )));
                };
                if modifier.is_some() {
                    return Err(modifier_error(modifier.as_deref().unwrap_or_default(), "not supported on back relations"));
                }
                self.join_back_relation(&caps[1], &caps[2])?;
                if is_last {
                    // a bare back relation compares the related record ids
                    let id = column(&self.active_table_alias, FIELD_NAME_ID);
                    let mm_id = column(&self.mm_active_table_alias, FIELD_NAME_ID);
                    return Ok(self.finalize(id, mm_id, false, Params::new(), None));
                }
                i += 1;
                continue;
            };

            if field.is_hidden() && !self.allow_hidden_fields {
                return Err(CoreError::filter(format!("field {prop:?} is hidden")));
            }

            if matches!(field, Field::Json(_) | Field::GeoPoint(_)) {
                let rest = self.active_props[i + 1..].to_vec();
                return self.finalize_json(field, modifier, &rest);
            }

            if is_last {
                return self.finalize_field(&collection, field, modifier);
            }

            let Field::Relation(relation) = field else {
                return Err(CoreError::filter(format!("field {prop:?} is not a relation")));
            };
            if modifier.is_some() {
                return Err(CoreError::filter(format!("modifiers are allowed only on the last segment of {:?}", self.field)));
            }
            self.next_hop()?;
            let related = self.resolver.load_collection(&relation.collection_id)?;

            // `rel.id` of a single relation is the relation column itself
            if !field.is_multiple() && i == total - 2 {
                let (next, next_modifier) = split_modifier(&self.active_props[i + 1]);
                if next == FIELD_NAME_ID && next_modifier.as_deref().is_none_or(|m| m == MODIFIER_LOWER) {
                    let mut identifier = column(&self.active_table_alias, &prop);
                    let mut mm_identifier = column(&self.mm_active_table_alias, &prop);
                    if next_modifier.is_some() {
                        identifier = format!("LOWER({identifier})");
                        mm_identifier = format!("LOWER({mm_identifier})");
                    }
                    return Ok(self.finalize(identifier, mm_identifier, false, Params::new(), None));
                }
            }

            self.join_relation(&prop, field.is_multiple(), related);
            i += 1;
        }

        Err(CoreError::filter(format!("failed to resolve field {:?}", self.field)))
    }

    fn join_relation(&mut self, prop: &str, multiple: bool, related: Arc<Collection>) {
        let clean = columnify(prop);
        let alias = format!("{}_{clean}", self.active_table_alias);
        let mm_alias = format!("{}_{clean}", self.mm_active_table_alias);

        if multiple {
            let je = format!("{alias}_je");
            let mm_je = format!("{mm_alias}_je");
            self.join_main(Join::new(json_each(&format!("{}.{prop}", self.active_table_alias)), je.clone()));
            self.join_main(
                Join::new(related.name.clone(), alias.clone())
                    .on(format!("{} = {}", column(&alias, FIELD_NAME_ID), column(&je, "value"))),
            );
            self.join_mm(Join::new(json_each(&format!("{}.{prop}", self.mm_active_table_alias)), mm_je.clone()));
            self.join_mm(
                Join::new(related.name.clone(), mm_alias.clone())
                    .on(format!("{} = {}", column(&mm_alias, FIELD_NAME_ID), column(&mm_je, "value"))),
            );
            self.with_multi_match = true;
        } else {
            self.join_main(
                Join::new(related.name.clone(), alias.clone())
                    .on(format!("{} = {}", column(&alias, FIELD_NAME_ID), column(&self.active_table_alias, prop))),
            );
            self.join_mm(
                Join::new(related.name.clone(), mm_alias.clone())
                    .on(format!("{} = {}", column(&mm_alias, FIELD_NAME_ID), column(&self.mm_active_table_alias, prop))),
            );
        }

        self.activate(related, alias, mm_alias);
    }

    // <collection>_via_<relationField>
    fn join_back_relation(&mut self, collection_name: &str, field_name: &str) -> CoreResult<()> {
        let back_collection = self.resolver.load_collection(collection_name).map_err(|_| {
            CoreError::filter(format!("unknown back relation collection {collection_name:?}"))
        })?;
        let Some(back_field @ Field::Relation(relation)) = back_collection.fields.get_by_name(field_name) else {
            return Err(CoreError::filter(format!("invalid back relation field {collection_name}.{field_name}")));
        };
        if relation.collection_id != self.active_collection.id {
            return Err(CoreError::filter(format!(
                "back relation field {collection_name}.{field_name} doesn't reference collection {:?}",
                self.active_collection.name
            )));
        }
        if back_field.is_hidden() && !self.allow_hidden_fields {
            return Err(CoreError::filter(format!("field {field_name:?} is hidden")));
        }
        self.next_hop()?;

        let clean = columnify(&format!("{collection_name}_via_{field_name}"));
        let alias = format!("{}_{clean}", self.active_table_alias);
        let mm_alias = format!("{}_{clean}", self.mm_active_table_alias);

        let (on, mm_on, multi) = if back_field.is_multiple() {
            let on = |joined: &str, active: &str| {
                format!(
                    "EXISTS (SELECT 1 FROM {} `__je` WHERE `__je`.`value` = {})",
                    json_each(&format!("{joined}.{field_name}")),
                    column(active, FIELD_NAME_ID)
                )
            };
            (on(&alias, &self.active_table_alias), on(&mm_alias, &self.mm_active_table_alias), true)
        } else {
            // without a unique index several records may point back to the same one
            let multi = find_single_column_unique_index(&back_collection.indexes, field_name).is_none();
            (
                format!("{} = {}", column(&alias, field_name), column(&self.active_table_alias, FIELD_NAME_ID)),
                format!("{} = {}", column(&mm_alias, field_name), column(&self.mm_active_table_alias, FIELD_NAME_ID)),
                multi,
            )
        };

        self.join_main(Join::new(back_collection.name.clone(), alias.clone()).on(on));
        self.join_mm(Join::new(back_collection.name.clone(), mm_alias.clone()).on(mm_on));
        if multi {
            self.with_multi_match = true;
        }
        self.activate(Arc::clone(&back_collection), alias, mm_alias);
        Ok(())
    }

    /// Last segment on a regular field.
    fn finalize_field(mut self, collection: &Collection, field: &Field, modifier: Option<String>) -> CoreResult<ResolverResult> {
        let name = field.name();
        let identifier = column(&self.active_table_alias, name);
        let mm_identifier = column(&self.mm_active_table_alias, name);

        // the auth email matches only when it is public
        let mut extra_condition = None;
        if collection.is_auth() && name == FIELD_NAME_EMAIL && !self.allow_hidden_fields {
            if self.uses_multi_match() {
                let condition = format!("{} = TRUE", column(&self.mm_active_table_alias, FIELD_NAME_EMAIL_VISIBILITY));
                self.multi_match.wheres.push(condition);
            } else {
                extra_condition =
                    Some(format!("{} = TRUE", column(&self.active_table_alias, FIELD_NAME_EMAIL_VISIBILITY)));
            }
        }

        match modifier.as_deref() {
            Some(MODIFIER_ISSET) => Err(modifier_error(MODIFIER_ISSET, "available only for @request.* fields")),
            Some(MODIFIER_LENGTH) => {
                if !field.is_multi_valuer() {
                    return Err(modifier_error(MODIFIER_LENGTH, "the field doesn't support multiple values"));
                }
                let identifier = json_array_length(&format!("{}.{name}", self.active_table_alias));
                let mm_identifier = json_array_length(&format!("{}.{name}", self.mm_active_table_alias));
                Ok(self.finalize(identifier, mm_identifier, false, Params::new(), extra_condition))
            }
            Some(MODIFIER_EACH) | Some(MODIFIER_LOWER) | None if field.is_multiple() => {
                let clean = columnify(name);
                let je = format!("{}_{clean}_je", self.active_table_alias);
                let mm_je = format!("{}_{clean}_je", self.mm_active_table_alias);
                self.join_main(Join::new(json_each(&format!("{}.{name}", self.active_table_alias)), je.clone()));
                self.join_mm(Join::new(json_each(&format!("{}.{name}", self.mm_active_table_alias)), mm_je.clone()));
                self.with_multi_match = true;
                if modifier.as_deref() == Some(MODIFIER_EACH) {
                    self.multi_match.universal = true;
                }

                let mut identifier = column(&je, "value");
                let mut mm_identifier = column(&mm_je, "value");
                if modifier.as_deref() == Some(MODIFIER_LOWER) {
                    identifier = format!("LOWER({identifier})");
                    mm_identifier = format!("LOWER({mm_identifier})");
                }
                Ok(self.finalize(identifier, mm_identifier, false, Params::new(), extra_condition))
            }
            Some(MODIFIER_EACH) => Err(modifier_error(MODIFIER_EACH, "the field doesn't support multiple values")),
            Some(MODIFIER_LOWER) => Ok(self.finalize(
                format!("LOWER({identifier})"),
                format!("LOWER({mm_identifier})"),
                false,
                Params::new(),
                extra_condition,
            )),
            None => Ok(self.finalize(identifier, mm_identifier, false, Params::new(), extra_condition)),
            Some(other) => Err(CoreError::filter(format!("unknown modifier :{other}"))),
        }
    }

    /// JSON and geo point fields consume the remaining segments as a JSON path.
    fn finalize_json(self, field: &Field, modifier: Option<String>, rest: &[String]) -> CoreResult<ResolverResult> {
        if modifier.is_some() && !rest.is_empty() {
            return Err(CoreError::filter(format!("modifiers are allowed only on the last segment of {:?}", self.field)));
        }

        let mut modifier = modifier;
        let mut path = String::new();
        for (j, part) in rest.iter().enumerate() {
            let (name, part_modifier) = split_modifier(part);
            if part_modifier.is_some() {
                if j != rest.len() - 1 {
                    return Err(CoreError::filter(format!(
                        "modifiers are allowed only on the last segment of {:?}",
                        self.field
                    )));
                }
                modifier = part_modifier;
            }
            if is_index(&name) {
                path.push_str(&format!("[{name}]"));
            } else {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&name);
            }
        }

        let name = field.name();
        let mut identifier = json_extract(&format!("{}.{name}", self.active_table_alias), &path);
        let mut mm_identifier = json_extract(&format!("{}.{name}", self.mm_active_table_alias), &path);
        match modifier.as_deref() {
            None => {}
            Some(MODIFIER_LOWER) => {
                identifier = format!("LOWER({identifier})");
                mm_identifier = format!("LOWER({mm_identifier})");
            }
            Some(MODIFIER_LENGTH) => {
                identifier = format!("json_array_length({identifier})");
                mm_identifier = format!("json_array_length({mm_identifier})");
            }
            Some(other) => return Err(modifier_error(other, "unsupported for json fields")),
        }
        Ok(self.finalize(identifier, mm_identifier, true, Params::new(), None))
    }
}
