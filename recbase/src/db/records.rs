//! Record persistence: lookups, interceptor driven save and cascading delete.

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use super::Db;
use crate::collection::Collection;
use crate::errors::{CoreError, CoreResult, ValidationError};
use crate::fields::{Field, InterceptAction, InterceptEnv, RelationField, ValueContext};
use crate::filesystem::{Filesystem, OpContext};
use crate::record::Record;
use crate::resolver::{RecordFieldResolver, RequestInfo};
use crate::search::{FieldResolver, FilterData, SearchProvider, SearchQuery, SearchResult, parse_sort};
use crate::tools::dbutils::{json_each, quote_table};
use crate::tools::list::{subtract, to_unique_string_vec};

/// A relation field that has to be updated when a referenced record is deleted.
#[derive(Debug, Clone)]
pub struct CascadeTarget {
    pub collection: Arc<Collection>,
    pub field: RelationField,
}

/// Runs `action` wrapped by the interceptors of every field, first field outermost.
fn run_interceptors(
    env: &InterceptEnv<'_>,
    fields: &[Field],
    record: &mut Record,
    action: InterceptAction,
    last: &mut dyn FnMut(&mut Record) -> CoreResult<()>,
) -> CoreResult<()> {
    match fields.split_first() {
        None => last(record),
        Some((field, rest)) => field.intercept(env, record, action, &mut |r: &mut Record| {
            run_interceptors(env, rest, r, action, &mut *last)
        }),
    }
}

fn ids_param(ids: &[String]) -> (String, SqlValue) {
    ("ids".to_string(), SqlValue::Text(Value::from(ids.to_vec()).to_string()))
}

impl Db {
    pub fn find_record_by_id(&self, collection_name_or_id: &str, id: &str) -> CoreResult<Option<Record>> {
        let collection = Arc::new(self.require_collection(collection_name_or_id)?);
        let rows = self.query_maps(
            &format!("SELECT * FROM {} WHERE `id` = :id LIMIT 1", quote_table(collection.table_name())),
            &[("id".into(), SqlValue::Text(id.to_string()))],
        )?;
        Ok(rows.into_iter().next().map(|row| Record::load(collection, row)))
    }

    pub fn find_records_by_ids(&self, collection_name_or_id: &str, ids: &[String]) -> CoreResult<Vec<Record>> {
        let collection = Arc::new(self.require_collection(collection_name_or_id)?);
        let rows = self.query_maps(
            &format!(
                "SELECT * FROM {} WHERE `id` IN (SELECT `value` FROM json_each(:ids))",
                quote_table(collection.table_name())
            ),
            &[ids_param(ids)],
        )?;
        Ok(rows.into_iter().map(|row| Record::load(Arc::clone(&collection), row)).collect())
    }

    /// Number of distinct existing records among `ids`.
    pub fn count_records_by_ids(&self, table: &str, ids: &[String]) -> CoreResult<usize> {
        let count = self.query_count(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE `id` IN (SELECT `value` FROM json_each(:ids))",
                quote_table(table)
            ),
            &[ids_param(ids)],
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Validates the prepared record values, collecting one issue per field.
    pub fn validate_record(&self, record: &Record) -> CoreResult<()> {
        let ctx = ValueContext { db: self, record };
        let mut errors = ValidationError::default();
        for field in record.collection().fields.iter() {
            if let Err(mut issue) = field.validate_value(&ctx) {
                issue.field = field.name().to_string();
                errors.issues.push(issue);
            }
        }
        errors.into_result().map_err(CoreError::from)
    }

    /// Prepares, validates and persists `record`.
    ///
    /// The table write runs in its own transaction wrapped by the field
    /// interceptors; file uploads therefore happen outside of it and are
    /// cleaned up by the file fields when the write fails.
    pub fn save_record(&self, fs: &dyn Filesystem, ctx: &OpContext, record: &mut Record) -> CoreResult<()> {
        let collection = record.collection_arc();
        if collection.is_view() {
            return Err(CoreError::invalid(format!("view collection {:?} records are read-only", collection.name)));
        }

        let prepared: Vec<(String, Value)> = record
            .prepared_values()
            .into_iter()
            .map(|(field, value)| (field.name().to_string(), value))
            .collect();
        for (name, value) in prepared {
            record.set_raw(&name, value);
        }

        let env = InterceptEnv { db: self, fs, ctx };
        let fields = collection.fields.as_slice();

        run_interceptors(&env, fields, record, InterceptAction::Validate, &mut |r: &mut Record| {
            self.validate_record(r)
        })?;

        let action = if record.is_new() { InterceptAction::Create } else { InterceptAction::Update };
        run_interceptors(&env, fields, record, action, &mut |r: &mut Record| {
            self.run_in_transaction(|db| db.write_record(r))
        })?;

        record.mark_as_saved();
        Ok(())
    }

    fn write_record(&self, record: &Record) -> CoreResult<()> {
        let table = quote_table(record.table_name());
        let mut params: Vec<(String, SqlValue)> = Vec::new();
        let mut columns = Vec::new();
        for (i, (field, value)) in record.prepared_values().into_iter().enumerate() {
            columns.push((field.name().to_string(), format!("c{i}")));
            params.push((format!("c{i}"), field.driver_value(&value)));
        }

        let sql = if record.is_new() {
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.iter().map(|(c, _)| format!("`{c}`")).collect::<Vec<_>>().join(", "),
                columns.iter().map(|(_, p)| format!(":{p}")).collect::<Vec<_>>().join(", ")
            )
        } else {
            let original_id = record.original().get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            params.push(("original_id".into(), SqlValue::Text(original_id)));
            format!(
                "UPDATE {table} SET {} WHERE `id` = :original_id",
                columns.iter().map(|(c, p)| format!("`{c}` = :{p}")).collect::<Vec<_>>().join(", ")
            )
        };

        let affected = self.exec_with(&sql, &params)?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("record {:?}", record.id())));
        }
        Ok(())
    }

    /// Deletes `record`, cascading over the relation fields that reference it.
    ///
    /// After a successful delete the files of every removed record are deleted
    /// best-effort.
    pub fn delete_record(&self, fs: &dyn Filesystem, ctx: &OpContext, record: &Record) -> CoreResult<()> {
        let collection = record.collection_arc();
        if collection.is_view() {
            return Err(CoreError::invalid(format!("view collection {:?} records are read-only", collection.name)));
        }

        let env = InterceptEnv { db: self, fs, ctx };
        let mut removed_prefixes = Vec::new();
        let mut target = record.clone();
        run_interceptors(&env, collection.fields.as_slice(), &mut target, InterceptAction::Delete, &mut |r: &mut Record| {
            self.run_in_transaction(|db| db.delete_cascade(r, 0, &mut removed_prefixes))
        })?;

        let cleanup_ctx = ctx.for_cleanup();
        for prefix in removed_prefixes {
            for err in fs.delete_prefix(&cleanup_ctx, &prefix) {
                log::warn!("failed to delete files of {prefix}: {err}");
            }
        }
        Ok(())
    }

    fn cascade_targets(&self, collection_id: &str) -> CoreResult<Vec<CascadeTarget>> {
        let mut targets = Vec::new();
        for (collection, names) in self.find_collection_references(collection_id)? {
            let collection = Arc::new(collection);
            for name in names {
                if let Some(field) = collection.fields.get_by_name(&name).and_then(Field::as_relation) {
                    targets.push(CascadeTarget {
                        collection: Arc::clone(&collection),
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(targets)
    }

    fn delete_cascade(&self, record: &Record, depth: usize, removed: &mut Vec<String>) -> CoreResult<()> {
        if depth > self.config.records.max_cascade_depth {
            return Err(CoreError::invalid("max cascade delete depth reached"));
        }

        let record_id = record.id();
        for target in self.cascade_targets(&record.collection().id)? {
            let column = format!("{}.{}", target.collection.table_name(), target.field.base.name);
            let rows = self.query_maps(
                &format!(
                    "SELECT {table}.* FROM {table} WHERE EXISTS (SELECT 1 FROM {} WHERE `value` = :id)",
                    json_each(&column),
                    table = quote_table(target.collection.table_name()),
                ),
                &[("id".into(), SqlValue::Text(record_id.clone()))],
            )?;

            for row in rows {
                let referencing = Record::load(Arc::clone(&target.collection), row);
                if referencing.collection().id == record.collection().id && referencing.id() == record_id {
                    continue;
                }

                if target.field.cascade_delete {
                    self.delete_cascade(&referencing, depth + 1, removed)?;
                    continue;
                }

                let current = to_unique_string_vec(referencing.get_raw(&target.field.base.name).unwrap_or(&Value::Null));
                let remaining = subtract(&current, std::slice::from_ref(&record_id));
                if target.field.required && remaining.is_empty() {
                    return Err(CoreError::invalid(format!(
                        "the record cannot be deleted because it is part of a required reference in {}.{}",
                        target.collection.name, target.field.base.name
                    )));
                }

                let field = Field::Relation(target.field.clone());
                let value = field.prepare_value(&Value::from(remaining));
                self.exec_with(
                    &format!(
                        "UPDATE {} SET `{}` = :value WHERE `id` = :id",
                        quote_table(target.collection.table_name()),
                        target.field.base.name
                    ),
                    &[
                        ("value".into(), field.driver_value(&value)),
                        ("id".into(), SqlValue::Text(referencing.id())),
                    ],
                )?;
            }
        }

        self.exec_with(
            &format!("DELETE FROM {} WHERE `id` = :id", quote_table(record.table_name())),
            &[("id".into(), SqlValue::Text(record_id))],
        )?;
        removed.push(record.base_files_path());
        log::debug!("deleted record {} of {}", record.id(), record.collection().name);
        Ok(())
    }
}

impl Db {
    /// Records of a collection matching `filter`, sorted by `sort` (`-created,title`).
    ///
    /// `{:key}` placeholders in the filter are replaced with the quoted `params` values.
    /// Hidden fields are allowed in both expressions. A `limit` of 0 returns every match.
    pub fn find_records_by_filter(
        &self,
        collection_name_or_id: &str,
        filter: &str,
        sort: &str,
        limit: u64,
        offset: u64,
        params: &Map<String, Value>,
    ) -> CoreResult<Vec<Record>> {
        let collection = Arc::new(self.require_collection(collection_name_or_id)?);
        let mut resolver = RecordFieldResolver::new(self, &collection, None, true);
        let mut query = resolver.base_query();

        if !filter.trim().is_empty() {
            let expr = FilterData::with_params(filter, params).build_expr_with(&mut resolver, &self.config.filter)?;
            query.and_where(expr);
        }
        let alias = query.table_alias.clone();
        for field in parse_sort(sort) {
            let term = field.build_expr(&mut resolver, &alias)?;
            query.and_order_by(term);
        }
        resolver.update_query(&mut query)?;

        if limit > 0 {
            query.limit = Some(limit);
        }
        if offset > 0 {
            query.offset = Some(offset);
        }
        let (sql, sql_params) = query.build();
        Ok(self
            .query_maps(&sql, &sql_params)?
            .into_iter()
            .map(|row| Record::load(Arc::clone(&collection), row))
            .collect())
    }

    /// First record matching `filter`, if any.
    pub fn find_first_record_by_filter(
        &self,
        collection_name_or_id: &str,
        filter: &str,
        params: &Map<String, Value>,
    ) -> CoreResult<Option<Record>> {
        Ok(self
            .find_records_by_filter(collection_name_or_id, filter, "", 1, 0, params)?
            .into_iter()
            .next())
    }

    /// Number of records matching `filter` (all records for an empty filter).
    pub fn count_records(&self, collection_name_or_id: &str, filter: &str, params: &Map<String, Value>) -> CoreResult<u64> {
        let collection = self.require_collection(collection_name_or_id)?;
        let mut resolver = RecordFieldResolver::new(self, &collection, None, true);
        let mut query = resolver.base_query();
        if !filter.trim().is_empty() {
            let expr = FilterData::with_params(filter, params).build_expr_with(&mut resolver, &self.config.filter)?;
            query.and_where(expr);
        }
        resolver.update_query(&mut query)?;
        let (sql, sql_params) = query.build_count("id");
        Ok(self.query_count(&sql, &sql_params)?.max(0) as u64)
    }

    /// Paginated client listing. Hidden fields cannot be filtered or sorted on.
    pub fn search_records(
        &self,
        collection_name_or_id: &str,
        params: &SearchQuery,
        request_info: Option<&RequestInfo>,
    ) -> CoreResult<SearchResult<Record>> {
        let collection = Arc::new(self.require_collection(collection_name_or_id)?);
        let mut resolver = RecordFieldResolver::new(self, &collection, request_info, false);
        let query = resolver.base_query();
        let result = SearchProvider::new(self, &mut resolver, query).parse(params).exec()?;
        Ok(result.map(|row| Record::load(Arc::clone(&collection), row)))
    }
}
