//! Collection persistence.

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use super::{COLLECTIONS_TABLE, Db};
use crate::collection::{Collection, CollectionType, validate_collection};
use crate::errors::{CoreError, CoreResult, ValidationError};
use crate::fields::Field;
use crate::id::{collection_id, collection_id_with_suffix};
use crate::schema::{create_view_fields, sync_record_table_schema};
use crate::validators::format_datetime;

const RULE_COLUMNS: [&str; 5] = ["listRule", "viewRule", "createRule", "updateRule", "deleteRule"];

impl Db {
    fn collection_from_row(&self, mut row: Map<String, Value>) -> CoreResult<Collection> {
        let mut value = Map::new();
        for key in ["id", "name", "type", "created", "updated"] {
            if let Some(v) = row.remove(key) {
                value.insert(key.to_string(), v);
            }
        }
        value.insert("system".into(), Value::Bool(row.remove("system").is_some_and(|v| v == Value::from(1))));
        for key in RULE_COLUMNS {
            value.insert(key.to_string(), row.remove(key).unwrap_or(Value::Null));
        }
        for key in ["fields", "indexes"] {
            let raw = row.remove(key).unwrap_or(Value::Null);
            value.insert(key.to_string(), decode_json_column(raw)?);
        }
        if let Value::Object(options) = decode_json_column(row.remove("options").unwrap_or(Value::Null))? {
            value.extend(options);
        }
        Ok(Collection::from_json(&self.registry, Value::Object(value))?)
    }

    fn find_collections_where(&self, condition: &str, params: &[(String, SqlValue)]) -> CoreResult<Vec<Collection>> {
        let sql = format!("SELECT * FROM `{COLLECTIONS_TABLE}` WHERE {condition} ORDER BY `rowid` ASC");
        self.query_maps(&sql, params)?
            .into_iter()
            .map(|row| self.collection_from_row(row))
            .collect()
    }

    /// Looks up a collection by its id or (case-insensitive) name.
    pub fn find_collection_by_name_or_id(&self, name_or_id: &str) -> CoreResult<Option<Collection>> {
        let mut found = self.find_collections_where(
            "`id` = :key OR `name` = :key COLLATE NOCASE",
            &[("key".into(), SqlValue::Text(name_or_id.to_string()))],
        )?;
        // an exact id match wins over a name match
        let pos = found.iter().position(|c| c.id == name_or_id).unwrap_or(0);
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(pos)) })
    }

    /// Like [`find_collection_by_name_or_id`](Self::find_collection_by_name_or_id) but errors when missing.
    pub fn require_collection(&self, name_or_id: &str) -> CoreResult<Collection> {
        self.find_collection_by_name_or_id(name_or_id)?
            .ok_or_else(|| CoreError::not_found(format!("collection {name_or_id:?}")))
    }

    /// All collections, optionally restricted to the given types.
    pub fn find_all_collections(&self, types: &[CollectionType]) -> CoreResult<Vec<Collection>> {
        let all = self.find_collections_where("1 = 1", &[])?;
        if types.is_empty() {
            return Ok(all);
        }
        Ok(all.into_iter().filter(|c| types.contains(&c.collection_type)).collect())
    }

    pub fn find_collections_by_names(&self, names: &[String]) -> CoreResult<Vec<Collection>> {
        Ok(self
            .find_all_collections(&[])?
            .into_iter()
            .filter(|c| names.iter().any(|n| n.eq_ignore_ascii_case(&c.name)))
            .collect())
    }

    /// Collections with at least one relation field pointing to `collection_id`.
    pub fn find_collection_references(&self, collection_id: &str) -> CoreResult<Vec<(Collection, Vec<String>)>> {
        let mut result = Vec::new();
        for collection in self.find_all_collections(&[])? {
            let fields: Vec<String> = collection
                .fields
                .iter()
                .filter_map(Field::as_relation)
                .filter(|rel| rel.collection_id == collection_id)
                .map(|rel| rel.base.name.clone())
                .collect();
            if !fields.is_empty() {
                result.push((collection, fields));
            }
        }
        Ok(result)
    }

    pub fn is_collection_name_unique(&self, name: &str, exclude_ids: &[&str]) -> CoreResult<bool> {
        let rows = self.query_maps(
            &format!("SELECT `id` FROM `{COLLECTIONS_TABLE}` WHERE `name` = :name COLLATE NOCASE"),
            &[("name".into(), SqlValue::Text(name.to_string()))],
        )?;
        Ok(rows
            .iter()
            .all(|row| row.get("id").and_then(Value::as_str).is_some_and(|id| exclude_ids.contains(&id))))
    }

    /// Validates and persists `collection` together with its table or view.
    ///
    /// View fields are regenerated from the view query. The record table is
    /// synchronized in the same transaction as the definition row.
    pub fn save_collection(&self, collection: &mut Collection) -> CoreResult<()> {
        self.run_in_transaction(|db| {
            let mut original = db.find_original(collection)?;
            if original.is_some() && collection.created.is_empty() && has_derived_id(collection) {
                // a new collection whose generated id is already taken
                original = None;
                collection.id = collection_id_with_suffix(collection.collection_type.as_str(), &collection.name);
            }

            match collection.collection_type {
                CollectionType::View => db.refresh_view_fields(collection, original.as_ref())?,
                CollectionType::Auth => collection.ensure_auth_fields(),
                CollectionType::Base => {}
            }

            validate_collection(db, collection, original.as_ref()).into_result()?;

            let now = format_datetime(&Utc::now());
            match original.as_ref() {
                Some(old) if collection.created.is_empty() => collection.created = old.created.clone(),
                Some(_) => {}
                None => collection.created = now.clone(),
            }
            collection.updated = now;
            db.write_collection_row(collection, original.is_some())?;

            if collection.is_view() {
                if let Some(old) = original.as_ref().filter(|old| !old.name.eq_ignore_ascii_case(&collection.name)) {
                    db.delete_view(&old.name)?;
                }
                db.save_view(&collection.name, &collection.view.view_query)?;
            } else {
                sync_record_table_schema(db, collection, original.as_ref())?;
            }

            log::info!(
                "{} collection {} ({})",
                if original.is_some() { "updated" } else { "created" },
                collection.name,
                collection.id
            );
            Ok(())
        })?;

        if !self.in_transaction() && self.config.schema.optimize_after_sync {
            self.optimize();
        }
        Ok(())
    }

    fn find_original(&self, collection: &Collection) -> CoreResult<Option<Collection>> {
        let rows = self.find_collections_where(
            "`id` = :id",
            &[("id".into(), SqlValue::Text(collection.id.clone()))],
        )?;
        Ok(rows.into_iter().next())
    }

    /// Replaces the fields of a view collection with the inferred ones,
    /// reusing the ids of previous fields with the same name and type.
    fn refresh_view_fields(&self, collection: &mut Collection, original: Option<&Collection>) -> CoreResult<()> {
        let mut fields = match create_view_fields(self, &collection.view.view_query) {
            Ok(fields) => fields,
            Err(err) => {
                return Err(ValidationError::single(
                    "viewQuery",
                    "validation_invalid_view_query",
                    format!("Invalid query - {err}"),
                )
                .into());
            }
        };

        let previous = original.map(|c| &c.fields).unwrap_or(&collection.fields);
        for field in fields.iter_mut() {
            if let Some(old) = previous.get_by_name(field.name()) {
                if old.type_name() == field.type_name() {
                    field.set_id(old.id().to_string());
                }
            }
        }
        collection.fields = fields;
        Ok(())
    }

    fn write_collection_row(&self, collection: &Collection, exists: bool) -> CoreResult<()> {
        let mut params: Vec<(String, SqlValue)> = vec![
            ("id".into(), SqlValue::Text(collection.id.clone())),
            ("system".into(), SqlValue::Integer(i64::from(collection.system))),
            ("type".into(), SqlValue::Text(collection.collection_type.as_str().into())),
            ("name".into(), SqlValue::Text(collection.name.clone())),
            ("fields".into(), SqlValue::Text(collection.fields.to_json()?.to_string())),
            ("indexes".into(), SqlValue::Text(serde_json::to_string(&collection.indexes)?)),
            ("options".into(), SqlValue::Text(collection.options_json()?.to_string())),
            ("created".into(), SqlValue::Text(collection.created.clone())),
            ("updated".into(), SqlValue::Text(collection.updated.clone())),
        ];
        for (key, rule) in collection.rules.entries() {
            params.push((key.into(), rule.map_or(SqlValue::Null, |r| SqlValue::Text(r.to_string()))));
        }

        let columns: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        let sql = if exists {
            let sets: Vec<String> = columns
                .iter()
                .filter(|c| **c != "id" && **c != "created")
                .map(|c| format!("`{c}` = :{c}"))
                .collect();
            format!("UPDATE `{COLLECTIONS_TABLE}` SET {} WHERE `id` = :id", sets.join(", "))
        } else {
            format!(
                "INSERT INTO `{COLLECTIONS_TABLE}` ({}) VALUES ({})",
                columns.iter().map(|c| format!("`{c}`")).collect::<Vec<_>>().join(", "),
                columns.iter().map(|c| format!(":{c}")).collect::<Vec<_>>().join(", ")
            )
        };
        if exists {
            params.retain(|(k, _)| k != "created");
        }
        self.exec_with(&sql, &params)?;
        Ok(())
    }

    /// Deletes a collection and drops its table or view.
    ///
    /// System collections and collections still referenced by relation fields
    /// of other collections cannot be deleted.
    pub fn delete_collection(&self, collection: &Collection) -> CoreResult<()> {
        if collection.system {
            return Err(CoreError::invalid(format!("system collection {:?} cannot be deleted", collection.name)));
        }

        let references: Vec<String> = self
            .find_collection_references(&collection.id)?
            .into_iter()
            .filter(|(c, _)| c.id != collection.id)
            .map(|(c, fields)| format!("{}.{}", c.name, fields.join("|")))
            .collect();
        if !references.is_empty() {
            return Err(CoreError::invalid(format!(
                "collection {:?} is still referenced by {}",
                collection.name,
                references.join(", ")
            )));
        }

        self.run_in_transaction(|db| {
            db.exec_with(
                &format!("DELETE FROM `{COLLECTIONS_TABLE}` WHERE `id` = :id"),
                &[("id".into(), SqlValue::Text(collection.id.clone()))],
            )?;
            if collection.is_view() {
                db.delete_view(&collection.name)?;
            } else {
                db.exec(&format!("DROP TABLE IF EXISTS `{}`", collection.name))?;
            }
            log::info!("deleted collection {} ({})", collection.name, collection.id);
            Ok(())
        })
    }
}

fn has_derived_id(collection: &Collection) -> bool {
    collection.id == collection_id(collection.collection_type.as_str(), &collection.name)
}

fn decode_json_column(raw: Value) -> CoreResult<Value> {
    match raw {
        Value::String(s) if s.is_empty() => Ok(Value::Null),
        Value::String(s) => Ok(serde_json::from_str(&s)?),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{NumberField, TextField};

    #[test]
    fn test_collection_row_roundtrip() {
        let db = Db::open_in_memory().unwrap();
        let mut collection = Collection::new_base("demo");
        collection.fields.add(TextField::new("title").into());
        collection.fields.add(NumberField::new("qty").into());
        collection.rules.list_rule = Some("qty > 1".into());
        db.save_collection(&mut collection).unwrap();

        let loaded = db.find_collection_by_name_or_id("DEMO").unwrap().unwrap();
        assert_eq!(loaded.id, collection.id);
        assert_eq!(loaded.fields, collection.fields);
        assert_eq!(loaded.rules.list_rule.as_deref(), Some("qty > 1"));
        assert_eq!(loaded.rules.view_rule, None);
        assert!(!loaded.created.is_empty());
        assert!(db.has_table("demo").unwrap());
    }

    #[test]
    fn test_delete_collection_drops_table() {
        let db = Db::open_in_memory().unwrap();
        let mut collection = Collection::new_base("tmp");
        db.save_collection(&mut collection).unwrap();
        db.delete_collection(&collection).unwrap();
        assert!(!db.has_table("tmp").unwrap());
        assert!(db.find_collection_by_name_or_id("tmp").unwrap().is_none());

        let mut system = Collection::new_base("sys");
        system.system = true;
        db.save_collection(&mut system).unwrap();
        assert!(db.delete_collection(&system).is_err());
    }
}
