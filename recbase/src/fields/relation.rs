use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Field, FieldBase, FieldKind, SettingsContext, Setter, ValueContext, issue, multi, required_issue};
use crate::collection::CollectionType;
use crate::errors::{ValidationError, ValidationIssue};

/// Reference to one or more records of another (or the same) collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub collection_id: String,
    pub cascade_delete: bool,
    pub min_select: usize,
    pub max_select: usize,
    pub required: bool,
}

impl RelationField {
    pub fn new(name: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            collection_id: collection_id.into(),
            ..Self::default()
        }
    }

    pub fn multiple(mut self, max_select: usize) -> Self {
        self.max_select = max_select;
        self
    }
}

impl FieldKind for RelationField {
    const TYPE: &'static str = super::FIELD_TYPE_RELATION;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        if self.is_multiple() {
            "JSON DEFAULT '[]' NOT NULL".to_string()
        } else {
            "TEXT DEFAULT '' NOT NULL".to_string()
        }
    }

    fn is_multi_valuer(&self) -> bool {
        true
    }

    fn is_multiple(&self) -> bool {
        self.max_select > 1
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        multi::prepare(raw, self.is_multiple())
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let ids = multi::items(Some(ctx.value(&self.base.name)));
        if ids.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }

        if self.min_select > 0 && ids.len() < self.min_select {
            return Err(issue(
                "validation_not_enough_values",
                format!("Select at least {}.", self.min_select),
            ));
        }
        let max = self.max_select.max(1);
        if ids.len() > max {
            return Err(issue("validation_too_many_values", format!("Select no more than {max}.")));
        }

        let missing = || issue("validation_missing_rel_records", "Failed to find all relation records with the provided ids.");
        let related = ctx
            .db
            .find_collection_by_name_or_id(&self.collection_id)
            .map_err(|_| missing())?
            .ok_or_else(missing)?;
        let found = ctx.db.count_records_by_ids(&related.name, &ids).map_err(|_| missing())?;
        if found != ids.len() {
            return Err(missing());
        }
        Ok(())
    }

    fn validate_settings(&self, ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();

        if self.collection_id.is_empty() {
            errors.push("collectionId", "validation_required", "Cannot be blank.");
        } else if self.collection_id != ctx.collection.id {
            match ctx.db.find_collection_by_name_or_id(&self.collection_id) {
                Ok(Some(related)) => {
                    if related.collection_type == CollectionType::View
                        && ctx.collection.collection_type != CollectionType::View
                    {
                        errors.push(
                            "collectionId",
                            "validation_invalid_view_collection_relation",
                            "Non view collections are not allowed to have a view relation.",
                        );
                    }
                }
                _ => errors.push("collectionId", "validation_missing_collection", "The relation collection doesn't exist."),
            }
        }

        if let Some(Field::Relation(old)) = ctx.original_field(&self.base.id) {
            if old.collection_id != self.collection_id {
                errors.push("collectionId", "validation_field_relation_change", "The relation collection cannot be changed.");
            }
        }

        if self.min_select > self.max_select.max(1) {
            errors.push("maxSelect", "validation_min_greater_equal_than_required", "Must be greater than or equal to minSelect.");
        }

        errors
    }

    fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        multi::setter(key, &self.base.name, self.is_multiple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::db::Db;
    use crate::fields::TextField;
    use crate::record::Record;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn cardinality_drives_column_and_value_shape() {
        let single = RelationField::new("owner", "pbc_users");
        assert_eq!(single.column_type(), "TEXT DEFAULT '' NOT NULL");
        assert_eq!(single.prepare_value(&json!(["a", "b"])), json!("b"));

        let many = RelationField::new("owners", "pbc_users").multiple(3);
        assert_eq!(many.column_type(), "JSON DEFAULT '[]' NOT NULL");
        assert_eq!(many.prepare_value(&json!("a")), json!(["a"]));
    }

    #[test]
    fn related_ids_must_exist() {
        let db = Db::open_in_memory().unwrap();
        let mut tags = Collection::new_base("tags");
        tags.fields.add(TextField::new("name").into());
        db.save_collection(&mut tags).unwrap();
        db.exec("INSERT INTO `tags` (`id`, `name`) VALUES ('tag000000000001', 'rust')").unwrap();

        let mut posts = Collection::new_base("posts");
        posts.fields.add(RelationField::new("tags", tags.id.clone()).multiple(2).into());
        let posts = Arc::new(posts);

        let mut record = Record::new(Arc::clone(&posts));
        record.set("tags", json!(["tag000000000001"]));
        assert!(db.validate_record(&record).is_ok());

        record.set("tags", json!(["tag000000000001", "tag000000000002"]));
        let err = db.validate_record(&record).unwrap_err();
        assert!(err.to_string().contains("relation records"), "{err}");
    }
}
