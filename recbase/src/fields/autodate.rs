use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::date::normalize_date;
use super::{
    Field, FieldBase, FieldKind, InterceptAction, InterceptEnv, KeyModifier, Next, SettingsContext, Setter,
    ValueContext, match_key,
};
use crate::errors::{CoreResult, ValidationError, ValidationIssue};
use crate::record::Record;
use crate::validators::format_datetime;

/// Date that is filled automatically on create and/or update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutodateField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub on_create: bool,
    pub on_update: bool,
}

impl AutodateField {
    pub fn new(name: impl Into<String>, on_create: bool, on_update: bool) -> Self {
        Self {
            base: FieldBase::named(name),
            on_create,
            on_update,
        }
    }

    fn stamp(&self, record: &mut Record) {
        record.set_raw(&self.base.name, Value::String(format_datetime(&Utc::now())));
    }
}

impl FieldKind for AutodateField {
    const TYPE: &'static str = super::FIELD_TYPE_AUTODATE;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        "TEXT DEFAULT '' NOT NULL".to_string()
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        normalize_date(raw)
    }

    fn validate_value(&self, _ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        Ok(())
    }

    fn validate_settings(&self, ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();
        if !self.on_create && !self.on_update {
            errors.push("onCreate", "validation_required", "At least one of onCreate or onUpdate must be set.");
        }

        if self.base.system {
            if let Some(Field::Autodate(old)) = ctx.original_field(&self.base.id) {
                if old.on_create != self.on_create {
                    errors.push("onCreate", "validation_readonly", "The onCreate flag of a system field cannot change.");
                }
                if old.on_update != self.on_update {
                    errors.push("onUpdate", "validation_readonly", "The onUpdate flag of a system field cannot change.");
                }
            }
        }
        errors
    }

    /// Plain assignments are ignored; `name:autodate` forces a value that
    /// survives the next create/update stamp.
    fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        if key == self.base.name {
            return Some(Box::new(|_: &mut Record, _: Value| {}));
        }
        match match_key(key, &self.base.name)? {
            KeyModifier::Named("autodate") => Some(Box::new(move |record: &mut Record, value: Value| {
                record.set_raw(&self.base.name, normalize_date(&value));
                record.force_autodate(&self.base.name);
            })),
            _ => None,
        }
    }

    fn intercept(
        &self,
        _env: &InterceptEnv<'_>,
        record: &mut Record,
        action: InterceptAction,
        next: Next<'_>,
    ) -> CoreResult<()> {
        let forced = record.is_autodate_forced(&self.base.name);
        match action {
            InterceptAction::Create if self.on_create && !forced => self.stamp(record),
            InterceptAction::Update if self.on_update && !forced => self.stamp(record),
            _ => {}
        }
        next(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::db::Db;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn plain_assignment_is_ignored() {
        let mut collection = Collection::new_base("demo");
        collection.fields.add(Field::from(AutodateField::new("created", true, false)));
        let mut record = Record::new(Arc::new(collection));
        record.set("created", json!("2020-01-01 00:00:00.000Z"));
        assert_eq!(record.get_string("created"), "");
        record.set("created:autodate", json!("2020-01-01"));
        assert_eq!(record.get_string("created"), "2020-01-01 00:00:00.000Z");
        assert!(record.is_autodate_forced("created"));
    }

    #[test]
    fn requires_at_least_one_flag() {
        let db = Db::open_in_memory().unwrap();
        let collection = Collection::new_base("demo");
        let ctx = SettingsContext { db: &db, collection: &collection, original: None };
        assert!(AutodateField::new("x", false, false).validate_settings(&ctx).has("onCreate"));
        assert!(AutodateField::new("x", true, false).validate_settings(&ctx).is_empty());
    }
}
