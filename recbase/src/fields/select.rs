use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldBase, FieldKind, SettingsContext, Setter, ValueContext, issue, multi, required_issue};
use crate::errors::{ValidationError, ValidationIssue};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub values: Vec<String>,
    pub max_select: usize,
    pub required: bool,
}

impl SelectField {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            base: FieldBase::named(name),
            values: values.iter().map(|v| v.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn multiple(mut self, max_select: usize) -> Self {
        self.max_select = max_select;
        self
    }
}

impl FieldKind for SelectField {
    const TYPE: &'static str = super::FIELD_TYPE_SELECT;

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
        let selected = multi::items(Some(ctx.value(&self.base.name)));
        if selected.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }

        let max = self.max_select.max(1);
        if selected.len() > max {
            return Err(issue("validation_too_many_values", format!("Select no more than {max}.")));
        }
        if selected.iter().any(|v| !self.values.contains(v)) {
            return Err(issue("validation_invalid_value", "Invalid value."));
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();
        if self.values.is_empty() {
            errors.push("values", "validation_required", "Cannot be blank.");
        }
        let unique: BTreeSet<&String> = self.values.iter().collect();
        if unique.len() != self.values.len() {
            errors.push("values", "validation_duplicated_values", "The values must be unique.");
        }
        if self.values.iter().any(|v| v.is_empty()) {
            errors.push("values", "validation_required", "Values cannot be blank.");
        }
        if self.max_select > self.values.len() && !self.values.is_empty() {
            errors.push(
                "maxSelect",
                "validation_max_select_constraint",
                format!("Must be less than or equal to {}.", self.values.len()),
            );
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
    use crate::fields::Field;
    use crate::record::Record;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn single_select_keeps_last_item() {
        let field = SelectField::new("status", &["a", "b"]);
        assert_eq!(field.prepare_value(&json!(["a", "b"])), json!("b"));
        assert_eq!(field.column_type(), "TEXT DEFAULT '' NOT NULL");
    }

    #[test]
    fn list_setters_modify_multiple_values() {
        let field = SelectField { max_select: 3, ..SelectField::new("tags", &["a", "b", "c"]) };
        let mut collection = Collection::new_base("demo");
        collection.fields.add(Field::from(field));
        let mut record = Record::new(Arc::new(collection));
        record.set("tags", json!(["b"]));
        record.set("tags+", json!("c"));
        record.set("+tags", json!("a"));
        assert_eq!(record.get_string_vec("tags"), vec!["a", "b", "c"]);
        record.set("tags-", json!(["b"]));
        assert_eq!(record.get_string_vec("tags"), vec!["a", "c"]);
    }
}
