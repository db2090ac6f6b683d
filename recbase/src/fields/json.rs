use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, is_zero_value, required_issue};
use crate::errors::{ValidationError, ValidationIssue};

/// Default `maxSize` of json fields (1MB).
pub const DEFAULT_JSON_MAX_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsonField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub max_size: u64,
    pub required: bool,
}

impl JsonField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }

    fn effective_max_size(&self) -> u64 {
        if self.max_size == 0 { DEFAULT_JSON_MAX_SIZE } else { self.max_size }
    }
}

impl FieldKind for JsonField {
    const TYPE: &'static str = super::FIELD_TYPE_JSON;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        "JSON DEFAULT NULL".to_string()
    }

    /// Strings holding serialized JSON are decoded, everything else is kept.
    fn prepare_value(&self, raw: &Value) -> Value {
        match raw {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| raw.clone()),
            other => other.clone(),
        }
    }

    fn driver_value(&self, value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            other => SqlValue::Text(other.to_string()),
        }
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let value = ctx.value(&self.base.name);
        let encoded = value.to_string();
        let max = self.effective_max_size();
        if encoded.len() as u64 > max {
            return Err(issue("validation_json_size_limit", format!("The maximum allowed JSON size is {max} bytes.")));
        }
        if self.required && (is_zero_value(value) || encoded == "\"\"") {
            return Err(required_issue());
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        ValidationError::default()
    }

    fn max_body_size(&self) -> u64 {
        self.effective_max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_serialized_strings() {
        let field = JsonField::new("meta");
        assert_eq!(field.prepare_value(&json!("{\"a\":1}")), json!({"a": 1}));
        assert_eq!(field.prepare_value(&json!("plain")), json!("plain"));
        assert_eq!(field.driver_value(&json!([1, 2])), SqlValue::Text("[1,2]".into()));
        assert_eq!(field.driver_value(&Value::Null), SqlValue::Null);
    }
}
