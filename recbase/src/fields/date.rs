use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue, value_to_string};
use crate::errors::{ValidationError, ValidationIssue};
use crate::validators::{format_datetime, parse_datetime};

/// Normalizes any accepted notation into the storage layout, or `""`.
pub(super) fn normalize_date(raw: &Value) -> Value {
    let formatted = parse_datetime(&value_to_string(raw))
        .map(|dt| format_datetime(&dt))
        .unwrap_or_default();
    Value::String(formatted)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DateField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub min: String,
    pub max: String,
    pub required: bool,
}

impl DateField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for DateField {
    const TYPE: &'static str = super::FIELD_TYPE_DATE;

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

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let raw = value_to_string(ctx.value(&self.base.name));
        let Some(value) = parse_datetime(&raw) else {
            if !raw.is_empty() {
                return Err(issue("validation_invalid_date", "Must be a valid date."));
            }
            return if self.required { Err(required_issue()) } else { Ok(()) };
        };

        if let Some(min) = parse_datetime(&self.min) {
            if value < min {
                return Err(issue(
                    "validation_min_date_constraint",
                    format!("Must be no less than {}.", format_datetime(&min)),
                ));
            }
        }
        if let Some(max) = parse_datetime(&self.max) {
            if value > max {
                return Err(issue(
                    "validation_max_date_constraint",
                    format!("Must be no more than {}.", format_datetime(&max)),
                ));
            }
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();
        let min = parse_datetime(&self.min);
        let max = parse_datetime(&self.max);
        if !self.min.is_empty() && min.is_none() {
            errors.push("min", "validation_invalid_date", "Must be a valid date.");
        }
        if !self.max.is_empty() && max.is_none() {
            errors.push("max", "validation_invalid_date", "Must be a valid date.");
        }
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                errors.push("max", "validation_min_greater_equal_than_required", "Must be after the min date.");
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_to_storage_layout() {
        assert_eq!(normalize_date(&json!("2024-01-02")), json!("2024-01-02 00:00:00.000Z"));
        assert_eq!(normalize_date(&json!("2024-01-02T10:11:12Z")), json!("2024-01-02 10:11:12.000Z"));
        assert_eq!(normalize_date(&json!("not a date")), json!(""));
    }
}
