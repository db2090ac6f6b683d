use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue, value_to_string};
use crate::errors::{ValidationError, ValidationIssue};
use crate::validators::is_valid_color;

/// Hex color, `#rgb`/`#rrggbb` (plus the alpha forms when `alpha` is set).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub alpha: bool,
    pub required: bool,
}

impl ColorField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for ColorField {
    const TYPE: &'static str = super::FIELD_TYPE_COLOR;

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
        Value::String(value_to_string(raw).trim().to_lowercase())
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let value = value_to_string(ctx.value(&self.base.name));
        if value.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }
        if !is_valid_color(&value, self.alpha) {
            return Err(issue("validation_invalid_color", "Must be a valid hex color."));
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        ValidationError::default()
    }
}
