use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldBase, FieldKind, SettingsContext, ValueContext, required_issue, value_to_bool};
use crate::errors::{ValidationError, ValidationIssue};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoolField {
    #[serde(flatten)]
    pub base: FieldBase,
    /// A required bool must be `true`.
    pub required: bool,
}

impl BoolField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for BoolField {
    const TYPE: &'static str = super::FIELD_TYPE_BOOL;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        "BOOLEAN DEFAULT FALSE NOT NULL".to_string()
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        Value::Bool(value_to_bool(raw))
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        if self.required && !value_to_bool(ctx.value(&self.base.name)) {
            return Err(required_issue());
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        ValidationError::default()
    }
}
