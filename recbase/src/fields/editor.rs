use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    DEFAULT_FILE_MAX_SIZE, FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue,
    value_to_string,
};
use crate::errors::{ValidationError, ValidationIssue};

/// Rich text (HTML) content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorField {
    #[serde(flatten)]
    pub base: FieldBase,
    /// Byte limit; zero means [`DEFAULT_FILE_MAX_SIZE`].
    pub max_size: u64,
    #[serde(rename = "convertURLs")]
    pub convert_urls: bool,
    pub required: bool,
}

impl EditorField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }

    fn effective_max_size(&self) -> u64 {
        if self.max_size == 0 { DEFAULT_FILE_MAX_SIZE } else { self.max_size }
    }
}

impl FieldKind for EditorField {
    const TYPE: &'static str = super::FIELD_TYPE_EDITOR;

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
        Value::String(value_to_string(raw))
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let value = value_to_string(ctx.value(&self.base.name));
        if value.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }
        let max = self.effective_max_size();
        if value.len() as u64 > max {
            return Err(issue("validation_content_size_limit", format!("The maximum allowed content size is {max} bytes.")));
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
