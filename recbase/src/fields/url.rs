use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::email::{check_domains, validate_domain_lists};
use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue, value_to_string};
use crate::errors::{ValidationError, ValidationIssue};
use crate::validators::{is_valid_url, url_domain};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UrlField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub except_domains: Vec<String>,
    pub only_domains: Vec<String>,
    pub required: bool,
}

impl UrlField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for UrlField {
    const TYPE: &'static str = super::FIELD_TYPE_URL;

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
        Value::String(value_to_string(raw).trim().to_string())
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let value = value_to_string(ctx.value(&self.base.name));
        if value.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }
        if !is_valid_url(&value) {
            return Err(issue("validation_is_url", "Must be a valid url."));
        }
        let domain = url_domain(&value).unwrap_or_default();
        check_domains(&domain, &self.except_domains, &self.only_domains)
            .map_err(|_| issue("validation_url_domain_not_allowed", "Url domain is not allowed."))
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        validate_domain_lists(&self.except_domains, &self.only_domains)
    }
}
