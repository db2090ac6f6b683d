use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue, value_to_string};
use crate::errors::{ValidationError, ValidationIssue};
use crate::validators::{email_domain, is_valid_email};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub except_domains: Vec<String>,
    pub only_domains: Vec<String>,
    pub required: bool,
}

impl EmailField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

/// Applies the allow/deny domain lists shared by email and url fields.
pub(super) fn check_domains(domain: &str, except: &[String], only: &[String]) -> Result<(), ValidationIssue> {
    if !except.is_empty() && except.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
        return Err(issue("validation_email_domain_not_allowed", "Domain is not allowed."));
    }
    if !only.is_empty() && !only.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
        return Err(issue("validation_email_domain_not_allowed", "Domain is not allowed."));
    }
    Ok(())
}

/// Both domain lists cannot be set at the same time.
pub(super) fn validate_domain_lists(except: &[String], only: &[String]) -> ValidationError {
    let mut errors = ValidationError::default();
    if !except.is_empty() && !only.is_empty() {
        let message = "Either onlyDomains or exceptDomains can be set, not both.";
        errors.push("exceptDomains", "validation_domains_conflict", message);
        errors.push("onlyDomains", "validation_domains_conflict", message);
    }
    errors
}

impl FieldKind for EmailField {
    const TYPE: &'static str = super::FIELD_TYPE_EMAIL;

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
        if !is_valid_email(&value) {
            return Err(issue("validation_is_email", "Must be a valid email address."));
        }
        let domain = email_domain(&value).unwrap_or_default();
        check_domains(&domain, &self.except_domains, &self.only_domains)
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        validate_domain_lists(&self.except_domains, &self.only_domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_lists_are_case_insensitive() {
        let only = vec!["Example.com".to_string()];
        assert!(check_domains("example.com", &[], &only).is_ok());
        assert!(check_domains("other.com", &[], &only).is_err());
        assert!(check_domains("example.com", &only, &[]).is_err());
        assert!(validate_domain_lists(&only, &only).has("onlyDomains"));
    }
}
