//! Type specific collection options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;
use crate::tools::security::pseudorandom_string;

pub const TOKEN_SECRET_MIN_LENGTH: usize = 30;
pub const TOKEN_SECRET_MAX_LENGTH: usize = 255;
pub const TOKEN_DURATION_MIN: i64 = 10;
pub const TOKEN_DURATION_MAX: i64 = 365 * 24 * 60 * 60;

/// Signing secret and lifetime (seconds) of one token kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret: String,
    pub duration: i64,
}

impl TokenConfig {
    pub fn generate(duration: i64) -> Self {
        Self {
            secret: pseudorandom_string(50),
            duration,
        }
    }

    pub fn validate(&self) -> ValidationError {
        let mut errors = ValidationError::default();
        let len = self.secret.chars().count();
        if self.secret.is_empty() {
            errors.push("secret", "validation_required", "Cannot be blank.");
        } else if !(TOKEN_SECRET_MIN_LENGTH..=TOKEN_SECRET_MAX_LENGTH).contains(&len) {
            errors.push(
                "secret",
                "validation_length_out_of_range",
                format!("The length must be between {TOKEN_SECRET_MIN_LENGTH} and {TOKEN_SECRET_MAX_LENGTH}."),
            );
        }
        if !(TOKEN_DURATION_MIN..=TOKEN_DURATION_MAX).contains(&self.duration) {
            errors.push(
                "duration",
                "validation_out_of_range",
                format!("Must be between {TOKEN_DURATION_MIN} and {TOKEN_DURATION_MAX} seconds."),
            );
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordAuthConfig {
    pub enabled: bool,
    pub identity_fields: Vec<String>,
}

impl Default for PasswordAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            identity_fields: vec!["email".to_string()],
        }
    }
}

/// Record fields filled from the OAuth2 user profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2KnownFields {
    pub id: String,
    pub name: String,
    pub username: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
}

impl OAuth2KnownFields {
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("username", self.username.as_str()),
            ("avatarURL", self.avatar_url.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuth2ProviderConfig {
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(rename = "authURL")]
    pub auth_url: String,
    #[serde(rename = "tokenURL")]
    pub token_url: String,
    #[serde(rename = "userInfoURL")]
    pub user_info_url: String,
    pub display_name: String,
    pub pkce: Option<bool>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuth2Config {
    pub enabled: bool,
    pub mapped_fields: OAuth2KnownFields,
    pub providers: Vec<OAuth2ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MfaConfig {
    pub enabled: bool,
    pub duration: i64,
    /// Optional filter restricting which records require MFA.
    pub rule: String,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: 1800,
            rule: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OtpConfig {
    pub enabled: bool,
    pub duration: i64,
    pub length: usize,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: 180,
            length: 8,
        }
    }
}

/// Options carried only by auth collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthOptions {
    pub auth_rule: Option<String>,
    pub manage_rule: Option<String>,
    pub auth_alert_enabled: bool,
    #[serde(rename = "oauth2")]
    pub oauth2: OAuth2Config,
    pub password_auth: PasswordAuthConfig,
    pub mfa: MfaConfig,
    pub otp: OtpConfig,
    pub auth_token: TokenConfig,
    pub password_reset_token: TokenConfig,
    pub email_change_token: TokenConfig,
    pub verification_token: TokenConfig,
    pub file_token: TokenConfig,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auth_rule: Some(String::new()),
            manage_rule: None,
            auth_alert_enabled: true,
            oauth2: OAuth2Config::default(),
            password_auth: PasswordAuthConfig::default(),
            mfa: MfaConfig::default(),
            otp: OtpConfig::default(),
            auth_token: TokenConfig::generate(7 * 24 * 60 * 60),
            password_reset_token: TokenConfig::generate(30 * 60),
            email_change_token: TokenConfig::generate(30 * 60),
            verification_token: TokenConfig::generate(3 * 24 * 60 * 60),
            file_token: TokenConfig::generate(3 * 60),
        }
    }
}

impl AuthOptions {
    pub fn tokens(&self) -> [(&'static str, &TokenConfig); 5] {
        [
            ("authToken", &self.auth_token),
            ("passwordResetToken", &self.password_reset_token),
            ("emailChangeToken", &self.email_change_token),
            ("verificationToken", &self.verification_token),
            ("fileToken", &self.file_token),
        ]
    }
}

/// Options carried only by view collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewOptions {
    pub view_query: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tokens_are_valid() {
        let options = AuthOptions::default();
        for (name, token) in options.tokens() {
            assert!(token.validate().is_empty(), "{name}");
        }
    }

    #[test]
    fn test_token_bounds() {
        let short = TokenConfig { secret: "abc".into(), duration: 5 };
        let errors = short.validate();
        assert!(errors.has("secret"));
        assert!(errors.has("duration"));
    }
}
