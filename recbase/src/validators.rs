use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use email_address::EmailAddress;
use regex::Regex;
use url::Url;

/// Storage format of date values (`2024-01-02 15:04:05.000Z`).
pub const DATE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").expect("name pattern is valid"));

static HEX_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("color pattern is valid"));

static HEX_COLOR_ALPHA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{4}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").expect("color pattern is valid")
});

/// Returns `true` if the provided string is a syntactically valid email address.
pub fn is_valid_email(value: &str) -> bool {
    EmailAddress::is_valid(value)
}

/// Returns `true` if the provided string parses as an absolute http(s) URL.
pub fn is_valid_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// Identifier rule shared by collection and field names.
pub fn is_valid_name(value: &str) -> bool {
    NAME_RE.is_match(value)
}

pub fn is_valid_color(value: &str, allow_alpha: bool) -> bool {
    if allow_alpha {
        HEX_COLOR_ALPHA_RE.is_match(value)
    } else {
        HEX_COLOR_RE.is_match(value)
    }
}

/// Extracts the lowercased domain of an email address or URL host.
pub fn email_domain(value: &str) -> Option<String> {
    value.rsplit_once('@').map(|(_, domain)| domain.to_lowercase())
}

pub fn url_domain(value: &str) -> Option<String> {
    Url::parse(value).ok().and_then(|url| url.host_str().map(str::to_lowercase))
}

/// Parses the accepted date notations into UTC.
///
/// Accepts RFC 3339, the storage layout, `YYYY-MM-DD HH:MM:SS` and plain `YYYY-MM-DD`.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let normalized = value.trim_end_matches('Z').replace('T', " ");
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&normalized, layout) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.format(DATE_LAYOUT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("test@example.com"));
        assert!(!is_valid_email("invalid"));
        assert_eq!(email_domain("a@Example.COM").as_deref(), Some("example.com"));
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_url("https://example.com/a?b=1"));
        assert!(!is_valid_url("not-a-url"));
        assert!(!is_valid_url("mailto:test@example.com"));
        assert_eq!(url_domain("https://Sub.Example.com/x").as_deref(), Some("sub.example.com"));
    }

    #[test]
    fn date_parsing_accepts_common_layouts() {
        let expected = "2024-01-02 03:04:05.000Z";
        for raw in ["2024-01-02T03:04:05Z", "2024-01-02 03:04:05", "2024-01-02 03:04:05.000Z"] {
            let parsed = parse_datetime(raw).unwrap();
            assert_eq!(format_datetime(&parsed), expected, "{raw}");
        }
        assert_eq!(format_datetime(&parse_datetime("2024-01-02").unwrap()), "2024-01-02 00:00:00.000Z");
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn color_and_name_validation() {
        assert!(is_valid_color("#fff", false));
        assert!(is_valid_color("#A0B1C2", false));
        assert!(!is_valid_color("#A0B1C2FF", false));
        assert!(is_valid_color("#A0B1C2FF", true));
        assert!(is_valid_name("title_2"));
        assert!(!is_valid_name("bad-name"));
    }
}
