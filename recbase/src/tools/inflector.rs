use std::sync::LazyLock;

use regex::Regex;

static COLUMNIFY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\.\*\-@#]+").expect("columnify pattern is valid"));

/// Strips every character that is not allowed in a plain column or table identifier.
pub fn columnify(value: &str) -> String {
    COLUMNIFY_RE.replace_all(value, "").into_owned()
}

/// Converts `SomeValue-with spaces` into `some_value_with_spaces`.
pub fn snakecase(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columnify_drops_quotes_and_spaces() {
        assert_eq!(columnify("demo1.`title` ;--"), "demo1.title--");
        assert_eq!(columnify("@request.auth.id"), "@request.auth.id");
    }

    #[test]
    fn snakecase_normalizes_names() {
        assert_eq!(snakecase("My File-Name 2"), "my_file_name_2");
        assert_eq!(snakecase("camelCaseName"), "camel_case_name");
    }
}
