use nanoid::nanoid;

use crate::tools::security::{LOWER_ALPHANUM, crc32_checksum, pseudorandom_string};

/// Default record id length.
pub const RECORD_ID_LENGTH: usize = 15;

/// Prefix of generated collection ids.
pub const COLLECTION_ID_PREFIX: &str = "pbc_";

/// Autogenerate pattern of the default `id` primary key field.
pub const DEFAULT_ID_AUTOGENERATE_PATTERN: &str = "[a-z0-9]{15}";

/// Validation pattern of the default `id` primary key field.
pub const DEFAULT_ID_PATTERN: &str = "^[a-z0-9]+$";

/// Generates a new record identifier.
pub fn generate_record_id() -> String {
    nanoid!(RECORD_ID_LENGTH, LOWER_ALPHANUM)
}

/// Deterministic collection id derived from the collection type and name.
pub fn collection_id(kind: &str, name: &str) -> String {
    format!("{COLLECTION_ID_PREFIX}{}", crc32_checksum(&format!("{kind}{name}")))
}

/// Collection id with an extra random suffix, used when the deterministic one is taken.
pub fn collection_id_with_suffix(kind: &str, name: &str) -> String {
    format!("{}{}", collection_id(kind, name), pseudorandom_string(5).to_lowercase())
}

/// Deterministic field id derived from the field type and name.
pub fn field_id(field_type: &str, name: &str) -> String {
    format!("{field_type}{}", crc32_checksum(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_has_expected_length_and_charset() {
        let id = generate_record_id();
        assert_eq!(id.len(), RECORD_ID_LENGTH);
        assert!(id.chars().all(|c| LOWER_ALPHANUM.contains(&c)));
    }

    #[test]
    fn derived_ids_are_stable() {
        assert_eq!(collection_id("base", "demo1"), collection_id("base", "demo1"));
        assert_ne!(collection_id("base", "demo1"), collection_id("auth", "demo1"));
        assert!(collection_id("base", "demo1").starts_with(COLLECTION_ID_PREFIX));
        assert_eq!(field_id("text", "title"), format!("text{}", crc32_checksum("title")));
    }
}
