//! Naming conventions that drive foreign-key and index inference.
//!
//! Kept separate from type mapping so an explicit annotation scheme can replace
//! it without touching the compiler.

/// Longest identifier the target engine keeps without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Suffix marking a field as a reference to another table's `id`.
pub const RELATIONSHIP_SUFFIX: &str = "_id";

/// Field names that are indexed even without a relationship suffix.
pub const COMMON_LOOKUP_FIELDS: &[&str] = &[
    "name",
    "email",
    "slug",
    "status",
    "type",
    "username",
];

const COMPANY_FIELD: &str = "company_id";
const COMPANY_TABLE: &str = "companies";

/// Table referenced by `field_name`, if the name follows the relationship convention.
///
/// `company_id` always points at `companies`; every other `<stem>_id` points at
/// `pluralize(stem)`. The literal `id` is never a reference.
#[must_use]
pub fn relationship_target(field_name: &str) -> Option<String> {
    if field_name == "id" {
        return None;
    }
    if field_name == COMPANY_FIELD {
        return Some(COMPANY_TABLE.to_string());
    }
    let stem = field_name.strip_suffix(RELATIONSHIP_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    Some(pluralize(stem))
}

/// Four-rule English plural. Irregular plurals are not handled.
#[must_use]
pub fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        return format!("{stem}ies");
    }
    let sibilant = ["s", "sh", "ch", "x", "z"]
        .iter()
        .any(|suffix| word.ends_with(suffix));
    if sibilant {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

/// Whether the compiler should emit an index for this field.
#[must_use]
pub fn wants_index(field_name: &str) -> bool {
    COMMON_LOOKUP_FIELDS.contains(&field_name) || relationship_target(field_name).is_some()
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most [`MAX_IDENTIFIER_LEN`] bytes.
#[must_use]
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Lowercases and replaces everything outside `[a-z0-9_]` with `_`.
#[must_use]
pub fn sanitize_identifier(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '_' {
                lower
            } else {
                '_'
            }
        })
        .collect()
}

/// Double-quoted identifier with embedded quotes doubled.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
