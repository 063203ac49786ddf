//! Validation message rendering
//!
//! Each error kind maps to one template; `{label}` is replaced with the
//! field's display label. Labels default to a humanized form of the field
//! name (`firstName` -> "First name", `created_at` -> "Created at").

use super::errors::ErrorKind;

/// Template for the given error kind.
fn template(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Required => "{label} is required",
        ErrorKind::ExpectedType => "{label} has the wrong type",
        ErrorKind::NotAllowed => "{label} is not an allowed field",
        ErrorKind::InsertNotAllowed => "{label} cannot be set during an insert",
        ErrorKind::UpdateNotAllowed => "{label} cannot be changed during an update",
        ErrorKind::NotUnique => "{label} must be unique",
    }
}

/// Render the message for an error kind and field label.
pub fn message_for(kind: ErrorKind, label: &str) -> String {
    template(kind).replace("{label}", label)
}

/// Humanize a field name into a display label.
///
/// Splits camelCase and snake_case, capitalizes the first word. The last
/// path segment is used for dotted paths.
pub fn humanize(field_name: &str) -> String {
    let leaf = field_name.rsplit('.').next().unwrap_or(field_name);
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for c in leaf.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(current.clone());
                current.clear();
            }
        } else if c.is_uppercase() && !current.is_empty() {
            words.push(current.clone());
            current.clear();
            current.push(c.to_ascii_lowercase());
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    if words.is_empty() {
        return leaf.to_string();
    }

    let mut label = words.join(" ");
    let mut chars = label.chars();
    if let Some(first) = chars.next() {
        label = first.to_uppercase().collect::<String>() + chars.as_str();
    }
    label
}
