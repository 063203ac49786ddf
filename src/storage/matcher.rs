//! Selector evaluation
//!
//! Matches documents against query selectors. Exact matching only: no
//! type coercion beyond cross-width numeric comparison. Supports plain
//! equality plus `$ne`, `$exists`, `$in`, and the ordering operators the
//! uniqueness checker needs.

use serde_json::Value;

/// Checks whether a document matches a selector.
///
/// All selector entries must match (AND semantics). A non-object selector
/// matches nothing.
pub fn matches(document: &Value, selector: &Value) -> bool {
    let Some(conditions) = selector.as_object() else {
        return false;
    };
    conditions
        .iter()
        .all(|(path, condition)| matches_condition(document, path, condition))
}

fn matches_condition(document: &Value, path: &str, condition: &Value) -> bool {
    let field_value = resolve_path(document, path);

    if let Some(ops) = operator_object(condition) {
        return ops.iter().all(|(op, operand)| {
            matches_operator(field_value, op, operand)
        });
    }

    // Plain equality; a missing field never matches.
    match field_value {
        Some(actual) => values_equal(actual, condition),
        None => false,
    }
}

fn matches_operator(field_value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        // A missing field is "not equal" to any value.
        "$ne" => match field_value {
            Some(actual) => !values_equal(actual, operand),
            None => true,
        },
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            field_value.is_some() == wanted
        }
        "$in" => match (field_value, operand.as_array()) {
            (Some(actual), Some(candidates)) => {
                candidates.iter().any(|c| values_equal(actual, c))
            }
            _ => false,
        },
        "$gt" => compare(field_value, operand).map_or(false, |o| o == std::cmp::Ordering::Greater),
        "$gte" => compare(field_value, operand)
            .map_or(false, |o| o != std::cmp::Ordering::Less),
        "$lt" => compare(field_value, operand).map_or(false, |o| o == std::cmp::Ordering::Less),
        "$lte" => compare(field_value, operand)
            .map_or(false, |o| o != std::cmp::Ordering::Greater),
        _ => false,
    }
}

fn compare(field_value: Option<&Value>, operand: &Value) -> Option<std::cmp::Ordering> {
    let actual = field_value?;
    match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64()?, b.as_f64()?);
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Strict equality with cross-width numeric comparison.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(xf), Some(yf)) => xf == yf,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Resolve a dotted path against a document.
pub fn resolve_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether a selector entry is an operator object (`{"$ne": ...}`).
fn operator_object(condition: &Value) -> Option<&serde_json::Map<String, Value>> {
    let obj = condition.as_object()?;
    if !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')) {
        Some(obj)
    } else {
        None
    }
}

/// Extract the plain equality constraints of a selector.
///
/// Operator entries and `$`-prefixed logical keys are skipped. Used to
/// seed the insert branch of an upsert.
pub fn equality_fields(selector: &Value) -> Vec<(String, Value)> {
    let Some(conditions) = selector.as_object() else {
        return Vec::new();
    };
    conditions
        .iter()
        .filter(|(path, condition)| {
            !path.starts_with('$') && operator_object(condition).is_none()
        })
        .map(|(path, condition)| (path.clone(), condition.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_match() {
        let doc = json!({ "status": "open", "count": 3 });
        assert!(matches(&doc, &json!({ "status": "open" })));
        assert!(!matches(&doc, &json!({ "status": "closed" })));
        assert!(matches(&doc, &json!({ "status": "open", "count": 3 })));
        assert!(!matches(&doc, &json!({ "missing": 1 })));
    }

    #[test]
    fn test_numeric_cross_width_equality() {
        let doc = json!({ "n": 3 });
        assert!(matches(&doc, &json!({ "n": 3.0 })));
    }

    #[test]
    fn test_ne_matches_missing_field() {
        let doc = json!({ "a": 1 });
        assert!(matches(&doc, &json!({ "b": { "$ne": "X" } })));
        assert!(matches(&doc, &json!({ "a": { "$ne": 2 } })));
        assert!(!matches(&doc, &json!({ "a": { "$ne": 1 } })));
    }

    #[test]
    fn test_exists() {
        let doc = json!({ "a": 1 });
        assert!(matches(&doc, &json!({ "a": { "$exists": true } })));
        assert!(matches(&doc, &json!({ "b": { "$exists": false } })));
        assert!(!matches(&doc, &json!({ "b": { "$exists": true } })));
    }

    #[test]
    fn test_in() {
        let doc = json!({ "status": "open" });
        assert!(matches(&doc, &json!({ "status": { "$in": ["open", "held"] } })));
        assert!(!matches(&doc, &json!({ "status": { "$in": ["closed"] } })));
    }

    #[test]
    fn test_ordering_operators() {
        let doc = json!({ "n": 5, "s": "m" });
        assert!(matches(&doc, &json!({ "n": { "$gt": 4 } })));
        assert!(matches(&doc, &json!({ "n": { "$gte": 5 } })));
        assert!(matches(&doc, &json!({ "n": { "$lt": 6 } })));
        assert!(!matches(&doc, &json!({ "n": { "$lt": 5 } })));
        assert!(matches(&doc, &json!({ "s": { "$gt": "a" } })));
        // Cross-type comparisons never match.
        assert!(!matches(&doc, &json!({ "s": { "$gt": 1 } })));
    }

    #[test]
    fn test_dotted_path_resolution() {
        let doc = json!({ "address": { "city": "NYC" } });
        assert!(matches(&doc, &json!({ "address.city": "NYC" })));
        assert!(!matches(&doc, &json!({ "address.zip": "10001" })));
    }

    #[test]
    fn test_equality_fields_extraction() {
        let selector = json!({
            "status": "open",
            "count": { "$gt": 1 },
            "$comment": "x"
        });
        let fields = equality_fields(&selector);
        assert_eq!(fields, vec![("status".to_string(), json!("open"))]);
    }

    #[test]
    fn test_empty_operator_object_is_equality() {
        // {} as a condition is an equality match against an empty object.
        let doc = json!({ "a": {} });
        assert!(matches(&doc, &json!({ "a": {} })));
    }
}
