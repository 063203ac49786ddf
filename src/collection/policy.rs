//! Field policy rules
//!
//! Pure functions of (field definition, candidate value, operation kind):
//! - `DenyInsertRule` rejects a `deny_insert` field present in an insert,
//! - `DenyUpdateRule` rejects a `deny_update` field under any modifier
//!   operator, except a `$set` carrying null, which is treated as a
//!   no-op and permitted.

use serde_json::Value;

use crate::schema::{ErrorKind, FieldRule, RuleContext, RuleField};

/// Enforces the `deny_insert` field flag.
pub struct DenyInsertRule;

impl FieldRule for DenyInsertRule {
    fn check(&self, field: &RuleField<'_>, ctx: &RuleContext<'_>) -> Option<ErrorKind> {
        if ctx.operation.is_insert() && field.def.deny_insert && field.value.is_some() {
            return Some(ErrorKind::InsertNotAllowed);
        }
        None
    }
}

/// Enforces the `deny_update` field flag.
pub struct DenyUpdateRule;

impl FieldRule for DenyUpdateRule {
    fn check(&self, field: &RuleField<'_>, ctx: &RuleContext<'_>) -> Option<ErrorKind> {
        if ctx.operation.is_insert() || !field.def.deny_update {
            return None;
        }
        let operator = field.operator?;
        // `$set` to null assigns nothing; permit it.
        if operator == "$set" && matches!(field.value, None | Some(Value::Null)) {
            return None;
        }
        Some(ErrorKind::UpdateNotAllowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, OperationContext, OperationKind};
    use serde_json::json;

    fn check_insert(def: &FieldDef, value: Option<&Value>) -> Option<ErrorKind> {
        let op = OperationContext::trusted(OperationKind::Insert);
        let ctx = RuleContext {
            operation: &op,
            selector: None,
        };
        DenyInsertRule.check(
            &RuleField {
                name: "f",
                def,
                value,
                operator: None,
            },
            &ctx,
        )
    }

    fn check_update(
        def: &FieldDef,
        value: Option<&Value>,
        operator: Option<&str>,
        kind: OperationKind,
    ) -> Option<ErrorKind> {
        let op = OperationContext::trusted(kind);
        let ctx = RuleContext {
            operation: &op,
            selector: None,
        };
        DenyUpdateRule.check(
            &RuleField {
                name: "f",
                def,
                value,
                operator,
            },
            &ctx,
        )
    }

    #[test]
    fn test_deny_insert_rejects_any_value() {
        let def = FieldDef::int().deny_insert();
        let five = json!(5);
        let zero = json!(0);
        assert_eq!(check_insert(&def, Some(&five)), Some(ErrorKind::InsertNotAllowed));
        assert_eq!(check_insert(&def, Some(&zero)), Some(ErrorKind::InsertNotAllowed));
        assert_eq!(check_insert(&def, None), None);
    }

    #[test]
    fn test_deny_insert_ignores_plain_fields() {
        let def = FieldDef::int();
        let five = json!(5);
        assert_eq!(check_insert(&def, Some(&five)), None);
    }

    #[test]
    fn test_deny_update_rejects_set() {
        let def = FieldDef::int().deny_update();
        let five = json!(5);
        assert_eq!(
            check_update(&def, Some(&five), Some("$set"), OperationKind::Update),
            Some(ErrorKind::UpdateNotAllowed)
        );
    }

    #[test]
    fn test_deny_update_permits_null_set() {
        let def = FieldDef::int().deny_update();
        let null = Value::Null;
        assert_eq!(
            check_update(&def, Some(&null), Some("$set"), OperationKind::Update),
            None
        );
    }

    #[test]
    fn test_deny_update_rejects_other_operators() {
        let def = FieldDef::int().deny_update();
        let one = json!(1);
        assert_eq!(
            check_update(&def, Some(&one), Some("$inc"), OperationKind::Update),
            Some(ErrorKind::UpdateNotAllowed)
        );
        let empty = json!("");
        assert_eq!(
            check_update(&def, Some(&empty), Some("$unset"), OperationKind::Update),
            Some(ErrorKind::UpdateNotAllowed)
        );
    }

    #[test]
    fn test_deny_update_applies_to_upserts() {
        let def = FieldDef::int().deny_update();
        let one = json!(1);
        assert_eq!(
            check_update(&def, Some(&one), Some("$set"), OperationKind::Upsert),
            Some(ErrorKind::UpdateNotAllowed)
        );
    }

    #[test]
    fn test_deny_update_ignores_inserts() {
        let def = FieldDef::int().deny_update();
        let one = json!(1);
        assert_eq!(check_update(&def, Some(&one), None, OperationKind::Insert), None);
    }
}
