//! Client-write guard chain
//!
//! Models the access-control hook surface for externally-originated
//! writes: a write is permitted when the deployment is insecure or some
//! allow guard grants it, and is then run through every deny guard in
//! registration order. Deny guards may mutate the payload (the schema
//! cleaning guard does); the first denial rejects the write.
//!
//! Guards carry a transform policy: a guard that respects transforms is
//! handed the payload with virtual fields materialized, while one that
//! bypasses them sees (and may mutate) the raw payload.

use std::sync::Arc;

use serde_json::Value;

/// Which write operation a guard is inspecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOp {
    Insert,
    Update,
}

/// Context handed to each guard invocation.
#[derive(Debug)]
pub struct GuardContext<'a> {
    /// Acting user, when one is known
    pub user_id: Option<&'a str>,
    /// The operation being attempted
    pub op: GuardOp,
    /// The update selector, for update operations
    pub selector: Option<&'a Value>,
}

/// Deny handler: returns `true` to reject the write. May mutate the
/// payload (document or modifier) in place.
pub type DenyFn = Arc<dyn Fn(&GuardContext<'_>, &mut Value) -> bool + Send + Sync>;

/// Allow handler: returns `true` to grant the write.
pub type AllowFn = Arc<dyn Fn(&GuardContext<'_>, &Value) -> bool + Send + Sync>;

/// A registered deny guard.
#[derive(Clone)]
pub struct DenyGuard {
    /// Name reported when this guard rejects a write
    pub name: &'static str,
    /// Hand this guard the transformed payload instead of the raw one
    pub respect_transform: bool,
    /// The handler
    pub handler: DenyFn,
}

/// A registered allow guard.
#[derive(Clone)]
pub struct AllowGuard {
    /// Name for diagnostics
    pub name: &'static str,
    /// The handler
    pub handler: AllowFn,
}

/// Ordered allow/deny guards for one collection.
#[derive(Default)]
pub struct GuardSet {
    deny: Vec<DenyGuard>,
    allow: Vec<AllowGuard>,
    allow_all: bool,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deny guard; guards run in registration order.
    pub fn register_deny(&mut self, guard: DenyGuard) {
        self.deny.push(guard);
    }

    /// Register an allow guard.
    pub fn register_allow(&mut self, guard: AllowGuard) {
        self.allow.push(guard);
    }

    /// Permit every write regardless of allow guards. Installed for
    /// deployments configured without access control, so deny guards
    /// added for schema enforcement do not restrict writes beyond the
    /// deployment's existing policy.
    pub fn allow_all(&mut self) {
        self.allow_all = true;
    }

    /// Whether any allow rule grants this write.
    pub fn permits(&self, ctx: &GuardContext<'_>, payload: &Value) -> bool {
        self.allow_all || self.allow.iter().any(|guard| (guard.handler)(ctx, payload))
    }

    /// The deny guards, in registration order.
    pub fn deny_guards(&self) -> &[DenyGuard] {
        &self.deny
    }
}
