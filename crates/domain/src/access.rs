//! Caller identity and authorization data.
//!
//! An [`AccessContext`] is built once per request — from a validated bearer
//! token, or from the dev-mode / bypass shims — and is immutable for the
//! turn. The orchestrator never interprets the row-scoping fields; they are
//! forwarded opaquely to tool servers inside every outbound call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hash;

/// Row-level data scope, passed through to tool servers unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessScope {
    #[serde(default)]
    pub account_ids: BTreeSet<String>,
    #[serde(default)]
    pub all_accounts: bool,
    #[serde(default)]
    pub owned_only: bool,
    #[serde(default)]
    pub team_access: bool,
}

/// Complete access context for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scope: AccessScope,
}

impl AccessContext {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            tenant_id: None,
            roles,
            scope: AccessScope::default(),
        }
    }

    /// Synthetic admin context used when dev mode is enabled.
    pub fn dev_admin() -> Self {
        Self {
            user_id: "dev@example.com".into(),
            email: Some("dev@example.com".into()),
            tenant_id: Some("dev-tenant".into()),
            roles: vec!["admin".into()],
            scope: AccessScope {
                all_accounts: true,
                ..AccessScope::default()
            },
        }
    }

    /// Context synthesized when token validation is bypassed: the caller's
    /// declared user id, no roles, no scope.
    pub fn bypass(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Vec::new())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    /// The `access_context` object injected into every outbound tool call.
    pub fn to_wire(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "email": self.email,
            "tenant_id": self.tenant_id,
            "roles": self.roles,
            "access_scope": {
                "account_ids": self.scope.account_ids,
                "all_accounts": self.scope.all_accounts,
                "owned_only": self.scope.owned_only,
                "team_access": self.scope.team_access,
            },
        })
    }

    /// Fingerprint of everything that affects what this caller may see.
    ///
    /// Cache keys embed this hash, so callers with different scopes never
    /// share cached tool results. Roles are sorted before hashing: two
    /// tokens listing the same roles in a different order are the same
    /// scope.
    pub fn scope_hash(&self) -> String {
        let mut roles: Vec<&str> = self.roles.iter().map(String::as_str).collect();
        roles.sort_unstable();
        let fingerprint = json!({
            "user_id": self.user_id,
            "tenant_id": self.tenant_id,
            "roles": roles,
            "scope": self.scope,
        });
        hash::hash_value(&fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_hash_ignores_role_order() {
        let a = AccessContext::new("u1", vec!["sales".into(), "support".into()]);
        let b = AccessContext::new("u1", vec!["support".into(), "sales".into()]);
        assert_eq!(a.scope_hash(), b.scope_hash());
    }

    #[test]
    fn scope_hash_differs_per_user() {
        let a = AccessContext::new("u1", vec!["sales".into()]);
        let b = AccessContext::new("u2", vec!["sales".into()]);
        assert_ne!(a.scope_hash(), b.scope_hash());
    }

    #[test]
    fn scope_hash_differs_per_roles() {
        let a = AccessContext::new("u1", vec!["sales".into()]);
        let b = AccessContext::new("u1", vec!["admin".into()]);
        assert_ne!(a.scope_hash(), b.scope_hash());
    }

    #[test]
    fn scope_hash_reflects_data_scope() {
        let a = AccessContext::new("u1", vec![]);
        let mut b = AccessContext::new("u1", vec![]);
        b.scope.all_accounts = true;
        assert_ne!(a.scope_hash(), b.scope_hash());
    }

    #[test]
    fn wire_form_carries_identity_and_scope() {
        let ctx = AccessContext::new("u1", vec!["sales".into()]);
        let wire = ctx.to_wire();
        assert_eq!(wire["user_id"], "u1");
        assert_eq!(wire["roles"][0], "sales");
        assert_eq!(wire["access_scope"]["all_accounts"], false);
    }

    #[test]
    fn dev_admin_has_admin_role_and_full_scope() {
        let ctx = AccessContext::dev_admin();
        assert!(ctx.is_admin());
        assert!(ctx.scope.all_accounts);
    }

    #[test]
    fn bypass_context_has_no_roles() {
        let ctx = AccessContext::bypass("someone");
        assert_eq!(ctx.user_id, "someone");
        assert!(ctx.roles.is_empty());
        assert!(!ctx.is_admin());
    }
}
