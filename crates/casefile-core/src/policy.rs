//! Permission checks, passed into services as an explicit [`Access`] value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An action on a specific operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOperation(i64),
    ModifyOperation(i64),
    DeleteOperation(i64),
    ModifyEvidenceOfOperation(i64),
    ModifyFindingsOfOperation(i64),
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::ReadOperation(id) => write!(f, "read operation {}", id),
            Permission::ModifyOperation(id) => write!(f, "modify operation {}", id),
            Permission::DeleteOperation(id) => write!(f, "delete operation {}", id),
            Permission::ModifyEvidenceOfOperation(id) => {
                write!(f, "modify evidence of operation {}", id)
            }
            Permission::ModifyFindingsOfOperation(id) => {
                write!(f, "modify findings of operation {}", id)
            }
        }
    }
}

/// Decides whether a permission is granted.
pub trait Policy: Send + Sync + fmt::Debug {
    fn check(&self, permission: Permission) -> bool;
}

/// Grants nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deny;

impl Policy for Deny {
    fn check(&self, _permission: Permission) -> bool {
        false
    }
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullAccess;

impl Policy for FullAccess {
    fn check(&self, _permission: Permission) -> bool {
        true
    }
}

/// Role a user holds on one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationRole {
    Admin,
    Write,
    Read,
}

impl OperationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationRole::Admin => "admin",
            OperationRole::Write => "write",
            OperationRole::Read => "read",
        }
    }

    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "admin" => Some(OperationRole::Admin),
            "write" => Some(OperationRole::Write),
            "read" => Some(OperationRole::Read),
            _ => None,
        }
    }
}

/// Grants permissions from the caller's per-operation roles.
///
/// Headless callers (API keys used by automation) may read and add
/// evidence or findings, but never modify or delete an operation itself.
#[derive(Debug, Clone, Default)]
pub struct OperationRolePolicy {
    pub user_id: i64,
    pub is_headless: bool,
    pub roles: HashMap<i64, OperationRole>,
}

impl OperationRolePolicy {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn with_role(mut self, operation_id: i64, role: OperationRole) -> Self {
        self.roles.insert(operation_id, role);
        self
    }

    pub fn headless(mut self) -> Self {
        self.is_headless = true;
        self
    }

    fn has_role(&self, operation_id: i64, allowed: &[OperationRole]) -> bool {
        self.roles
            .get(&operation_id)
            .is_some_and(|role| allowed.contains(role))
    }
}

impl Policy for OperationRolePolicy {
    fn check(&self, permission: Permission) -> bool {
        use OperationRole::*;
        match permission {
            Permission::DeleteOperation(id) => self.has_role(id, &[Admin]),
            Permission::ModifyOperation(id) => self.has_role(id, &[Admin, Write]),
            Permission::ModifyEvidenceOfOperation(id) | Permission::ModifyFindingsOfOperation(id) => {
                self.has_role(id, &[Admin, Write]) || self.is_headless
            }
            Permission::ReadOperation(id) => {
                self.has_role(id, &[Admin, Write, Read]) || self.is_headless
            }
        }
    }
}

/// The caller's capability, passed explicitly to every service call.
///
/// `bypass_policy` is set for super-admins acting across operations they
/// hold no role on.
#[derive(Debug, Clone)]
pub struct Access {
    pub policy: Arc<dyn Policy>,
    pub bypass_policy: bool,
}

impl Access {
    pub fn new(policy: Arc<dyn Policy>) -> Self {
        Self {
            policy,
            bypass_policy: false,
        }
    }

    /// Capability that passes every check.
    pub fn bypass() -> Self {
        Self {
            policy: Arc::new(Deny),
            bypass_policy: true,
        }
    }

    /// Fail with `Error::Forbidden` unless every permission is granted.
    pub fn require(&self, permissions: &[Permission]) -> Result<()> {
        if self.bypass_policy {
            return Ok(());
        }
        match permissions.iter().find(|p| !self.policy.check(**p)) {
            Some(denied) => Err(Error::Forbidden(format!("not permitted to {}", denied))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_rules() {
        let policy = OperationRolePolicy::new(1)
            .with_role(10, OperationRole::Admin)
            .with_role(20, OperationRole::Write)
            .with_role(30, OperationRole::Read);

        assert!(policy.check(Permission::DeleteOperation(10)));
        assert!(!policy.check(Permission::DeleteOperation(20)));
        assert!(policy.check(Permission::ModifyOperation(20)));
        assert!(!policy.check(Permission::ModifyOperation(30)));
        assert!(policy.check(Permission::ReadOperation(30)));
        assert!(!policy.check(Permission::ReadOperation(40)));
    }

    #[test]
    fn test_headless_rules() {
        let policy = OperationRolePolicy::new(1).headless();

        assert!(policy.check(Permission::ReadOperation(5)));
        assert!(policy.check(Permission::ModifyEvidenceOfOperation(5)));
        assert!(policy.check(Permission::ModifyFindingsOfOperation(5)));
        assert!(!policy.check(Permission::ModifyOperation(5)));
        assert!(!policy.check(Permission::DeleteOperation(5)));
    }

    #[test]
    fn test_access_require_all() {
        let access = Access::new(Arc::new(
            OperationRolePolicy::new(1).with_role(1, OperationRole::Write),
        ));

        assert!(access.require(&[Permission::ModifyOperation(1)]).is_ok());
        let err = access
            .require(&[Permission::ModifyOperation(1), Permission::ModifyOperation(2)])
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(ref msg) if msg.contains("modify operation 2")));
    }

    #[test]
    fn test_access_bypass() {
        let access = Access::bypass();
        assert!(access.require(&[Permission::DeleteOperation(99)]).is_ok());
    }

    #[test]
    fn test_deny_and_full_access() {
        assert!(Access::new(Arc::new(Deny))
            .require(&[Permission::ReadOperation(1)])
            .is_err());
        assert!(Access::new(Arc::new(FullAccess))
            .require(&[Permission::DeleteOperation(1)])
            .is_ok());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(OperationRole::parse("write"), Some(OperationRole::Write));
        assert_eq!(OperationRole::parse("owner"), None);
        assert_eq!(OperationRole::Admin.as_str(), "admin");
    }
}
