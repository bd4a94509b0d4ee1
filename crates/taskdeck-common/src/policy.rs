//! Role → capability policy.
//!
//! | Role   | View | Edit | Delete | ManageMembers |
//! |--------|------|------|--------|---------------|
//! | Owner  | yes  | yes  | yes    | yes           |
//! | Editor | yes  | yes  | no     | no            |
//! | Viewer | yes  | no   | no     | no            |
//!
//! A caller without a membership row holds no capability at all, which is
//! expressed by evaluating against `Option<Role>`.

use serde::{Deserialize, Serialize};

use crate::types::Role;

/// A named permission checked before an operation proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Edit,
    Delete,
    ManageMembers,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::ManageMembers => "manage_members",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            Role::Owner => true,
            Role::Editor => matches!(capability, Capability::View | Capability::Edit),
            Role::Viewer => capability == Capability::View,
        }
    }
}

/// Evaluate the policy for a caller whose membership may be absent.
pub fn is_allowed(role: Option<Role>, capability: Capability) -> bool {
    role.is_some_and(|r| r.allows(capability))
}
