//! Role-Based Access Control (RBAC) Module
//!
//! Roles are ordered: an admin can do everything a trainer can, and a trainer
//! everything a user can.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};

/// Role enumeration for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular app user
    User,
    /// Coach with read access to assigned athletes
    Trainer,
    /// Full system administrator
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Trainer => write!(f, "trainer"),
            Role::User => write!(f, "user"),
        }
    }
}

impl Role {
    /// Convert from string to Role, unknown names map to `User`
    pub fn from_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Role::Admin,
            "trainer" | "coach" => Role::Trainer,
            _ => Role::User,
        }
    }

    /// Check if role has admin privileges
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Whether this role grants everything `required` grants
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

/// Fail with an authorization error unless `role` satisfies `required`.
pub fn authorize_role(role: Role, required: Role) -> Result<()> {
    if role.satisfies(required) {
        Ok(())
    } else {
        Err(AppError::Authorization(format!(
            "Role '{}' is required for this resource",
            required
        )))
    }
}
