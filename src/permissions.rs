//! # Permission Service
//!
//! Resolves whether a user may read, write, or share a list. Pure policy
//! over the membership rows: owners do everything, editors read and
//! write, viewers read, non-members nothing.

use crate::error::{EngineError, Result};
use crate::model::{ListId, Role, UserId};
use crate::repository::DurableStore;
use std::sync::Arc;

/// What a handler wants to do with a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Share,
}

impl Action {
    fn describe(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Share => "share",
        }
    }
}

/// The role/action policy table.
pub fn allows(role: Role, action: Action) -> bool {
    match role {
        Role::Owner => true,
        Role::Editor => matches!(action, Action::Read | Action::Write),
        Role::Viewer => matches!(action, Action::Read),
    }
}

/// Membership-backed permission checks.
pub struct PermissionService {
    repo: Arc<dyn DurableStore>,
}

impl PermissionService {
    pub fn new(repo: Arc<dyn DurableStore>) -> Self {
        Self { repo }
    }

    /// Check one `(user, list, action)` triple, returning the user's role
    /// on success.
    pub async fn check(&self, user_id: &UserId, list_id: ListId, action: Action) -> Result<Role> {
        let members = self.repo.list_members(list_id).await?;
        let role = members
            .iter()
            .find(|member| &member.user_id == user_id)
            .map(|member| member.role)
            .ok_or_else(|| {
                EngineError::PermissionDenied(format!("not a member of list {}", list_id))
            })?;

        if allows(role, action) {
            Ok(role)
        } else {
            Err(EngineError::PermissionDenied(format!(
                "role {} may not {} list {}",
                role.as_str(),
                action.describe(),
                list_id
            )))
        }
    }
}
