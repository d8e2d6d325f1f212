//! Loading callers and their grants.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_core::ids::UserId;
use strata_core::{PermissionCollection, PermissionLevel, User};
use strata_traits::PermissionStore;

use crate::error::{EngineError, EngineResult};

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    /// Effective level for the scope and variation.
    pub level: PermissionLevel,
    /// True if any grant exists anywhere under the scope, ignoring variation.
    pub has_nested_permission: bool,
}

/// Builds [`User`]s from the permission store. Users are loaded fresh per
/// call and never cached.
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
}

impl PermissionService {
    /// Create a new service.
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    /// Load a caller. `None` is the anonymous caller.
    pub async fn load_user(&self, id: Option<UserId>) -> EngineResult<User> {
        let Some(id) = id else {
            return Ok(User::anonymous());
        };

        let row = self
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", id))?;
        let rows = self.store.list_user_permissions(id).await?;
        debug!(user_id = %id, grants = rows.len(), "loaded user permissions");

        Ok(User {
            id: Some(row.id),
            email: row.email,
            global_admin: row.global_admin,
            permissions: PermissionCollection::from_rows(rows)?,
        })
    }
}
