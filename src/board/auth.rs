//! Authentication and authorization for the board API.
//!
//! Authentication resolves a bearer token to a user before any handler body
//! runs: handlers take a [`Caller`] argument, and the extractor rejects the
//! request with 401 when the token is missing or unknown. Authorization is a
//! role lookup in the project's membership set, evaluated against the
//! policy in `taskdeck_common::policy`.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use sha2::{Digest, Sha256};
use taskdeck_common::{Capability, Role, policy};

use super::api::{ApiError, SharedState};
use super::db::DbHandle;
use super::models::UserSummary;
use crate::errors::BoardError;

/// SHA-256 hex digest of an API token; only digests are stored.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Fresh random API token handed to a user exactly once.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated identity of the current request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: UserSummary,
}

impl Caller {
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

impl FromRequestParts<SharedState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(BoardError::Unauthenticated)?;
        let digest = hash_token(token);
        let user = state
            .db
            .call(move |db| db.find_user_by_token_hash(&digest))
            .await?
            .ok_or(BoardError::Unauthenticated)?;
        tracing::debug!(user_id = %user.id, "authenticated request");
        Ok(Caller { user })
    }
}

/// Capability checks against project membership.
#[derive(Clone)]
pub struct Authorizer {
    db: DbHandle,
}

impl Authorizer {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// The caller's role in the project; `None` for non-members and for
    /// projects that do not exist.
    pub async fn role(&self, caller_id: &str, project_id: &str) -> anyhow::Result<Option<Role>> {
        let caller_id = caller_id.to_string();
        let project_id = project_id.to_string();
        self.db
            .call(move |db| db.member_role(&project_id, &caller_id))
            .await
    }

    pub async fn allows(
        &self,
        caller_id: &str,
        project_id: &str,
        capability: Capability,
    ) -> anyhow::Result<bool> {
        let role = self.role(caller_id, project_id).await?;
        Ok(policy::is_allowed(role, capability))
    }

    pub async fn can_view(&self, caller_id: &str, project_id: &str) -> anyhow::Result<bool> {
        self.allows(caller_id, project_id, Capability::View).await
    }

    pub async fn can_edit(&self, caller_id: &str, project_id: &str) -> anyhow::Result<bool> {
        self.allows(caller_id, project_id, Capability::Edit).await
    }

    pub async fn can_delete(&self, caller_id: &str, project_id: &str) -> anyhow::Result<bool> {
        self.allows(caller_id, project_id, Capability::Delete).await
    }

    pub async fn can_manage_members(
        &self,
        caller_id: &str,
        project_id: &str,
    ) -> anyhow::Result<bool> {
        self.allows(caller_id, project_id, Capability::ManageMembers)
            .await
    }

    /// Turn a failed check into `PermissionDenied`.
    pub async fn require(
        &self,
        caller: &Caller,
        project_id: &str,
        capability: Capability,
    ) -> Result<(), BoardError> {
        if self.allows(caller.id(), project_id, capability).await? {
            Ok(())
        } else {
            tracing::info!(
                user_id = %caller.id(),
                project_id,
                %capability,
                "permission denied"
            );
            Err(BoardError::PermissionDenied)
        }
    }
}
