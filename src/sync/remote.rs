//! Collaborator interfaces consumed by the sync engine

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{PartialRecordPayload, RecordPayload, RemoteId};

/// Authenticated identity the remote store requires for every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Remote record store. Any error counts as a failed attempt.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn remote_create(&self, principal: &Principal, payload: &RecordPayload) -> Result<RemoteId>;

    async fn remote_update(
        &self,
        principal: &Principal,
        id: &RemoteId,
        patch: &PartialRecordPayload,
    ) -> Result<()>;

    async fn remote_delete(&self, principal: &Principal, id: &RemoteId) -> Result<()>;
}

/// Resolves the signed-in principal; consulted once per sync pass
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn current_principal(&self) -> Result<Principal>;
}

/// Resolver returning a fixed principal, or failing when signed out
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipal {
    principal: Option<Principal>,
}

impl StaticPrincipal {
    pub fn signed_in(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    pub fn signed_out() -> Self {
        Self { principal: None }
    }
}

#[async_trait]
impl PrincipalResolver for StaticPrincipal {
    async fn current_principal(&self) -> Result<Principal> {
        self.principal
            .clone()
            .ok_or_else(|| SyncError::Principal("no signed-in user".to_string()))
    }
}
