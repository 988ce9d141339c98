//! Account lifecycle operations: soft deletion and restoration
//!
//! Deletion is reversible for a grace period. During that window the owner
//! can request a short-lived restoration code by email and use it to
//! reactivate the account; afterwards the record awaits permanent erasure by
//! an external batch job.

use std::sync::Arc;

use careplan_common::{Error, Result};
use careplan_notify::{NotificationEmitter, NotificationEvent};
use chrono::Utc;
use uuid::Uuid;

use crate::domain::entities::Identity;
use crate::repository::TeamStore;
use crate::service::{emit_quietly, identity_ref};

pub struct AccountService {
    store: Arc<dyn TeamStore>,
    notifier: Arc<dyn NotificationEmitter>,
}

impl AccountService {
    pub fn new(store: Arc<dyn TeamStore>, notifier: Arc<dyn NotificationEmitter>) -> Self {
        Self { store, notifier }
    }

    /// Soft-delete an account: deactivated immediately, restorable during the
    /// grace period. Memberships are left untouched.
    pub async fn soft_delete_account(&self, identity_id: Uuid) -> Result<Identity> {
        let mut identity = self.require_identity(identity_id).await?;

        if identity.is_deleted() {
            return Err(Error::Conflict("Account is already deleted".to_string()));
        }

        identity.soft_delete();
        self.store.save_identity(&identity).await?;

        tracing::info!(identity_id = %identity_id, "account soft-deleted");
        Ok(identity)
    }

    /// Issue a restoration code for a soft-deleted account and email it.
    ///
    /// Refused once the grace period has passed (`Error::Expired`).
    pub async fn request_restoration(&self, email: &str) -> Result<()> {
        let mut identity = self
            .store
            .find_identity_by_email(email)
            .await?
            .ok_or_else(|| Error::NotFound("Account not found".to_string()))?;

        let code = identity.issue_restoration_code(Utc::now())?;
        self.store.save_identity(&identity).await?;

        emit_quietly(
            self.notifier.as_ref(),
            NotificationEvent::RestorationCode {
                identity: identity_ref(&identity),
                code,
            },
        )
        .await;

        tracing::info!(identity_id = %identity.id, "restoration code issued");
        Ok(())
    }

    /// Verify a restoration code and reactivate the account
    pub async fn restore_account(&self, email: &str, code: &str) -> Result<Identity> {
        let mut identity = self
            .store
            .find_identity_by_email(email)
            .await?
            .ok_or_else(|| Error::NotFound("Account not found".to_string()))?;

        identity.verify_restoration_code(code, Utc::now())?;
        self.store.save_identity(&identity).await?;

        tracing::info!(identity_id = %identity.id, "account restored");
        Ok(identity)
    }

    /// Confirm the email address with the code issued at registration
    pub async fn verify_email(&self, identity_id: Uuid, code: &str) -> Result<Identity> {
        let mut identity = self.require_identity(identity_id).await?;

        identity.verify_email(code)?;
        self.store.save_identity(&identity).await?;

        tracing::info!(identity_id = %identity_id, "email verified");
        Ok(identity)
    }

    async fn require_identity(&self, identity_id: Uuid) -> Result<Identity> {
        self.store
            .find_identity(identity_id)
            .await?
            .ok_or_else(|| Error::NotFound("Account not found".to_string()))
    }
}
