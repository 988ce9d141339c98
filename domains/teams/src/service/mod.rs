//! Service layer for the teams domain
//!
//! Each operation validates permissions and business rules, executes its
//! mutation through one atomic store call, and then emits notification events
//! fire-and-forget: a failed emission is logged and never rolls back state.

mod accounts;
mod teams;

pub use accounts::AccountService;
pub use teams::{InvitationOutcome, MembershipUpdate, TeamService, TeamUpdate};

use careplan_common::{Error, Result};
use careplan_notify::{IdentityRef, NotificationEmitter, NotificationEvent, TeamRef};

use crate::domain::entities::{Identity, Team};

fn identity_ref(identity: &Identity) -> IdentityRef {
    IdentityRef {
        id: identity.id,
        email: identity.email.clone(),
        display_name: identity.display_name.clone(),
    }
}

fn team_ref(team: &Team) -> TeamRef {
    TeamRef {
        id: team.id,
        name: team.name.clone(),
    }
}

/// Reject actors whose account is deactivated or soft-deleted
fn require_active_account(identity: &Identity) -> Result<()> {
    if !identity.is_active || identity.is_deleted() {
        return Err(Error::PermissionDenied(
            "Account is inactive".to_string(),
        ));
    }
    Ok(())
}

/// Emit an event without letting a delivery failure surface to the caller
async fn emit_quietly(notifier: &dyn NotificationEmitter, event: NotificationEvent) {
    if let Err(e) = notifier.emit(event).await {
        tracing::warn!(error = %e, "notification emission failed");
    }
}
