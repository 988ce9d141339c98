//! Careplan Notification Emitter
//!
//! Membership transitions emit structured events that an email/real-time
//! dispatcher consumes. The core calls this interface fire-and-forget: a
//! failed emission is logged by the caller and never rolls back the state
//! transition that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod log;
pub mod mock;

pub use log::LogEmitter;
pub use mock::MockEmitter;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification configuration error: {0}")]
    Configuration(String),

    #[error("Notification delivery error: {0}")]
    Delivery(String),
}

/// Minimal identity payload carried by notification events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRef {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
}

/// Minimal team payload carried by notification events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: Uuid,
    pub name: String,
}

/// Structured events fired in response to membership and account transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A registered user was invited to a team (email + real-time)
    TeamInvitation {
        invitee: IdentityRef,
        team: TeamRef,
        inviter: IdentityRef,
        invitation_token: String,
    },

    /// An unregistered email was invited to a team. Email only: the
    /// recipient has no account or session for a real-time channel.
    SignupInvitation {
        email: String,
        team: TeamRef,
        inviter: IdentityRef,
        invitation_token: String,
        message: String,
    },

    /// A pending member accepted their invitation (sent to the leader)
    InvitationAccepted {
        leader: IdentityRef,
        new_member: IdentityRef,
        team: TeamRef,
    },

    /// A claimed pre-signup invitation produced a new member (sent to the leader)
    MemberJoined {
        leader: IdentityRef,
        new_member: IdentityRef,
        team: TeamRef,
    },

    /// A member left or was removed from the team (sent to the leader)
    MemberLeft {
        leader: IdentityRef,
        member: IdentityRef,
        team: TeamRef,
    },

    /// Account restoration verification code for a soft-deleted account
    RestorationCode { identity: IdentityRef, code: String },
}

impl NotificationEvent {
    /// Stable event name, used for logging and dispatcher routing
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::TeamInvitation { .. } => "team_invitation",
            NotificationEvent::SignupInvitation { .. } => "signup_invitation",
            NotificationEvent::MemberJoined { .. } => "member_joined",
            NotificationEvent::MemberLeft { .. } => "member_left",
            NotificationEvent::InvitationAccepted { .. } => "invitation_accepted",
            NotificationEvent::RestorationCode { .. } => "restoration_code",
        }
    }

    /// Email address the event should be delivered to
    pub fn recipient_email(&self) -> &str {
        match self {
            NotificationEvent::TeamInvitation { invitee, .. } => &invitee.email,
            NotificationEvent::SignupInvitation { email, .. } => email,
            NotificationEvent::MemberJoined { leader, .. } => &leader.email,
            NotificationEvent::MemberLeft { leader, .. } => &leader.email,
            NotificationEvent::InvitationAccepted { leader, .. } => &leader.email,
            NotificationEvent::RestorationCode { identity, .. } => &identity.email,
        }
    }

    /// Whether a real-time (WebSocket) delivery applies in addition to email.
    /// Signup invitations have no recipient session; restoration codes go to
    /// an account that is logged out by definition.
    pub fn has_realtime_delivery(&self) -> bool {
        !matches!(
            self,
            NotificationEvent::SignupInvitation { .. }
                | NotificationEvent::RestorationCode { .. }
        )
    }
}

/// Delivery receipt returned by emitter implementations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedReceipt {
    pub event_kind: String,
    pub emitted_at: DateTime<Utc>,
}

/// Notification emitter trait for different implementations
#[async_trait::async_trait]
pub trait NotificationEmitter: Send + Sync {
    /// Emit a notification event for asynchronous delivery
    async fn emit(&self, event: NotificationEvent) -> Result<EmittedReceipt, NotifyError>;
}
