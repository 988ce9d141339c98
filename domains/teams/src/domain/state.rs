//! Membership state machine
//!
//! A team membership moves through three statuses: pending (invited, not yet
//! accepted), active, and left. The machine defines:
//! - Valid states
//! - Events that trigger transitions
//! - Guard conditions for transitions
//!
//! There are no terminal states: a left member can be invited again, which
//! moves the same membership row back to pending with a fresh token.

use careplan_common::StateError;
use serde::{Deserialize, Serialize};

/// Membership states. Stored directly as the membership status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipState {
    Pending,
    Active,
    Left,
}

impl MembershipState {
    /// Get all valid next states from current state
    pub fn valid_transitions(&self) -> &'static [MembershipState] {
        match self {
            Self::Pending => &[Self::Active, Self::Left],
            Self::Active => &[Self::Left],
            Self::Left => &[Self::Pending],
        }
    }
}

impl std::fmt::Display for MembershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Left => write!(f, "left"),
        }
    }
}

/// Events that trigger membership state transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MembershipEvent {
    /// Invitee accepts a pending invitation
    Accept,
    /// Active member leaves the team voluntarily
    Leave,
    /// Leader removes a pending or active member
    Remove,
    /// Leader invites a member who previously left
    Reinvite,
}

impl std::fmt::Display for MembershipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Leave => write!(f, "leave"),
            Self::Remove => write!(f, "remove"),
            Self::Reinvite => write!(f, "reinvite"),
        }
    }
}

/// Guard context for membership transitions
#[derive(Debug, Clone)]
pub struct MembershipGuardContext {
    /// Whether the invitation has expired (invitation_expires_at < now)
    pub is_expired: bool,
}

/// Membership state machine
pub struct MembershipStateMachine;

impl MembershipStateMachine {
    /// Attempt a state transition with guard conditions
    pub fn transition(
        current: MembershipState,
        event: MembershipEvent,
        context: Option<&MembershipGuardContext>,
    ) -> Result<MembershipState, StateError> {
        let next = match (&current, &event) {
            // From Pending
            (MembershipState::Pending, MembershipEvent::Accept) => {
                // Guard: invitation must not be expired
                if let Some(ctx) = context {
                    if ctx.is_expired {
                        return Err(StateError::GuardFailed(
                            "Cannot accept expired invitation".to_string(),
                        ));
                    }
                }
                MembershipState::Active
            }
            (MembershipState::Pending, MembershipEvent::Remove) => MembershipState::Left,

            // From Active
            (MembershipState::Active, MembershipEvent::Leave) => MembershipState::Left,
            (MembershipState::Active, MembershipEvent::Remove) => MembershipState::Left,

            // From Left
            (MembershipState::Left, MembershipEvent::Reinvite) => MembershipState::Pending,

            // Invalid transitions
            _ => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    to: "unknown".to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition(
        current: MembershipState,
        event: &MembershipEvent,
        context: Option<&MembershipGuardContext>,
    ) -> bool {
        Self::transition(current, *event, context).is_ok()
    }
}
