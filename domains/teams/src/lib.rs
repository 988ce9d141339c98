//! Teams domain: identities, care teams, memberships, invitations
//!
//! The core of the care-planning backend. A team gathers members around one
//! person; membership moves through a pending/active/left state machine
//! driven by invitations, and both identities and teams carry a reversible
//! soft-delete lifecycle.

pub mod domain;
pub mod repository;
pub mod service;

// Re-export domain types at the crate root for convenience
pub use domain::entities::*;
pub use domain::state::{
    MembershipEvent, MembershipGuardContext, MembershipState, MembershipStateMachine,
};

// Re-export repository types
pub use repository::{MemoryStore, PgStore, TeamStore};

// Re-export services
pub use service::{
    AccountService, InvitationOutcome, MembershipUpdate, TeamService, TeamUpdate,
};
