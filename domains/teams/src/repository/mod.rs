//! Storage layer for the teams domain
//!
//! `TeamStore` is the single storage seam the services operate through. Each
//! multi-row mutation is exposed as one method so implementations can make it
//! atomic: `PgStore` wraps those methods in a database transaction,
//! `MemoryStore` holds all state behind one lock.
//!
//! Services check the business rules before calling in; the store-level
//! constraints (unique emails, unique tokens, one membership per team and
//! user) are the last-resort guard against concurrent writers and surface as
//! `Error::Conflict`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use careplan_common::Result;
use uuid::Uuid;

use crate::domain::entities::{Identity, PendingInvitation, Team, TeamMembership};

#[async_trait]
pub trait TeamStore: Send + Sync {
    // --- identities ---

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>>;

    /// Look up an identity by email, case-insensitively
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>>;

    async fn create_identity(&self, identity: &Identity) -> Result<()>;

    async fn save_identity(&self, identity: &Identity) -> Result<()>;

    // --- teams ---

    /// Fetch a team by id, including soft-deleted teams (restore needs them)
    async fn find_team(&self, id: Uuid) -> Result<Option<Team>>;

    /// Check whether the owner already has a non-deleted team with this name
    /// (case-insensitive)
    async fn owned_team_name_exists(&self, owner: Uuid, name: &str) -> Result<bool>;

    /// Create a team together with its leader membership, all-or-nothing
    async fn create_team_with_leader(&self, team: &Team, leader: &TeamMembership) -> Result<()>;

    async fn save_team(&self, team: &Team) -> Result<()>;

    // --- memberships ---

    async fn find_membership(&self, id: Uuid) -> Result<Option<TeamMembership>>;

    async fn membership_by_team_and_user(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TeamMembership>>;

    async fn membership_by_token(&self, token: &str) -> Result<Option<TeamMembership>>;

    /// The team's current leader: role leader, status active
    async fn active_leader(&self, team_id: Uuid) -> Result<Option<TeamMembership>>;

    async fn list_memberships(&self, team_id: Uuid) -> Result<Vec<TeamMembership>>;

    async fn list_active_memberships(&self, team_id: Uuid) -> Result<Vec<TeamMembership>>;

    async fn create_membership(&self, membership: &TeamMembership) -> Result<()>;

    async fn save_membership(&self, membership: &TeamMembership) -> Result<()>;

    async fn delete_membership(&self, id: Uuid) -> Result<()>;

    /// Atomically demote the current leader, promote the target, and update
    /// the team's owner column. The updates are guarded on the current roles;
    /// a stale read is rejected as `Conflict` rather than producing a team
    /// with two leaders.
    async fn transfer_leadership(&self, team_id: Uuid, from_user: Uuid, to_user: Uuid)
        -> Result<()>;

    // --- pending (pre-signup) invitations ---

    async fn pending_invitation_by_token(&self, token: &str) -> Result<Option<PendingInvitation>>;

    async fn pending_invitation_exists(&self, team_id: Uuid, email: &str) -> Result<bool>;

    async fn create_pending_invitation(&self, invitation: &PendingInvitation) -> Result<()>;

    async fn delete_pending_invitation(&self, id: Uuid) -> Result<()>;

    /// Atomically consume the pre-signup invitation and insert the resulting
    /// membership. Fails with `Conflict` when the invitation was already
    /// claimed by a concurrent call.
    async fn claim_pending_invitation(
        &self,
        invitation_id: Uuid,
        membership: &TeamMembership,
    ) -> Result<()>;
}
