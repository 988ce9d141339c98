//! In-memory implementation of `TeamStore`
//!
//! Mirrors the database constraints (unique emails, unique tokens, one
//! membership per team and user) so service-level tests exercise the same
//! conflict paths without a running database. Also usable for local wiring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use careplan_common::{Error, Result};
use uuid::Uuid;

use crate::domain::entities::{
    Identity, MembershipRole, MembershipStatus, PendingInvitation, Team, TeamMembership,
};
use crate::repository::TeamStore;

#[derive(Debug, Default)]
struct MemoryState {
    identities: HashMap<Uuid, Identity>,
    teams: HashMap<Uuid, Team>,
    memberships: HashMap<Uuid, TeamMembership>,
    pending_invitations: HashMap<Uuid, PendingInvitation>,
}

/// In-memory team store, shared state behind one lock
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store mutex poisoned")
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.state().identities.get(&id).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let email = email.to_lowercase();
        Ok(self
            .state()
            .identities
            .values()
            .find(|i| i.email == email)
            .cloned())
    }

    async fn create_identity(&self, identity: &Identity) -> Result<()> {
        let mut state = self.state();
        if state
            .identities
            .values()
            .any(|i| i.email == identity.email)
        {
            return Err(Error::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }
        state.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn save_identity(&self, identity: &Identity) -> Result<()> {
        let mut state = self.state();
        if !state.identities.contains_key(&identity.id) {
            return Err(Error::NotFound("Identity not found".to_string()));
        }
        state.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn find_team(&self, id: Uuid) -> Result<Option<Team>> {
        Ok(self.state().teams.get(&id).cloned())
    }

    async fn owned_team_name_exists(&self, owner: Uuid, name: &str) -> Result<bool> {
        let name = name.to_lowercase();
        Ok(self.state().teams.values().any(|t| {
            t.created_by == owner && t.deleted_at.is_none() && t.name.to_lowercase() == name
        }))
    }

    async fn create_team_with_leader(&self, team: &Team, leader: &TeamMembership) -> Result<()> {
        let mut state = self.state();
        state.teams.insert(team.id, team.clone());
        state.memberships.insert(leader.id, leader.clone());
        Ok(())
    }

    async fn save_team(&self, team: &Team) -> Result<()> {
        let mut state = self.state();
        if !state.teams.contains_key(&team.id) {
            return Err(Error::NotFound("Team not found".to_string()));
        }
        state.teams.insert(team.id, team.clone());
        Ok(())
    }

    async fn find_membership(&self, id: Uuid) -> Result<Option<TeamMembership>> {
        Ok(self.state().memberships.get(&id).cloned())
    }

    async fn membership_by_team_and_user(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TeamMembership>> {
        Ok(self
            .state()
            .memberships
            .values()
            .find(|m| m.team_id == team_id && m.user_id == user_id)
            .cloned())
    }

    async fn membership_by_token(&self, token: &str) -> Result<Option<TeamMembership>> {
        Ok(self
            .state()
            .memberships
            .values()
            .find(|m| m.invitation_token.as_deref() == Some(token))
            .cloned())
    }

    async fn active_leader(&self, team_id: Uuid) -> Result<Option<TeamMembership>> {
        Ok(self
            .state()
            .memberships
            .values()
            .find(|m| {
                m.team_id == team_id
                    && m.role == MembershipRole::Leader
                    && m.status == MembershipStatus::Active
            })
            .cloned())
    }

    async fn list_memberships(&self, team_id: Uuid) -> Result<Vec<TeamMembership>> {
        let mut memberships: Vec<TeamMembership> = self
            .state()
            .memberships
            .values()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| (m.role as u8, m.created_at));
        Ok(memberships)
    }

    async fn list_active_memberships(&self, team_id: Uuid) -> Result<Vec<TeamMembership>> {
        let mut memberships: Vec<TeamMembership> = self
            .state()
            .memberships
            .values()
            .filter(|m| m.team_id == team_id && m.status == MembershipStatus::Active)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| (m.role as u8, m.created_at));
        Ok(memberships)
    }

    async fn create_membership(&self, membership: &TeamMembership) -> Result<()> {
        let mut state = self.state();
        if state
            .memberships
            .values()
            .any(|m| m.team_id == membership.team_id && m.user_id == membership.user_id)
        {
            return Err(Error::Conflict(
                "Membership already exists for this user".to_string(),
            ));
        }
        state.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn save_membership(&self, membership: &TeamMembership) -> Result<()> {
        let mut state = self.state();
        if !state.memberships.contains_key(&membership.id) {
            return Err(Error::NotFound("Membership not found".to_string()));
        }
        state.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn delete_membership(&self, id: Uuid) -> Result<()> {
        let mut state = self.state();
        state
            .memberships
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound("Membership not found".to_string()))
    }

    async fn transfer_leadership(
        &self,
        team_id: Uuid,
        from_user: Uuid,
        to_user: Uuid,
    ) -> Result<()> {
        let mut state = self.state();

        let leader_id = state
            .memberships
            .values()
            .find(|m| {
                m.team_id == team_id
                    && m.user_id == from_user
                    && m.role == MembershipRole::Leader
                    && m.status == MembershipStatus::Active
            })
            .map(|m| m.id)
            .ok_or_else(|| Error::Conflict("Leadership changed concurrently".to_string()))?;

        let target_id = state
            .memberships
            .values()
            .find(|m| {
                m.team_id == team_id
                    && m.user_id == to_user
                    && m.role == MembershipRole::Member
                    && m.status == MembershipStatus::Active
            })
            .map(|m| m.id)
            .ok_or_else(|| {
                Error::Conflict("Target membership changed concurrently".to_string())
            })?;

        let now = chrono::Utc::now();
        if let Some(leader) = state.memberships.get_mut(&leader_id) {
            leader.role = MembershipRole::Member;
            leader.updated_at = now;
        }
        if let Some(target) = state.memberships.get_mut(&target_id) {
            target.role = MembershipRole::Leader;
            target.updated_at = now;
        }
        if let Some(team) = state.teams.get_mut(&team_id) {
            team.created_by = to_user;
            team.updated_at = now;
        }

        Ok(())
    }

    async fn pending_invitation_by_token(&self, token: &str) -> Result<Option<PendingInvitation>> {
        Ok(self
            .state()
            .pending_invitations
            .values()
            .find(|i| i.invitation_token == token)
            .cloned())
    }

    async fn pending_invitation_exists(&self, team_id: Uuid, email: &str) -> Result<bool> {
        let email = email.to_lowercase();
        Ok(self
            .state()
            .pending_invitations
            .values()
            .any(|i| i.team_id == team_id && i.email == email))
    }

    async fn create_pending_invitation(&self, invitation: &PendingInvitation) -> Result<()> {
        let mut state = self.state();
        if state
            .pending_invitations
            .values()
            .any(|i| i.team_id == invitation.team_id && i.email == invitation.email)
        {
            return Err(Error::Conflict(
                "This email has already been invited".to_string(),
            ));
        }
        state
            .pending_invitations
            .insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn delete_pending_invitation(&self, id: Uuid) -> Result<()> {
        let mut state = self.state();
        state
            .pending_invitations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound("Invitation not found".to_string()))
    }

    async fn claim_pending_invitation(
        &self,
        invitation_id: Uuid,
        membership: &TeamMembership,
    ) -> Result<()> {
        let mut state = self.state();

        if state.pending_invitations.remove(&invitation_id).is_none() {
            return Err(Error::Conflict(
                "Invitation was already claimed".to_string(),
            ));
        }

        if state
            .memberships
            .values()
            .any(|m| m.team_id == membership.team_id && m.user_id == membership.user_id)
        {
            return Err(Error::Conflict(
                "Membership already exists for this user".to_string(),
            ));
        }
        state.memberships.insert(membership.id, membership.clone());
        Ok(())
    }
}
