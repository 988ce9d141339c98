//! Team and membership operations

use std::sync::Arc;

use careplan_common::{Error, Result};
use careplan_notify::{NotificationEmitter, NotificationEvent};
use uuid::Uuid;

use crate::domain::entities::{
    normalize_email, Identity, InviteRole, MembershipRole, MembershipStatus, PendingInvitation,
    Team, TeamMembership,
};
use crate::repository::TeamStore;
use crate::service::{emit_quietly, identity_ref, require_active_account, team_ref};

/// Result of inviting an email address to a team
#[derive(Debug, Clone)]
pub enum InvitationOutcome {
    /// The email belongs to a registered account: a pending membership was
    /// created (or a left membership was re-invited)
    Invited(TeamMembership),
    /// No account exists for the email: a pre-signup invitation was recorded
    PendingSignup(PendingInvitation),
}

/// Partial update of a membership, applied by the leader
#[derive(Debug, Clone, Default)]
pub struct MembershipUpdate {
    pub role: Option<MembershipRole>,
    pub is_default_guardian: Option<bool>,
    pub is_default_emergency_contact: Option<bool>,
    /// `Some(None)` clears the override, `Some(Some(user))` sets it
    pub guardian_override: Option<Option<Uuid>>,
    pub emergency_contact_override: Option<Option<Uuid>>,
}

/// Partial update of a team's details, applied by the leader
#[derive(Debug, Clone, Default)]
pub struct TeamUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub team_level: Option<Option<i16>>,
}

pub struct TeamService {
    store: Arc<dyn TeamStore>,
    notifier: Arc<dyn NotificationEmitter>,
}

impl TeamService {
    pub fn new(store: Arc<dyn TeamStore>, notifier: Arc<dyn NotificationEmitter>) -> Self {
        Self { store, notifier }
    }

    /// Create a team with the actor as its active leader.
    ///
    /// The team and the leader membership are written in one transaction so
    /// no team ever exists without a leader.
    pub async fn create_team(
        &self,
        actor: &Identity,
        name: String,
        description: String,
        team_level: Option<i16>,
    ) -> Result<(Team, TeamMembership)> {
        require_active_account(actor)?;

        let team = Team::new(name, description, actor.id, team_level)?;
        if self
            .store
            .owned_team_name_exists(actor.id, &team.name)
            .await?
        {
            return Err(Error::Conflict(
                "You already have a team with this name".to_string(),
            ));
        }

        let leader = TeamMembership::new_leader(team.id, actor.id);
        self.store.create_team_with_leader(&team, &leader).await?;

        tracing::info!(team_id = %team.id, leader = %actor.id, "team created");
        Ok((team, leader))
    }

    /// Invite an email address to a team. Leader-only.
    ///
    /// A registered recipient gets a pending membership carrying the
    /// invitation token; an unregistered one gets a pre-signup invitation. A
    /// recipient who previously left is re-invited on their existing row.
    pub async fn invite_member(
        &self,
        actor: &Identity,
        team_id: Uuid,
        email: &str,
        role: InviteRole,
        message: Option<String>,
    ) -> Result<InvitationOutcome> {
        require_active_account(actor)?;
        let email = normalize_email(email)?;
        let team = self.require_active_team(team_id).await?;
        self.require_active_leader(team_id, actor.id).await?;

        // A live pre-signup invitation blocks re-inviting the email even if
        // the recipient has registered since without claiming it
        if self.store.pending_invitation_exists(team_id, &email).await? {
            return Err(Error::Conflict(
                "This email has already been invited".to_string(),
            ));
        }

        match self.store.find_identity_by_email(&email).await? {
            Some(invitee) => {
                let membership = match self
                    .store
                    .membership_by_team_and_user(team_id, invitee.id)
                    .await?
                {
                    None => {
                        let membership =
                            TeamMembership::new_invited(team_id, invitee.id, role, actor.id)?;
                        self.store.create_membership(&membership).await?;
                        membership
                    }
                    Some(mut membership) if membership.status == MembershipStatus::Left => {
                        membership.reinvite(role, actor.id)?;
                        self.store.save_membership(&membership).await?;
                        membership
                    }
                    Some(_) => {
                        return Err(Error::Conflict(
                            "This person is already a member or has a pending invitation"
                                .to_string(),
                        ));
                    }
                };

                if let Some(token) = membership.invitation_token.clone() {
                    emit_quietly(
                        self.notifier.as_ref(),
                        NotificationEvent::TeamInvitation {
                            invitee: identity_ref(&invitee),
                            team: team_ref(&team),
                            inviter: identity_ref(actor),
                            invitation_token: token,
                        },
                    )
                    .await;
                }

                tracing::info!(team_id = %team_id, invitee = %invitee.id, "member invited");
                Ok(InvitationOutcome::Invited(membership))
            }
            None => {
                let invitation = PendingInvitation::new(
                    team_id,
                    email,
                    role,
                    actor.id,
                    message.unwrap_or_default(),
                )?;
                self.store.create_pending_invitation(&invitation).await?;

                emit_quietly(
                    self.notifier.as_ref(),
                    NotificationEvent::SignupInvitation {
                        email: invitation.email.clone(),
                        team: team_ref(&team),
                        inviter: identity_ref(actor),
                        invitation_token: invitation.invitation_token.clone(),
                        message: invitation.message.clone(),
                    },
                )
                .await;

                tracing::info!(team_id = %team_id, "signup invitation recorded");
                Ok(InvitationOutcome::PendingSignup(invitation))
            }
        }
    }

    /// Accept an invitation by token: the pending membership becomes active.
    pub async fn accept_invitation(
        &self,
        actor: &Identity,
        token: &str,
    ) -> Result<TeamMembership> {
        require_active_account(actor)?;

        let mut membership = self
            .store
            .membership_by_token(token)
            .await?
            .ok_or_else(|| Error::NotFound("Invitation not found".to_string()))?;

        if membership.user_id != actor.id {
            return Err(Error::PermissionDenied(
                "This invitation was issued to someone else".to_string(),
            ));
        }

        // Expired acceptance fails with Expired; the token stays in place
        membership.accept()?;
        self.store.save_membership(&membership).await?;

        if let Some((leader, team)) = self.leader_and_team(membership.team_id).await? {
            emit_quietly(
                self.notifier.as_ref(),
                NotificationEvent::InvitationAccepted {
                    leader: identity_ref(&leader),
                    new_member: identity_ref(actor),
                    team: team_ref(&team),
                },
            )
            .await;
        }

        tracing::info!(team_id = %membership.team_id, user = %actor.id, "invitation accepted");
        Ok(membership)
    }

    /// Decline an invitation by token: the pending membership row is deleted,
    /// leaving no trace. Declining works even after expiry.
    pub async fn decline_invitation(&self, actor: &Identity, token: &str) -> Result<()> {
        require_active_account(actor)?;

        let membership = self
            .store
            .membership_by_token(token)
            .await?
            .ok_or_else(|| Error::NotFound("Invitation not found".to_string()))?;

        if membership.user_id != actor.id {
            return Err(Error::PermissionDenied(
                "This invitation was issued to someone else".to_string(),
            ));
        }

        self.store.delete_membership(membership.id).await?;
        tracing::info!(team_id = %membership.team_id, user = %actor.id, "invitation declined");
        Ok(())
    }

    /// Leave a team voluntarily. Leaders must transfer leadership or delete
    /// the team instead.
    pub async fn leave_team(&self, actor: &Identity, team_id: Uuid) -> Result<TeamMembership> {
        require_active_account(actor)?;

        let mut membership = self
            .store
            .membership_by_team_and_user(team_id, actor.id)
            .await?
            .ok_or_else(|| Error::NotFound("You are not a member of this team".to_string()))?;

        if membership.status != MembershipStatus::Active {
            return Err(Error::Validation(
                "Only active members can leave a team".to_string(),
            ));
        }

        if membership.role.is_leader() {
            return Err(Error::PermissionDenied(
                "Leaders cannot leave their team. Transfer leadership or delete the team instead."
                    .to_string(),
            ));
        }

        membership.leave()?;
        self.store.save_membership(&membership).await?;

        if let Some((leader, team)) = self.leader_and_team(team_id).await? {
            emit_quietly(
                self.notifier.as_ref(),
                NotificationEvent::MemberLeft {
                    leader: identity_ref(&leader),
                    member: identity_ref(actor),
                    team: team_ref(&team),
                },
            )
            .await;
        }

        tracing::info!(team_id = %team_id, user = %actor.id, "member left team");
        Ok(membership)
    }

    /// Remove a pending or active member. Leader-only, never on yourself.
    pub async fn remove_member(
        &self,
        actor: &Identity,
        team_id: Uuid,
        target_user: Uuid,
    ) -> Result<TeamMembership> {
        require_active_account(actor)?;
        self.require_active_leader(team_id, actor.id).await?;

        if target_user == actor.id {
            return Err(Error::Validation(
                "Leaders cannot remove themselves".to_string(),
            ));
        }

        let mut membership = self
            .store
            .membership_by_team_and_user(team_id, target_user)
            .await?
            .ok_or_else(|| Error::NotFound("Membership not found".to_string()))?;

        membership.remove()?;
        self.store.save_membership(&membership).await?;

        tracing::info!(team_id = %team_id, user = %target_user, "member removed");
        Ok(membership)
    }

    /// Hand leadership to an active, non-witness member. The role flips and
    /// the team owner column change happen in one guarded transaction.
    pub async fn transfer_leadership(
        &self,
        actor: &Identity,
        team_id: Uuid,
        target_user: Uuid,
    ) -> Result<()> {
        require_active_account(actor)?;
        self.require_active_leader(team_id, actor.id).await?;

        if target_user == actor.id {
            return Err(Error::Validation(
                "You are already the leader of this team".to_string(),
            ));
        }

        let target = self
            .store
            .membership_by_team_and_user(team_id, target_user)
            .await?
            .ok_or_else(|| Error::NotFound("Membership not found".to_string()))?;

        if target.status != MembershipStatus::Active {
            return Err(Error::Validation(
                "Leadership can only be transferred to an active member".to_string(),
            ));
        }

        if target.role == MembershipRole::Witness {
            return Err(Error::Validation(
                "Witnesses cannot lead a team".to_string(),
            ));
        }

        self.store
            .transfer_leadership(team_id, actor.id, target_user)
            .await?;

        tracing::info!(team_id = %team_id, from = %actor.id, to = %target_user, "leadership transferred");
        Ok(())
    }

    /// Update a membership's role, default-care flags, or overrides.
    /// Leader-only.
    pub async fn update_membership(
        &self,
        actor: &Identity,
        membership_id: Uuid,
        changes: MembershipUpdate,
    ) -> Result<TeamMembership> {
        require_active_account(actor)?;

        let mut membership = self
            .store
            .find_membership(membership_id)
            .await?
            .ok_or_else(|| Error::NotFound("Membership not found".to_string()))?;

        self.require_active_leader(membership.team_id, actor.id)
            .await?;

        if let Some(new_role) = changes.role {
            if new_role == MembershipRole::Leader {
                return Err(Error::Validation(
                    "Use leadership transfer to appoint a new leader".to_string(),
                ));
            }
            if membership.role.is_leader() && membership.status == MembershipStatus::Active {
                return Err(Error::Validation(
                    "A team must always have an active leader".to_string(),
                ));
            }
            membership.role = new_role;
        }

        if let Some(flag) = changes.is_default_guardian {
            membership.is_default_guardian = flag;
        }
        if let Some(flag) = changes.is_default_emergency_contact {
            membership.is_default_emergency_contact = flag;
        }

        if let Some(override_value) = changes.guardian_override {
            if let Some(agent) = override_value {
                self.require_eligible_agent(membership.team_id, agent).await?;
            }
            membership.guardian_override = override_value;
        }
        if let Some(override_value) = changes.emergency_contact_override {
            if let Some(agent) = override_value {
                self.require_eligible_agent(membership.team_id, agent).await?;
            }
            membership.emergency_contact_override = override_value;
        }

        membership.updated_at = chrono::Utc::now();
        membership.validate()?;
        self.store.save_membership(&membership).await?;

        tracing::debug!(membership_id = %membership_id, "membership updated");
        Ok(membership)
    }

    /// Resolve who acts as guardian for a membership: the override if set,
    /// otherwise the current leader when the default flag is on.
    pub async fn guardian_of(&self, membership: &TeamMembership) -> Result<Option<Uuid>> {
        if let Some(agent) = membership.guardian_override {
            return Ok(Some(agent));
        }
        if membership.is_default_guardian {
            let leader = self.store.active_leader(membership.team_id).await?;
            return Ok(leader.map(|l| l.user_id));
        }
        Ok(None)
    }

    /// Resolve who acts as emergency contact for a membership
    pub async fn emergency_contact_of(&self, membership: &TeamMembership) -> Result<Option<Uuid>> {
        if let Some(agent) = membership.emergency_contact_override {
            return Ok(Some(agent));
        }
        if membership.is_default_emergency_contact {
            let leader = self.store.active_leader(membership.team_id).await?;
            return Ok(leader.map(|l| l.user_id));
        }
        Ok(None)
    }

    /// Claim a pre-signup invitation after registering. The membership goes
    /// straight to active: the signup itself is the acceptance.
    pub async fn claim_pending_invitation(
        &self,
        actor: &Identity,
        token: &str,
    ) -> Result<TeamMembership> {
        require_active_account(actor)?;

        let invitation = self
            .store
            .pending_invitation_by_token(token)
            .await?
            .ok_or_else(|| Error::NotFound("Invitation not found".to_string()))?;

        if invitation.is_expired() {
            self.store.delete_pending_invitation(invitation.id).await?;
            return Err(Error::Expired("Invitation has expired".to_string()));
        }

        // The only failure that leaves the invitation in place: the right
        // recipient may still sign up with the invited address.
        if invitation.email != actor.email {
            return Err(Error::PermissionDenied(
                "This invitation was issued to a different email address".to_string(),
            ));
        }

        let membership = match self
            .store
            .membership_by_team_and_user(invitation.team_id, actor.id)
            .await?
        {
            Some(existing) if existing.status != MembershipStatus::Left => {
                self.store.delete_pending_invitation(invitation.id).await?;
                return Err(Error::Conflict(
                    "You are already a member of this team".to_string(),
                ));
            }
            Some(mut left) => {
                // A left membership is revived on its own row to keep the
                // one-row-per-(team, user) shape
                self.store.delete_pending_invitation(invitation.id).await?;
                left.reinvite(invitation.role, invitation.invited_by)?;
                left.accept()?;
                self.store.save_membership(&left).await?;
                left
            }
            None => {
                let membership = TeamMembership::from_claimed_invitation(&invitation, actor.id);
                self.store
                    .claim_pending_invitation(invitation.id, &membership)
                    .await?;
                membership
            }
        };

        if let Some((leader, team)) = self.leader_and_team(membership.team_id).await? {
            emit_quietly(
                self.notifier.as_ref(),
                NotificationEvent::MemberJoined {
                    leader: identity_ref(&leader),
                    new_member: identity_ref(actor),
                    team: team_ref(&team),
                },
            )
            .await;
        }

        tracing::info!(team_id = %membership.team_id, user = %actor.id, "signup invitation claimed");
        Ok(membership)
    }

    /// Update team details. Leader-only.
    pub async fn update_team(
        &self,
        actor: &Identity,
        team_id: Uuid,
        changes: TeamUpdate,
    ) -> Result<Team> {
        require_active_account(actor)?;
        let mut team = self.require_active_team(team_id).await?;
        self.require_active_leader(team_id, actor.id).await?;

        if let Some(name) = changes.name {
            if name.to_lowercase() != team.name.to_lowercase()
                && self.store.owned_team_name_exists(actor.id, &name).await?
            {
                return Err(Error::Conflict(
                    "You already have a team with this name".to_string(),
                ));
            }
            team.name = name;
        }
        if let Some(description) = changes.description {
            team.description = description;
        }
        if let Some(team_level) = changes.team_level {
            team.team_level = team_level;
        }

        team.updated_at = chrono::Utc::now();
        team.validate()?;
        self.store.save_team(&team).await?;

        tracing::debug!(team_id = %team_id, "team updated");
        Ok(team)
    }

    /// Soft-delete a team. Leader-only; memberships are left untouched.
    pub async fn delete_team(&self, actor: &Identity, team_id: Uuid) -> Result<Team> {
        require_active_account(actor)?;
        let mut team = self.require_team(team_id).await?;
        self.require_active_leader(team_id, actor.id).await?;

        if team.is_deleted() {
            return Err(Error::Conflict("Team is already deleted".to_string()));
        }

        team.soft_delete();
        self.store.save_team(&team).await?;

        tracing::info!(team_id = %team_id, "team soft-deleted");
        Ok(team)
    }

    /// Restore a soft-deleted team. Leader-only.
    pub async fn restore_team(&self, actor: &Identity, team_id: Uuid) -> Result<Team> {
        require_active_account(actor)?;
        let mut team = self.require_team(team_id).await?;
        self.require_active_leader(team_id, actor.id).await?;

        if !team.is_deleted() {
            return Err(Error::Conflict("Team is not deleted".to_string()));
        }

        team.restore();
        self.store.save_team(&team).await?;

        tracing::info!(team_id = %team_id, "team restored");
        Ok(team)
    }

    /// All memberships of a team, leaders first
    pub async fn list_members(&self, actor: &Identity, team_id: Uuid) -> Result<Vec<TeamMembership>> {
        require_active_account(actor)?;
        self.require_active_team(team_id).await?;

        // Any non-left member of the team may see the roster
        let viewer = self
            .store
            .membership_by_team_and_user(team_id, actor.id)
            .await?;
        match viewer {
            Some(m) if m.status != MembershipStatus::Left => {}
            _ => {
                return Err(Error::PermissionDenied(
                    "Only team members can view the roster".to_string(),
                ));
            }
        }

        self.store.list_memberships(team_id).await
    }

    // --- internal helpers ---

    async fn require_team(&self, team_id: Uuid) -> Result<Team> {
        self.store
            .find_team(team_id)
            .await?
            .ok_or_else(|| Error::NotFound("Team not found".to_string()))
    }

    async fn require_active_team(&self, team_id: Uuid) -> Result<Team> {
        let team = self.require_team(team_id).await?;
        if team.is_deleted() {
            return Err(Error::NotFound("Team not found".to_string()));
        }
        Ok(team)
    }

    async fn require_active_leader(&self, team_id: Uuid, user_id: Uuid) -> Result<TeamMembership> {
        let membership = self
            .store
            .membership_by_team_and_user(team_id, user_id)
            .await?;
        match membership {
            Some(m)
                if m.role.can_manage_team() && m.status == MembershipStatus::Active =>
            {
                Ok(m)
            }
            _ => Err(Error::PermissionDenied(
                "Only the team leader can perform this action".to_string(),
            )),
        }
    }

    /// Override agents must themselves be active, non-witness members
    async fn require_eligible_agent(&self, team_id: Uuid, agent: Uuid) -> Result<()> {
        let membership = self
            .store
            .membership_by_team_and_user(team_id, agent)
            .await?;
        match membership {
            Some(m)
                if m.status == MembershipStatus::Active && m.role != MembershipRole::Witness =>
            {
                Ok(())
            }
            _ => Err(Error::Validation(
                "Care agents must be active, non-witness members of the team".to_string(),
            )),
        }
    }

    async fn leader_and_team(&self, team_id: Uuid) -> Result<Option<(Identity, Team)>> {
        let Some(team) = self.store.find_team(team_id).await? else {
            return Ok(None);
        };
        let Some(leader_membership) = self.store.active_leader(team_id).await? else {
            return Ok(None);
        };
        let leader = self.store.find_identity(leader_membership.user_id).await?;
        Ok(leader.map(|leader| (leader, team)))
    }
}
