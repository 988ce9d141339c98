//! Service-level flows driven through the in-memory store and mock emitter.
//! No database required.

use std::sync::Arc;

use careplan_common::Error;
use careplan_notify::{MockEmitter, NotificationEvent};
use careplan_teams::{
    AccountService, Identity, InvitationOutcome, InviteRole, MembershipRole, MembershipStatus,
    MembershipUpdate, MemoryStore, Team, TeamMembership, TeamService, TeamStore, TeamUpdate,
};
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    emitter: Arc<MockEmitter>,
    teams: TeamService,
    accounts: AccountService,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let emitter = Arc::new(MockEmitter::new());
    let teams = TeamService::new(store.clone(), emitter.clone());
    let accounts = AccountService::new(store.clone(), emitter.clone());
    Harness {
        store,
        emitter,
        teams,
        accounts,
    }
}

async fn register(harness: &Harness, email: &str, name: &str) -> Identity {
    let identity = Identity::new(email.to_string(), "hash".to_string(), name.to_string()).unwrap();
    harness.store.create_identity(&identity).await.unwrap();
    identity
}

async fn team_with_leader(harness: &Harness) -> (Identity, Team) {
    let leader = register(harness, "leader@example.com", "Leader").await;
    let (team, _) = harness
        .teams
        .create_team(&leader, "Care Team".to_string(), String::new(), Some(1))
        .await
        .unwrap();
    (leader, team)
}

/// Invite a registered member and accept the invitation
async fn add_member(
    harness: &Harness,
    leader: &Identity,
    team: &Team,
    member: &Identity,
    role: InviteRole,
) -> TeamMembership {
    let outcome = harness
        .teams
        .invite_member(leader, team.id, &member.email, role, None)
        .await
        .unwrap();
    let token = match outcome {
        InvitationOutcome::Invited(m) => m.invitation_token.unwrap(),
        InvitationOutcome::PendingSignup(_) => panic!("expected a membership invitation"),
    };
    harness
        .teams
        .accept_invitation(member, &token)
        .await
        .unwrap()
}

// ============================================================================
// Team creation
// ============================================================================

#[tokio::test]
async fn create_team_installs_active_leader() {
    let h = harness();
    let leader = register(&h, "leader@example.com", "Leader").await;

    let (team, membership) = h
        .teams
        .create_team(&leader, "Care Team".to_string(), String::new(), Some(2))
        .await
        .unwrap();

    assert_eq!(team.created_by, leader.id);
    assert_eq!(membership.role, MembershipRole::Leader);
    assert_eq!(membership.status, MembershipStatus::Active);
    assert!(membership.is_default_guardian);
    assert!(membership.is_default_emergency_contact);
    assert!(membership.joined_at.is_some());
}

#[tokio::test]
async fn create_team_duplicate_name_is_case_insensitive_conflict() {
    let h = harness();
    let leader = register(&h, "leader@example.com", "Leader").await;

    h.teams
        .create_team(&leader, "Care Team".to_string(), String::new(), None)
        .await
        .unwrap();

    let result = h
        .teams
        .create_team(&leader, "CARE TEAM".to_string(), String::new(), None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    // A different person can reuse the name
    let other = register(&h, "other@example.com", "Other").await;
    assert!(h
        .teams
        .create_team(&other, "Care Team".to_string(), String::new(), None)
        .await
        .is_ok());
}

// ============================================================================
// Inviting registered users
// ============================================================================

#[tokio::test]
async fn invite_registered_user_creates_pending_membership_and_notifies() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let invitee = register(&h, "member@example.com", "Member").await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "Member@Example.com", InviteRole::Member, None)
        .await
        .unwrap();

    let membership = match outcome {
        InvitationOutcome::Invited(m) => m,
        _ => panic!("expected a membership invitation"),
    };
    assert_eq!(membership.user_id, invitee.id);
    assert_eq!(membership.status, MembershipStatus::Pending);
    assert_eq!(membership.invited_by, Some(leader.id));
    assert!(membership.invitation_token.is_some());

    let events = h.emitter.events_of_kind("team_invitation");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.recipient_email(), "member@example.com");
}

#[tokio::test]
async fn invite_requires_leader_role() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let other = register(&h, "other@example.com", "Other").await;
    let result = h
        .teams
        .invite_member(&member, team.id, &other.email, InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

#[tokio::test]
async fn invite_existing_member_conflicts() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let result = h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn invite_pending_member_conflicts_before_acceptance() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;

    h.teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await
        .unwrap();

    // The first invitation is still pending
    let result = h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn invite_rejects_invalid_email() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let result = h
        .teams
        .invite_member(&leader, team.id, "not-an-email", InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

// ============================================================================
// Accept / decline
// ============================================================================

#[tokio::test]
async fn accept_invitation_activates_and_clears_token() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;

    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    assert_eq!(membership.status, MembershipStatus::Active);
    assert!(membership.joined_at.is_some());
    assert!(membership.invitation_token.is_none());

    // Leader is told about the acceptance
    let events = h.emitter.events_of_kind("invitation_accepted");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.recipient_email(), "leader@example.com");
}

#[tokio::test]
async fn accept_with_consumed_token_is_not_found() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await
        .unwrap();
    let token = match outcome {
        InvitationOutcome::Invited(m) => m.invitation_token.unwrap(),
        _ => panic!("expected a membership invitation"),
    };

    h.teams.accept_invitation(&member, &token).await.unwrap();

    // Acceptance clears the token, so a replay no longer resolves
    let result = h.teams.accept_invitation(&member, &token).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn accept_invitation_for_someone_else_denied() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    register(&h, "member@example.com", "Member").await;
    let outsider = register(&h, "outsider@example.com", "Outsider").await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "member@example.com", InviteRole::Member, None)
        .await
        .unwrap();
    let token = match outcome {
        InvitationOutcome::Invited(m) => m.invitation_token.unwrap(),
        _ => panic!("expected a membership invitation"),
    };

    let result = h.teams.accept_invitation(&outsider, &token).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

#[tokio::test]
async fn accept_expired_invitation_fails_with_expired_and_keeps_token() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await
        .unwrap();
    let mut membership = match outcome {
        InvitationOutcome::Invited(m) => m,
        _ => panic!("expected a membership invitation"),
    };

    // Force the window shut
    membership.invitation_expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    h.store.save_membership(&membership).await.unwrap();

    let token = membership.invitation_token.clone().unwrap();
    let result = h.teams.accept_invitation(&member, &token).await;
    assert!(matches!(result, Err(Error::Expired(_))));

    // Still pending, token intact
    let reloaded = h
        .store
        .find_membership(membership.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, MembershipStatus::Pending);
    assert_eq!(reloaded.invitation_token, Some(token));
}

#[tokio::test]
async fn decline_invitation_deletes_the_membership() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await
        .unwrap();
    let membership = match outcome {
        InvitationOutcome::Invited(m) => m,
        _ => panic!("expected a membership invitation"),
    };
    let token = membership.invitation_token.clone().unwrap();

    h.teams.decline_invitation(&member, &token).await.unwrap();

    assert!(h
        .store
        .find_membership(membership.id)
        .await
        .unwrap()
        .is_none());

    // Declining leaves no trace: the same person can be invited again
    assert!(h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Member, None)
        .await
        .is_ok());
}

// ============================================================================
// Leaving and removal
// ============================================================================

#[tokio::test]
async fn leave_team_marks_left_and_notifies_leader() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let membership = h.teams.leave_team(&member, team.id).await.unwrap();

    assert_eq!(membership.status, MembershipStatus::Left);
    assert!(membership.left_at.is_some());

    let events = h.emitter.events_of_kind("member_left");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.recipient_email(), "leader@example.com");
}

#[tokio::test]
async fn leader_cannot_leave_their_team() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let result = h.teams.leave_team(&leader, team.id).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

#[tokio::test]
async fn remove_member_is_leader_only_and_never_self() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let witness = register(&h, "witness@example.com", "Witness").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;
    add_member(&h, &leader, &team, &witness, InviteRole::Witness).await;

    // A member cannot remove anyone
    let result = h.teams.remove_member(&member, team.id, witness.id).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));

    // The leader cannot remove themselves
    let result = h.teams.remove_member(&leader, team.id, leader.id).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    // The leader removes the member
    let removed = h
        .teams
        .remove_member(&leader, team.id, member.id)
        .await
        .unwrap();
    assert_eq!(removed.status, MembershipStatus::Left);
}

#[tokio::test]
async fn remove_pending_member_clears_token() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    register(&h, "member@example.com", "Member").await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "member@example.com", InviteRole::Member, None)
        .await
        .unwrap();
    let membership = match outcome {
        InvitationOutcome::Invited(m) => m,
        _ => panic!("expected a membership invitation"),
    };

    let removed = h
        .teams
        .remove_member(&leader, team.id, membership.user_id)
        .await
        .unwrap();
    assert_eq!(removed.status, MembershipStatus::Left);
    assert!(removed.invitation_token.is_none());
}

// ============================================================================
// Re-invitation after leaving
// ============================================================================

#[tokio::test]
async fn reinvite_after_leave_reuses_the_membership_row() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;

    let original = add_member(&h, &leader, &team, &member, InviteRole::Member).await;
    h.teams.leave_team(&member, team.id).await.unwrap();

    let outcome = h
        .teams
        .invite_member(&leader, team.id, &member.email, InviteRole::Witness, None)
        .await
        .unwrap();
    let reinvited = match outcome {
        InvitationOutcome::Invited(m) => m,
        _ => panic!("expected a membership invitation"),
    };

    assert_eq!(reinvited.id, original.id);
    assert_eq!(reinvited.status, MembershipStatus::Pending);
    assert_eq!(reinvited.role, MembershipRole::Witness);
    assert!(reinvited.invitation_token.is_some());

    // And the new invitation can be accepted
    let token = reinvited.invitation_token.unwrap();
    let accepted = h.teams.accept_invitation(&member, &token).await.unwrap();
    assert_eq!(accepted.status, MembershipStatus::Active);
}

// ============================================================================
// Leadership transfer
// ============================================================================

#[tokio::test]
async fn transfer_leadership_flips_roles_and_team_owner() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    h.teams
        .transfer_leadership(&leader, team.id, member.id)
        .await
        .unwrap();

    let new_leader = h.store.active_leader(team.id).await.unwrap().unwrap();
    assert_eq!(new_leader.user_id, member.id);

    let old = h
        .store
        .membership_by_team_and_user(team.id, leader.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.role, MembershipRole::Member);
    assert_eq!(old.status, MembershipStatus::Active);

    let team = h.store.find_team(team.id).await.unwrap().unwrap();
    assert_eq!(team.created_by, member.id);
}

#[tokio::test]
async fn transfer_leadership_rejects_witness_target() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let witness = register(&h, "witness@example.com", "Witness").await;
    add_member(&h, &leader, &team, &witness, InviteRole::Witness).await;

    let result = h
        .teams
        .transfer_leadership(&leader, team.id, witness.id)
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn transfer_leadership_rejects_pending_target_and_non_leader_actor() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let pending = register(&h, "pending@example.com", "Pending").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;
    h.teams
        .invite_member(&leader, team.id, &pending.email, InviteRole::Member, None)
        .await
        .unwrap();

    let result = h
        .teams
        .transfer_leadership(&leader, team.id, pending.id)
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = h
        .teams
        .transfer_leadership(&member, team.id, member.id)
        .await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

// ============================================================================
// Membership updates
// ============================================================================

#[tokio::test]
async fn update_membership_cannot_demote_the_only_leader() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let leader_membership = h
        .store
        .membership_by_team_and_user(team.id, leader.id)
        .await
        .unwrap()
        .unwrap();

    let result = h
        .teams
        .update_membership(
            &leader,
            leader_membership.id,
            MembershipUpdate {
                role: Some(MembershipRole::Member),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn update_membership_cannot_promote_to_leader() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let result = h
        .teams
        .update_membership(
            &leader,
            membership.id,
            MembershipUpdate {
                role: Some(MembershipRole::Leader),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn update_membership_witness_cannot_carry_overrides() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let witness = register(&h, "witness@example.com", "Witness").await;
    let membership = add_member(&h, &leader, &team, &witness, InviteRole::Witness).await;

    let result = h
        .teams
        .update_membership(
            &leader,
            membership.id,
            MembershipUpdate {
                guardian_override: Some(Some(leader.id)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn update_membership_sets_flags_and_overrides() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let agent = register(&h, "agent@example.com", "Agent").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;
    add_member(&h, &leader, &team, &agent, InviteRole::Member).await;

    let updated = h
        .teams
        .update_membership(
            &leader,
            membership.id,
            MembershipUpdate {
                is_default_guardian: Some(false),
                guardian_override: Some(Some(agent.id)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!updated.is_default_guardian);
    assert_eq!(updated.guardian_override, Some(agent.id));
}

// ============================================================================
// Guardian / emergency contact resolution
// ============================================================================

#[tokio::test]
async fn care_agents_default_to_the_current_leader() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    assert_eq!(
        h.teams.guardian_of(&membership).await.unwrap(),
        Some(leader.id)
    );
    assert_eq!(
        h.teams.emergency_contact_of(&membership).await.unwrap(),
        Some(leader.id)
    );
}

#[tokio::test]
async fn care_agent_override_wins_over_the_default() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let agent = register(&h, "agent@example.com", "Agent").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;
    add_member(&h, &leader, &team, &agent, InviteRole::Member).await;

    let updated = h
        .teams
        .update_membership(
            &leader,
            membership.id,
            MembershipUpdate {
                guardian_override: Some(Some(agent.id)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(h.teams.guardian_of(&updated).await.unwrap(), Some(agent.id));
    // Emergency contact still follows the default
    assert_eq!(
        h.teams.emergency_contact_of(&updated).await.unwrap(),
        Some(leader.id)
    );
}

#[tokio::test]
async fn care_agent_resolution_without_default_or_override_is_none() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let updated = h
        .teams
        .update_membership(
            &leader,
            membership.id,
            MembershipUpdate {
                is_default_guardian: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(h.teams.guardian_of(&updated).await.unwrap(), None);
}

#[tokio::test]
async fn care_agent_default_follows_leadership_transfer() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let successor = register(&h, "successor@example.com", "Successor").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;
    add_member(&h, &leader, &team, &successor, InviteRole::Member).await;

    h.teams
        .transfer_leadership(&leader, team.id, successor.id)
        .await
        .unwrap();

    assert_eq!(
        h.teams.guardian_of(&membership).await.unwrap(),
        Some(successor.id)
    );
}

// ============================================================================
// Pre-signup invitations
// ============================================================================

#[tokio::test]
async fn invite_unregistered_email_records_pending_invitation() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let outcome = h
        .teams
        .invite_member(
            &leader,
            team.id,
            "NewPerson@Example.com",
            InviteRole::Member,
            Some("Join us".to_string()),
        )
        .await
        .unwrap();

    let invitation = match outcome {
        InvitationOutcome::PendingSignup(i) => i,
        _ => panic!("expected a pre-signup invitation"),
    };
    assert_eq!(invitation.email, "newperson@example.com");
    assert_eq!(invitation.message, "Join us");

    let events = h.emitter.events_of_kind("signup_invitation");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.recipient_email(), "newperson@example.com");

    // Re-inviting the same email conflicts
    let result = h
        .teams
        .invite_member(&leader, team.id, "newperson@example.com", InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn unclaimed_invitation_blocks_reinvite_after_registration() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "new@example.com", InviteRole::Member, None)
        .await
        .unwrap();
    assert!(matches!(outcome, InvitationOutcome::PendingSignup(_)));

    // The recipient registers but never claims the invitation
    let newcomer = register(&h, "new@example.com", "Newcomer").await;

    let result = h
        .teams
        .invite_member(&leader, team.id, "new@example.com", InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    // No membership was created alongside the live invitation
    assert!(h
        .store
        .membership_by_team_and_user(team.id, newcomer.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn claim_pending_invitation_activates_immediately() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "new@example.com", InviteRole::Witness, None)
        .await
        .unwrap();
    let invitation = match outcome {
        InvitationOutcome::PendingSignup(i) => i,
        _ => panic!("expected a pre-signup invitation"),
    };

    let newcomer = register(&h, "new@example.com", "Newcomer").await;
    let membership = h
        .teams
        .claim_pending_invitation(&newcomer, &invitation.invitation_token)
        .await
        .unwrap();

    // Straight to active: the signup is the acceptance
    assert_eq!(membership.status, MembershipStatus::Active);
    assert_eq!(membership.role, MembershipRole::Witness);
    assert_eq!(membership.invited_by, Some(leader.id));
    assert!(membership.joined_at.is_some());

    // Invitation is consumed
    assert!(h
        .store
        .pending_invitation_by_token(&invitation.invitation_token)
        .await
        .unwrap()
        .is_none());

    let events = h.emitter.events_of_kind("member_joined");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.recipient_email(), "leader@example.com");
}

#[tokio::test]
async fn claim_with_wrong_email_is_denied_and_preserves_invitation() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "intended@example.com", InviteRole::Member, None)
        .await
        .unwrap();
    let invitation = match outcome {
        InvitationOutcome::PendingSignup(i) => i,
        _ => panic!("expected a pre-signup invitation"),
    };

    let imposter = register(&h, "imposter@example.com", "Imposter").await;
    let result = h
        .teams
        .claim_pending_invitation(&imposter, &invitation.invitation_token)
        .await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));

    // The intended recipient can still claim it
    assert!(h
        .store
        .pending_invitation_by_token(&invitation.invitation_token)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn claim_expired_invitation_is_gone_and_deleted() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;

    let outcome = h
        .teams
        .invite_member(&leader, team.id, "new@example.com", InviteRole::Member, None)
        .await
        .unwrap();
    let mut invitation = match outcome {
        InvitationOutcome::PendingSignup(i) => i,
        _ => panic!("expected a pre-signup invitation"),
    };

    // Expire it: delete + recreate with a past expiry, keeping the token
    h.store
        .delete_pending_invitation(invitation.id)
        .await
        .unwrap();
    invitation.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);
    h.store
        .create_pending_invitation(&invitation)
        .await
        .unwrap();

    let newcomer = register(&h, "new@example.com", "Newcomer").await;
    let result = h
        .teams
        .claim_pending_invitation(&newcomer, &invitation.invitation_token)
        .await;
    assert!(matches!(result, Err(Error::Expired(_))));

    // Expired invitations are cleaned up on contact
    assert!(h
        .store
        .pending_invitation_by_token(&invitation.invitation_token)
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Team update / soft delete
// ============================================================================

#[tokio::test]
async fn update_team_is_leader_only() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let result = h
        .teams
        .update_team(
            &member,
            team.id,
            TeamUpdate {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));

    let updated = h
        .teams
        .update_team(
            &leader,
            team.id,
            TeamUpdate {
                name: Some("Renamed".to_string()),
                team_level: Some(Some(3)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.team_level, Some(3));
}

#[tokio::test]
async fn delete_and_restore_team_keep_memberships() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    let membership = add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let deleted = h.teams.delete_team(&leader, team.id).await.unwrap();
    assert!(deleted.is_deleted());

    // Membership rows untouched
    let reloaded = h
        .store
        .find_membership(membership.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, MembershipStatus::Active);

    // Deleted teams do not accept invitations
    let other = register(&h, "other@example.com", "Other").await;
    let result = h
        .teams
        .invite_member(&leader, team.id, &other.email, InviteRole::Member, None)
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    // Double delete conflicts; restore brings it back
    let result = h.teams.delete_team(&leader, team.id).await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    let restored = h.teams.restore_team(&leader, team.id).await.unwrap();
    assert!(!restored.is_deleted());
}

// ============================================================================
// Notifications never roll back state
// ============================================================================

#[tokio::test]
async fn notification_failure_does_not_roll_back_the_transition() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    h.emitter.fail_next_emit();
    let membership = h.teams.leave_team(&member, team.id).await.unwrap();
    assert_eq!(membership.status, MembershipStatus::Left);

    let reloaded = h
        .store
        .find_membership(membership.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, MembershipStatus::Left);
}

// ============================================================================
// Account lifecycle
// ============================================================================

#[tokio::test]
async fn account_soft_delete_and_code_restoration() {
    let h = harness();
    let person = register(&h, "person@example.com", "Person").await;

    let deleted = h.accounts.soft_delete_account(person.id).await.unwrap();
    assert!(deleted.is_deleted());
    assert!(!deleted.is_active);

    // Double delete conflicts
    let result = h.accounts.soft_delete_account(person.id).await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    h.accounts
        .request_restoration("person@example.com")
        .await
        .unwrap();

    let events = h.emitter.events_of_kind("restoration_code");
    assert_eq!(events.len(), 1);
    let code = match &events[0].event {
        NotificationEvent::RestorationCode { code, .. } => code.clone(),
        _ => panic!("expected a restoration code event"),
    };

    // Wrong code is rejected and leaves the account deleted
    let wrong = if code == "000000" { "000001" } else { "000000" };
    let result = h.accounts.restore_account("person@example.com", wrong).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let restored = h
        .accounts
        .restore_account("person@example.com", &code)
        .await
        .unwrap();
    assert!(!restored.is_deleted());
    assert!(restored.is_active);
}

#[tokio::test]
async fn restoration_refused_after_grace_period() {
    let h = harness();
    let person = register(&h, "person@example.com", "Person").await;

    let mut deleted = h.accounts.soft_delete_account(person.id).await.unwrap();
    deleted.deleted_at = Some(chrono::Utc::now() - chrono::Duration::days(31));
    h.store.save_identity(&deleted).await.unwrap();

    let result = h.accounts.request_restoration("person@example.com").await;
    assert!(matches!(result, Err(Error::Expired(_))));
    assert!(deleted.can_be_permanently_deleted(chrono::Utc::now()));
}

#[tokio::test]
async fn deleted_account_cannot_act() {
    let h = harness();
    let (leader, team) = team_with_leader(&h).await;
    let member = register(&h, "member@example.com", "Member").await;
    add_member(&h, &leader, &team, &member, InviteRole::Member).await;

    let deleted = h.accounts.soft_delete_account(member.id).await.unwrap();

    let result = h.teams.leave_team(&deleted, team.id).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

#[tokio::test]
async fn verify_email_flow() {
    let h = harness();
    let person = register(&h, "person@example.com", "Person").await;
    let code = person.email_verification_code.clone().unwrap();

    let wrong = if code == "000000" { "000001" } else { "000000" };
    let result = h.accounts.verify_email(person.id, wrong).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let verified = h.accounts.verify_email(person.id, &code).await.unwrap();
    assert!(verified.email_verified);
    assert!(verified.email_verification_code.is_none());
}
