//! Domain entities for the Careplan teams domain
//!
//! This module contains the identity, team, membership, and invitation
//! entities. Each entity includes validation, serialization, and the business
//! rules that do not require storage access.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use careplan_common::{Error, Result, StateError};
use validator::ValidateEmail;

pub use crate::domain::state::MembershipState;
use crate::domain::state::{MembershipEvent, MembershipGuardContext, MembershipStateMachine};

/// How long an invitation stays acceptable
pub const INVITATION_VALIDITY_DAYS: i64 = 7;

/// Grace period between soft deletion and eligibility for permanent erasure
pub const DELETION_GRACE_PERIOD_DAYS: i64 = 30;

/// Lifetime of a restoration code
pub const RESTORATION_CODE_VALIDITY_HOURS: i64 = 1;

/// Generate a secure invitation token: 32 random bytes, URL-safe base64 (43 chars)
pub fn generate_invitation_token() -> Result<String> {
    let mut token_bytes = [0u8; 32];
    getrandom::getrandom(&mut token_bytes)
        .map_err(|e| Error::Internal(format!("Failed to generate random bytes: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(token_bytes))
}

/// Generate a 6-digit numeric code for email verification and account restoration
pub fn generate_numeric_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", code)
}

/// Normalize and validate an email address (lowercased, treated case-insensitively)
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !email.validate_email() {
        return Err(Error::Validation("Invalid email format".to_string()));
    }
    Ok(email)
}

/// Identity entity - a registered account
#[derive(Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub email_verified: bool,
    pub email_verification_code: Option<String>,
    pub email_verification_sent_at: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub password_change_code: Option<String>,
    pub password_change_code_expires_at: Option<DateTime<Utc>>,
    pub restoration_code: Option<String>,
    pub restoration_code_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .field("email_verified", &self.email_verified)
            .field("is_active", &self.is_active)
            .field("deleted_at", &self.deleted_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Identity {
    /// Create a new identity with validation
    ///
    /// The email is lowercased before storage; lookups are case-insensitive.
    /// A 6-digit email verification code is issued at creation time.
    pub fn new(email: String, password_hash: String, display_name: String) -> Result<Self> {
        let email = normalize_email(&email)?;

        if display_name.is_empty() || display_name.len() > 150 {
            return Err(Error::Validation(
                "Display name must be 1-150 characters".to_string(),
            ));
        }

        if password_hash.is_empty() {
            return Err(Error::Validation(
                "Password hash cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Identity {
            id: Uuid::new_v4(),
            email,
            password_hash,
            display_name,
            email_verified: false,
            email_verification_code: Some(generate_numeric_code()),
            email_verification_sent_at: Some(now),
            password_reset_token: None,
            password_reset_expires_at: None,
            password_change_code: None,
            password_change_code_expires_at: None,
            restoration_code: None,
            restoration_code_expires_at: None,
            is_active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Verify the email address with the code issued at creation
    pub fn verify_email(&mut self, code: &str) -> Result<()> {
        if self.email_verified {
            return Err(Error::Validation("Email is already verified".to_string()));
        }

        match &self.email_verification_code {
            Some(expected) if expected == code => {
                self.email_verified = true;
                self.email_verification_code = None;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(Error::Validation(
                "Invalid verification code".to_string(),
            )),
        }
    }

    /// Check if the account has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft-delete the account: records are kept, the account is deactivated
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.is_active = false;
        self.updated_at = now;
    }

    /// Restore a soft-deleted account and clear any restoration code
    pub fn restore(&mut self) {
        self.deleted_at = None;
        self.is_active = true;
        self.restoration_code = None;
        self.restoration_code_expires_at = None;
        self.updated_at = Utc::now();
    }

    /// Check whether the grace period has elapsed and the record is eligible
    /// for permanent erasure (the erasure itself runs as an external batch job)
    pub fn can_be_permanently_deleted(&self, now: DateTime<Utc>) -> bool {
        match self.deleted_at {
            Some(deleted_at) => {
                deleted_at + chrono::Duration::days(DELETION_GRACE_PERIOD_DAYS) <= now
            }
            None => false,
        }
    }

    /// Issue a restoration code for a soft-deleted account
    ///
    /// Refused once the grace period has elapsed: at that point the record is
    /// awaiting permanent erasure and can no longer be restored.
    pub fn issue_restoration_code(&mut self, now: DateTime<Utc>) -> Result<String> {
        if !self.is_deleted() {
            return Err(Error::Validation(
                "Account is not deleted".to_string(),
            ));
        }
        if self.can_be_permanently_deleted(now) {
            return Err(Error::Expired(
                "The restoration window for this account has closed".to_string(),
            ));
        }

        let code = generate_numeric_code();
        self.restoration_code = Some(code.clone());
        self.restoration_code_expires_at =
            Some(now + chrono::Duration::hours(RESTORATION_CODE_VALIDITY_HOURS));
        self.updated_at = now;
        Ok(code)
    }

    /// Verify a restoration code and, on success, restore the account
    pub fn verify_restoration_code(&mut self, code: &str, now: DateTime<Utc>) -> Result<()> {
        if !self.is_deleted() {
            return Err(Error::Validation(
                "Account is not deleted".to_string(),
            ));
        }

        let expected = self
            .restoration_code
            .as_deref()
            .ok_or_else(|| Error::Validation("No restoration code was requested".to_string()))?;
        if expected != code {
            return Err(Error::Validation("Invalid restoration code".to_string()));
        }

        match self.restoration_code_expires_at {
            Some(expires_at) if expires_at >= now => {
                self.restore();
                Ok(())
            }
            _ => Err(Error::Expired(
                "Restoration code has expired".to_string(),
            )),
        }
    }

    /// Validate invariants
    pub fn validate(&self) -> Result<()> {
        if !self.email.validate_email() {
            return Err(Error::Validation("Invalid email format".to_string()));
        }

        if self.email != self.email.to_lowercase() {
            return Err(Error::Validation(
                "Email must be stored lowercase".to_string(),
            ));
        }

        if self.display_name.is_empty() || self.display_name.len() > 150 {
            return Err(Error::Validation(
                "Display name must be 1-150 characters".to_string(),
            ));
        }

        // A deleted account is never active
        if self.deleted_at.is_some() && self.is_active {
            return Err(Error::Validation(
                "Deleted accounts must be inactive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Team entity - a care team around one person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Identity id of the current leader; kept in sync by leadership transfer
    pub created_by: Uuid,
    /// Care intensity level, 1-3
    pub team_level: Option<i16>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Create a new team with validation
    pub fn new(
        name: String,
        description: String,
        created_by: Uuid,
        team_level: Option<i16>,
    ) -> Result<Self> {
        Self::validate_name(&name)?;
        Self::validate_level(team_level)?;

        let now = Utc::now();
        Ok(Team {
            id: Uuid::new_v4(),
            name,
            description,
            created_by,
            team_level,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() || name.len() > 255 {
            return Err(Error::Validation(
                "Team name must be 1-255 characters".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_level(level: Option<i16>) -> Result<()> {
        if let Some(level) = level {
            if !(1..=3).contains(&level) {
                return Err(Error::Validation(
                    "Team level must be between 1 and 3".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Check if the team has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft-delete the team; membership rows are left untouched
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// Restore a soft-deleted team
    pub fn restore(&mut self) {
        self.deleted_at = None;
        self.updated_at = Utc::now();
    }

    /// Check whether the grace period has elapsed and the record is eligible
    /// for permanent erasure
    pub fn can_be_permanently_deleted(&self, now: DateTime<Utc>) -> bool {
        match self.deleted_at {
            Some(deleted_at) => {
                deleted_at + chrono::Duration::days(DELETION_GRACE_PERIOD_DAYS) <= now
            }
            None => false,
        }
    }

    /// Validate invariants
    pub fn validate(&self) -> Result<()> {
        Self::validate_name(&self.name)?;
        Self::validate_level(self.team_level)?;
        Ok(())
    }
}

/// Membership roles within a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "membership_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Leader,
    #[default]
    Member,
    Witness,
}

impl std::fmt::Display for MembershipRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipRole::Leader => write!(f, "leader"),
            MembershipRole::Member => write!(f, "member"),
            MembershipRole::Witness => write!(f, "witness"),
        }
    }
}

impl MembershipRole {
    /// Check if this role is leader
    pub fn is_leader(&self) -> bool {
        matches!(self, MembershipRole::Leader)
    }

    /// Check if this role can manage the team (invite, remove, update, delete)
    pub fn can_manage_team(&self) -> bool {
        self.is_leader()
    }
}

/// Membership statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "membership_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    #[default]
    Pending,
    Active,
    Left,
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipStatus::Pending => write!(f, "pending"),
            MembershipStatus::Active => write!(f, "active"),
            MembershipStatus::Left => write!(f, "left"),
        }
    }
}

/// Role for invitation (excludes Leader since leadership is never granted by invite)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invite_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InviteRole {
    #[default]
    Member,
    Witness,
}

impl InviteRole {
    /// Convert to MembershipRole for use once the invitation is accepted
    pub fn to_membership_role(&self) -> MembershipRole {
        match self {
            InviteRole::Member => MembershipRole::Member,
            InviteRole::Witness => MembershipRole::Witness,
        }
    }
}

impl TryFrom<MembershipRole> for InviteRole {
    type Error = Error;

    fn try_from(role: MembershipRole) -> Result<Self> {
        match role {
            MembershipRole::Member => Ok(InviteRole::Member),
            MembershipRole::Witness => Ok(InviteRole::Witness),
            MembershipRole::Leader => Err(Error::Validation(
                "Leadership cannot be granted via invitation".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for InviteRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InviteRole::Member => write!(f, "member"),
            InviteRole::Witness => write!(f, "witness"),
        }
    }
}

/// Team membership entity - the association between an Identity and a Team
///
/// Doubles as the invitation record for registered users: a pending
/// membership carries the invitation token, which is cleared on acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamMembership {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: MembershipRole,
    pub status: MembershipStatus,
    /// When true and no override is set, the current leader acts as guardian
    pub is_default_guardian: bool,
    /// When true and no override is set, the current leader acts as emergency contact
    pub is_default_emergency_contact: bool,
    pub guardian_override: Option<Uuid>,
    pub emergency_contact_override: Option<Uuid>,
    pub invited_by: Option<Uuid>,
    pub invitation_token: Option<String>,
    pub invitation_sent_at: Option<DateTime<Utc>>,
    pub invitation_expires_at: Option<DateTime<Utc>>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamMembership {
    /// Create the leader membership that every team starts with.
    /// Active immediately, no invitation involved.
    pub fn new_leader(team_id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        TeamMembership {
            id: Uuid::new_v4(),
            team_id,
            user_id,
            role: MembershipRole::Leader,
            status: MembershipStatus::Active,
            is_default_guardian: true,
            is_default_emergency_contact: true,
            guardian_override: None,
            emergency_contact_override: None,
            invited_by: None,
            invitation_token: None,
            invitation_sent_at: None,
            invitation_expires_at: None,
            joined_at: Some(now),
            left_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pending membership for an invited registered user
    pub fn new_invited(
        team_id: Uuid,
        user_id: Uuid,
        role: InviteRole,
        invited_by: Uuid,
    ) -> Result<Self> {
        let now = Utc::now();
        Ok(TeamMembership {
            id: Uuid::new_v4(),
            team_id,
            user_id,
            role: role.to_membership_role(),
            status: MembershipStatus::Pending,
            is_default_guardian: true,
            is_default_emergency_contact: true,
            guardian_override: None,
            emergency_contact_override: None,
            invited_by: Some(invited_by),
            invitation_token: Some(generate_invitation_token()?),
            invitation_sent_at: Some(now),
            invitation_expires_at: Some(now + chrono::Duration::days(INVITATION_VALIDITY_DAYS)),
            joined_at: None,
            left_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Create an active membership from a claimed pre-signup invitation.
    /// No pending phase: the signup itself is the acceptance.
    pub fn from_claimed_invitation(invitation: &PendingInvitation, user_id: Uuid) -> Self {
        let now = Utc::now();
        TeamMembership {
            id: Uuid::new_v4(),
            team_id: invitation.team_id,
            user_id,
            role: invitation.role.to_membership_role(),
            status: MembershipStatus::Active,
            is_default_guardian: true,
            is_default_emergency_contact: true,
            guardian_override: None,
            emergency_contact_override: None,
            invited_by: Some(invitation.invited_by),
            invitation_token: None,
            invitation_sent_at: None,
            invitation_expires_at: None,
            joined_at: Some(now),
            left_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the current state for the state machine
    pub fn current_state(&self) -> MembershipState {
        match self.status {
            MembershipStatus::Pending => MembershipState::Pending,
            MembershipStatus::Active => MembershipState::Active,
            MembershipStatus::Left => MembershipState::Left,
        }
    }

    /// Check if the invitation window has passed
    pub fn is_invitation_expired(&self, now: DateTime<Utc>) -> bool {
        match self.invitation_expires_at {
            Some(expires_at) => expires_at < now,
            None => false,
        }
    }

    /// Accept the invitation: Pending -> Active
    ///
    /// An expired invitation fails with `Error::Expired`; the token is kept
    /// in place so the failure can be diagnosed.
    pub fn accept(&mut self) -> Result<()> {
        self.apply_transition(MembershipEvent::Accept)?;
        let now = Utc::now();
        self.status = MembershipStatus::Active;
        self.joined_at = Some(now);
        self.invitation_token = None;
        self.updated_at = now;
        Ok(())
    }

    /// Leave the team voluntarily: Active -> Left
    pub fn leave(&mut self) -> Result<()> {
        self.apply_transition(MembershipEvent::Leave)?;
        let now = Utc::now();
        self.status = MembershipStatus::Left;
        self.left_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Remove by the leader: Pending|Active -> Left
    pub fn remove(&mut self) -> Result<()> {
        self.apply_transition(MembershipEvent::Remove)?;
        let now = Utc::now();
        self.status = MembershipStatus::Left;
        self.left_at = Some(now);
        self.invitation_token = None;
        self.updated_at = now;
        Ok(())
    }

    /// Re-invite a member who previously left: Left -> Pending
    ///
    /// The same row is reused so the (team, user) uniqueness holds. A fresh
    /// token and window are issued; overrides from the earlier stint are
    /// cleared.
    pub fn reinvite(&mut self, role: InviteRole, invited_by: Uuid) -> Result<()> {
        self.apply_transition(MembershipEvent::Reinvite)?;
        let now = Utc::now();
        self.status = MembershipStatus::Pending;
        self.role = role.to_membership_role();
        self.guardian_override = None;
        self.emergency_contact_override = None;
        self.invited_by = Some(invited_by);
        self.invitation_token = Some(generate_invitation_token()?);
        self.invitation_sent_at = Some(now);
        self.invitation_expires_at = Some(now + chrono::Duration::days(INVITATION_VALIDITY_DAYS));
        self.joined_at = None;
        self.left_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Apply a state transition using the state machine
    fn apply_transition(&self, event: MembershipEvent) -> Result<MembershipState> {
        let context = MembershipGuardContext {
            is_expired: self.is_invitation_expired(Utc::now()),
        };
        MembershipStateMachine::transition(self.current_state(), event, Some(&context)).map_err(
            |e| match e {
                StateError::GuardFailed(_) => {
                    Error::Expired("Invitation has expired".to_string())
                }
                StateError::InvalidTransition { from, event, .. } => Error::Validation(format!(
                    "Invalid membership transition: cannot apply '{}' event from '{}' status",
                    event, from
                )),
                StateError::TerminalState(state) => Error::Validation(format!(
                    "Membership status '{}' cannot transition",
                    state
                )),
            },
        )
    }

    /// Check if a transition is valid without applying it
    pub fn can_transition(&self, event: &MembershipEvent) -> bool {
        let context = MembershipGuardContext {
            is_expired: self.is_invitation_expired(Utc::now()),
        };
        MembershipStateMachine::can_transition(self.current_state(), event, Some(&context))
    }

    /// Validate invariants
    pub fn validate(&self) -> Result<()> {
        // Token present exactly while the invitation is pending
        if self.invitation_token.is_some() != (self.status == MembershipStatus::Pending) {
            return Err(Error::Validation(
                "Invitation token must be present exactly while status is pending".to_string(),
            ));
        }

        // Witnesses observe; they never act as guardian or emergency contact
        if self.role == MembershipRole::Witness
            && (self.guardian_override.is_some() || self.emergency_contact_override.is_some())
        {
            return Err(Error::Validation(
                "Witness memberships cannot carry guardian or emergency contact overrides"
                    .to_string(),
            ));
        }

        if self.status == MembershipStatus::Active && self.joined_at.is_none() {
            return Err(Error::Validation(
                "Active memberships must have a join timestamp".to_string(),
            ));
        }

        if self.status == MembershipStatus::Left && self.left_at.is_none() {
            return Err(Error::Validation(
                "Left memberships must have a leave timestamp".to_string(),
            ));
        }

        Ok(())
    }
}

/// Pending invitation entity - an invitation addressed to an email with no
/// registered Identity at invite time. Converted into a membership exactly
/// once, when the recipient signs up and claims the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingInvitation {
    pub id: Uuid,
    pub team_id: Uuid,
    pub email: String,
    pub role: InviteRole,
    pub invited_by: Uuid,
    pub message: String,
    pub invitation_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PendingInvitation {
    /// Create a new pre-signup invitation with validation
    pub fn new(
        team_id: Uuid,
        email: String,
        role: InviteRole,
        invited_by: Uuid,
        message: String,
    ) -> Result<Self> {
        let email = normalize_email(&email)?;
        let now = Utc::now();

        Ok(PendingInvitation {
            id: Uuid::new_v4(),
            team_id,
            email,
            role,
            invited_by,
            message,
            invitation_token: generate_invitation_token()?,
            expires_at: now + chrono::Duration::days(INVITATION_VALIDITY_DAYS),
            created_at: now,
        })
    }

    /// Check if the invitation window has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Validate invariants
    pub fn validate(&self) -> Result<()> {
        if !self.email.validate_email() {
            return Err(Error::Validation("Invalid email format".to_string()));
        }

        if self.invitation_token.is_empty() {
            return Err(Error::Validation(
                "Invitation token cannot be empty".to_string(),
            ));
        }

        if self.created_at >= self.expires_at {
            return Err(Error::Validation(
                "Expiration must be after creation".to_string(),
            ));
        }

        Ok(())
    }
}
