//! PostgreSQL implementation of `TeamStore`
//!
//! Plain runtime queries against the schema in `migrations/`. Multi-row
//! mutations run inside a transaction; unique violations are mapped to
//! `Error::Conflict` so the services can surface races uniformly.

use async_trait::async_trait;
use careplan_common::{Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{Identity, PendingInvitation, Team, TeamMembership};
use crate::repository::TeamStore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a unique-constraint violation to `Conflict`, everything else to `Database`
fn conflict_on_unique(err: sqlx::Error, message: &str) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return Error::Conflict(message.to_string());
        }
    }
    Error::Database(err)
}

const MEMBERSHIP_COLUMNS: &str = "id, team_id, user_id, role, status, \
     is_default_guardian, is_default_emergency_contact, \
     guardian_override, emergency_contact_override, invited_by, \
     invitation_token, invitation_sent_at, invitation_expires_at, \
     joined_at, left_at, created_at, updated_at";

const INSERT_MEMBERSHIP: &str = "INSERT INTO team_memberships \
     (id, team_id, user_id, role, status, \
      is_default_guardian, is_default_emergency_contact, \
      guardian_override, emergency_contact_override, invited_by, \
      invitation_token, invitation_sent_at, invitation_expires_at, \
      joined_at, left_at, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)";

fn bind_membership_insert<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    m: &'q TeamMembership,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(m.id)
        .bind(m.team_id)
        .bind(m.user_id)
        .bind(m.role)
        .bind(m.status)
        .bind(m.is_default_guardian)
        .bind(m.is_default_emergency_contact)
        .bind(m.guardian_override)
        .bind(m.emergency_contact_override)
        .bind(m.invited_by)
        .bind(m.invitation_token.as_deref())
        .bind(m.invitation_sent_at)
        .bind(m.invitation_expires_at)
        .bind(m.joined_at)
        .bind(m.left_at)
        .bind(m.created_at)
        .bind(m.updated_at)
}

#[async_trait]
impl TeamStore for PgStore {
    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(identity)
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let identity =
            sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(identity)
    }

    async fn create_identity(&self, identity: &Identity) -> Result<()> {
        sqlx::query(
            "INSERT INTO identities \
             (id, email, password_hash, display_name, email_verified, \
              email_verification_code, email_verification_sent_at, \
              password_reset_token, password_reset_expires_at, \
              password_change_code, password_change_code_expires_at, \
              restoration_code, restoration_code_expires_at, \
              is_active, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(&identity.display_name)
        .bind(identity.email_verified)
        .bind(identity.email_verification_code.as_deref())
        .bind(identity.email_verification_sent_at)
        .bind(identity.password_reset_token.as_deref())
        .bind(identity.password_reset_expires_at)
        .bind(identity.password_change_code.as_deref())
        .bind(identity.password_change_code_expires_at)
        .bind(identity.restoration_code.as_deref())
        .bind(identity.restoration_code_expires_at)
        .bind(identity.is_active)
        .bind(identity.deleted_at)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "An account with this email already exists"))?;
        Ok(())
    }

    async fn save_identity(&self, identity: &Identity) -> Result<()> {
        let result = sqlx::query(
            "UPDATE identities SET \
             email = $2, password_hash = $3, display_name = $4, email_verified = $5, \
             email_verification_code = $6, email_verification_sent_at = $7, \
             password_reset_token = $8, password_reset_expires_at = $9, \
             password_change_code = $10, password_change_code_expires_at = $11, \
             restoration_code = $12, restoration_code_expires_at = $13, \
             is_active = $14, deleted_at = $15, updated_at = $16 \
             WHERE id = $1",
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(&identity.display_name)
        .bind(identity.email_verified)
        .bind(identity.email_verification_code.as_deref())
        .bind(identity.email_verification_sent_at)
        .bind(identity.password_reset_token.as_deref())
        .bind(identity.password_reset_expires_at)
        .bind(identity.password_change_code.as_deref())
        .bind(identity.password_change_code_expires_at)
        .bind(identity.restoration_code.as_deref())
        .bind(identity.restoration_code_expires_at)
        .bind(identity.is_active)
        .bind(identity.deleted_at)
        .bind(identity.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Identity not found".to_string()));
        }
        Ok(())
    }

    async fn find_team(&self, id: Uuid) -> Result<Option<Team>> {
        let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(team)
    }

    async fn owned_team_name_exists(&self, owner: Uuid, name: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS( \
               SELECT 1 FROM teams \
               WHERE created_by = $1 AND LOWER(name) = LOWER($2) AND deleted_at IS NULL)",
        )
        .bind(owner)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_team_with_leader(&self, team: &Team, leader: &TeamMembership) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO teams \
             (id, name, description, created_by, team_level, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.created_by)
        .bind(team.team_level)
        .bind(team.deleted_at)
        .bind(team.created_at)
        .bind(team.updated_at)
        .execute(&mut *tx)
        .await?;

        bind_membership_insert(sqlx::query(INSERT_MEMBERSHIP), leader)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "Membership already exists"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_team(&self, team: &Team) -> Result<()> {
        let result = sqlx::query(
            "UPDATE teams SET \
             name = $2, description = $3, created_by = $4, team_level = $5, \
             deleted_at = $6, updated_at = $7 \
             WHERE id = $1",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.created_by)
        .bind(team.team_level)
        .bind(team.deleted_at)
        .bind(team.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Team not found".to_string()));
        }
        Ok(())
    }

    async fn find_membership(&self, id: Uuid) -> Result<Option<TeamMembership>> {
        let membership = sqlx::query_as::<_, TeamMembership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM team_memberships WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn membership_by_team_and_user(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TeamMembership>> {
        let membership = sqlx::query_as::<_, TeamMembership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM team_memberships \
             WHERE team_id = $1 AND user_id = $2"
        ))
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn membership_by_token(&self, token: &str) -> Result<Option<TeamMembership>> {
        let membership = sqlx::query_as::<_, TeamMembership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM team_memberships WHERE invitation_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn active_leader(&self, team_id: Uuid) -> Result<Option<TeamMembership>> {
        let membership = sqlx::query_as::<_, TeamMembership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM team_memberships \
             WHERE team_id = $1 AND role = 'leader' AND status = 'active'"
        ))
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn list_memberships(&self, team_id: Uuid) -> Result<Vec<TeamMembership>> {
        let memberships = sqlx::query_as::<_, TeamMembership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM team_memberships \
             WHERE team_id = $1 \
             ORDER BY CASE role \
                 WHEN 'leader' THEN 0 \
                 WHEN 'member' THEN 1 \
                 WHEN 'witness' THEN 2 \
             END ASC, created_at ASC"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(memberships)
    }

    async fn list_active_memberships(&self, team_id: Uuid) -> Result<Vec<TeamMembership>> {
        let memberships = sqlx::query_as::<_, TeamMembership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM team_memberships \
             WHERE team_id = $1 AND status = 'active' \
             ORDER BY CASE role \
                 WHEN 'leader' THEN 0 \
                 WHEN 'member' THEN 1 \
                 WHEN 'witness' THEN 2 \
             END ASC, created_at ASC"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(memberships)
    }

    async fn create_membership(&self, membership: &TeamMembership) -> Result<()> {
        bind_membership_insert(sqlx::query(INSERT_MEMBERSHIP), membership)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_on_unique(e, "Membership already exists for this user"))?;
        Ok(())
    }

    async fn save_membership(&self, membership: &TeamMembership) -> Result<()> {
        let result = sqlx::query(
            "UPDATE team_memberships SET \
             role = $2, status = $3, \
             is_default_guardian = $4, is_default_emergency_contact = $5, \
             guardian_override = $6, emergency_contact_override = $7, \
             invited_by = $8, invitation_token = $9, \
             invitation_sent_at = $10, invitation_expires_at = $11, \
             joined_at = $12, left_at = $13, updated_at = $14 \
             WHERE id = $1",
        )
        .bind(membership.id)
        .bind(membership.role)
        .bind(membership.status)
        .bind(membership.is_default_guardian)
        .bind(membership.is_default_emergency_contact)
        .bind(membership.guardian_override)
        .bind(membership.emergency_contact_override)
        .bind(membership.invited_by)
        .bind(membership.invitation_token.as_deref())
        .bind(membership.invitation_sent_at)
        .bind(membership.invitation_expires_at)
        .bind(membership.joined_at)
        .bind(membership.left_at)
        .bind(membership.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Membership not found".to_string()));
        }
        Ok(())
    }

    async fn delete_membership(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM team_memberships WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Membership not found".to_string()));
        }
        Ok(())
    }

    async fn transfer_leadership(
        &self,
        team_id: Uuid,
        from_user: Uuid,
        to_user: Uuid,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Guarded on current roles: if either update misses, the snapshot the
        // service validated against is stale and the whole transfer aborts.
        let demoted = sqlx::query(
            "UPDATE team_memberships \
             SET role = 'member', updated_at = NOW() \
             WHERE team_id = $1 AND user_id = $2 AND role = 'leader' AND status = 'active'",
        )
        .bind(team_id)
        .bind(from_user)
        .execute(&mut *tx)
        .await?;

        if demoted.rows_affected() != 1 {
            return Err(Error::Conflict(
                "Leadership changed concurrently".to_string(),
            ));
        }

        let promoted = sqlx::query(
            "UPDATE team_memberships \
             SET role = 'leader', updated_at = NOW() \
             WHERE team_id = $1 AND user_id = $2 AND role = 'member' AND status = 'active'",
        )
        .bind(team_id)
        .bind(to_user)
        .execute(&mut *tx)
        .await?;

        if promoted.rows_affected() != 1 {
            return Err(Error::Conflict(
                "Target membership changed concurrently".to_string(),
            ));
        }

        sqlx::query("UPDATE teams SET created_by = $2, updated_at = NOW() WHERE id = $1")
            .bind(team_id)
            .bind(to_user)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn pending_invitation_by_token(&self, token: &str) -> Result<Option<PendingInvitation>> {
        let invitation = sqlx::query_as::<_, PendingInvitation>(
            "SELECT * FROM pending_invitations WHERE invitation_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn pending_invitation_exists(&self, team_id: Uuid, email: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS( \
               SELECT 1 FROM pending_invitations \
               WHERE team_id = $1 AND LOWER(email) = LOWER($2))",
        )
        .bind(team_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_pending_invitation(&self, invitation: &PendingInvitation) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_invitations \
             (id, team_id, email, role, invited_by, message, invitation_token, \
              expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(invitation.id)
        .bind(invitation.team_id)
        .bind(&invitation.email)
        .bind(invitation.role)
        .bind(invitation.invited_by)
        .bind(&invitation.message)
        .bind(&invitation.invitation_token)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "This email has already been invited"))?;
        Ok(())
    }

    async fn delete_pending_invitation(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM pending_invitations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Invitation not found".to_string()));
        }
        Ok(())
    }

    async fn claim_pending_invitation(
        &self,
        invitation_id: Uuid,
        membership: &TeamMembership,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM pending_invitations WHERE id = $1")
            .bind(invitation_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() != 1 {
            return Err(Error::Conflict(
                "Invitation was already claimed".to_string(),
            ));
        }

        bind_membership_insert(sqlx::query(INSERT_MEMBERSHIP), membership)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "Membership already exists for this user"))?;

        tx.commit().await?;
        Ok(())
    }
}
