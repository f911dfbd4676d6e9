/// Invitations (`invitations`)
///
/// Coaches invite agencies and agencies invite clients. An invitation is
/// created `pending` with an expiry, resolved at most once (→ `used`), or
/// withdrawn by its account (→ `revoked`). A pending invitation whose
/// `expires_at` has passed is reported as `expired` right away; the
/// background sweep ([`Invitation::expire_stale`]) later persists it.
///
/// Only the SHA-256 hash of the token is stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use std::fmt;
use uuid::Uuid;

use super::account::AccountKind;
use super::user::UserRole;

const INVITATION_COLUMNS: &str = "id, kind, token_hash, email, name, account_id, invited_by, \
     status, expires_at, used_by, used_at, created_at";

/// Default lifetime of an invitation link
pub const DEFAULT_INVITE_TTL_HOURS: i64 = 168;

/// Who is being invited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationKind {
    Agency,
    Client,
}

impl InvitationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationKind::Agency => "agency",
            InvitationKind::Client => "client",
        }
    }

    /// Role the invited user receives
    pub fn target_role(&self) -> UserRole {
        match self {
            InvitationKind::Agency => UserRole::Agency,
            InvitationKind::Client => UserRole::Client,
        }
    }

    /// Kind of account the invited user ends up owning
    pub fn target_account_kind(&self) -> AccountKind {
        match self {
            InvitationKind::Agency => AccountKind::Agency,
            InvitationKind::Client => AccountKind::Client,
        }
    }

    /// Kind of account allowed to issue this invitation
    pub fn inviting_account_kind(&self) -> AccountKind {
        match self {
            InvitationKind::Agency => AccountKind::Coach,
            InvitationKind::Client => AccountKind::Agency,
        }
    }

    /// Platform role allowed to issue this invitation
    pub fn inviter_role(&self) -> UserRole {
        match self {
            InvitationKind::Agency => UserRole::Coach,
            InvitationKind::Client => UserRole::Agency,
        }
    }
}

impl fmt::Display for InvitationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Used,
    Expired,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Used => "used",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Revoked => "revoked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub kind: InvitationKind,
    #[serde(skip_serializing)]
    pub token_hash: String,
    /// When set, only a user with this email can accept
    pub email: Option<String>,
    pub name: Option<String>,
    /// The inviting (parent) account
    pub account_id: Uuid,
    pub invited_by: Uuid,
    /// Stored status; see [`Invitation::effective_status`]
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub used_by: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    /// Status as of `now`: a pending invitation past its expiry is `Expired`
    /// even before the sweep has rewritten the row.
    pub fn effective_status_at(&self, now: DateTime<Utc>) -> InvitationStatus {
        match self.status {
            InvitationStatus::Pending if now >= self.expires_at => InvitationStatus::Expired,
            status => status,
        }
    }

    pub fn effective_status(&self) -> InvitationStatus {
        self.effective_status_at(Utc::now())
    }

    /// Whether `email` may accept this invitation
    pub fn accepts_email(&self, email: &str) -> bool {
        match &self.email {
            Some(expected) => expected.eq_ignore_ascii_case(email.trim()),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateInvitation {
    pub kind: InvitationKind,
    pub token_hash: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub account_id: Uuid,
    pub invited_by: Uuid,
    pub ttl: Duration,
}

impl Invitation {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateInvitation) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "INSERT INTO invitations (kind, token_hash, email, name, account_id, invited_by, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(data.kind)
        .bind(data.token_hash)
        .bind(data.email.map(|e| super::user::normalize_email(&e)))
        .bind(data.name)
        .bind(data.account_id)
        .bind(data.invited_by)
        .bind(Utc::now() + data.ttl)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_token_hash(
        db: impl PgExecutor<'_>,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(db)
        .await
    }

    /// Same lookup with `FOR UPDATE`; concurrent resolutions of one token
    /// serialize on this lock.
    pub async fn lock_by_token_hash(
        db: impl PgExecutor<'_>,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1 FOR UPDATE"
        ))
        .bind(token_hash)
        .fetch_optional(db)
        .await
    }

    pub async fn list_by_account(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE account_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    /// Marks a pending invitation used. Returns `false` if it was no longer
    /// pending, which means another resolution won the race.
    pub async fn mark_used(
        db: impl PgExecutor<'_>,
        id: Uuid,
        used_by: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE invitations
             SET status = 'used', used_by = $2, used_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(used_by)
        .execute(db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Revokes a pending invitation of `account_id`. `None` when there is no
    /// such pending invitation.
    pub async fn revoke(
        db: impl PgExecutor<'_>,
        id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "UPDATE invitations SET status = 'revoked'
             WHERE id = $1 AND account_id = $2 AND status = 'pending'
             RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(id)
        .bind(account_id)
        .fetch_optional(db)
        .await
    }

    /// Persists `expired` for every pending invitation past its expiry.
    /// Returns the number of rows changed.
    pub async fn expire_stale(db: impl PgExecutor<'_>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'expired'
             WHERE status = 'pending' AND expires_at <= NOW()",
        )
        .execute(db)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_pending_for_account(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM invitations
             WHERE account_id = $1 AND status = 'pending' AND expires_at > NOW()",
        )
        .bind(account_id)
        .fetch_one(db)
        .await
    }

    /// Invitations per effective status, for the admin console
    pub async fn count_by_status(
        db: impl PgExecutor<'_>,
    ) -> Result<Vec<(InvitationStatus, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (InvitationStatus, i64)>(
            "SELECT CASE WHEN status = 'pending' AND expires_at <= NOW()
                         THEN 'expired'::invitation_status
                         ELSE status END AS effective,
                    COUNT(*)
             FROM invitations
             GROUP BY effective
             ORDER BY effective",
        )
        .fetch_all(db)
        .await
    }
}
