/// Account membership (`ozza_account_members`)
///
/// Composite key `(account_id, user_id)`. A user can belong to many
/// accounts: an agency owns its own account and is also an `agency`
/// member of the coach account that invited it.
///
/// Inserts go through [`AccountMember::ensure`], which is idempotent so a
/// retried invite resolution never fails on an existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use std::fmt;
use uuid::Uuid;

use super::user::UserRole;

/// Role inside one account. Ordered owner > admin > agency > client > viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Agency,
    Client,
    Viewer,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Agency => "agency",
            MemberRole::Client => "client",
            MemberRole::Viewer => "viewer",
        }
    }

    /// `true` when this role is at least as strong as `required`
    pub fn has_permission(&self, required: &MemberRole) -> bool {
        self.permission_level() >= required.permission_level()
    }

    fn permission_level(&self) -> u8 {
        match self {
            MemberRole::Owner => 5,
            MemberRole::Admin => 4,
            MemberRole::Agency => 3,
            MemberRole::Client => 2,
            MemberRole::Viewer => 1,
        }
    }

    pub fn can_manage_members(&self) -> bool {
        self.has_permission(&MemberRole::Admin)
    }

    pub fn can_manage_billing(&self) -> bool {
        matches!(self, MemberRole::Owner)
    }

    /// The membership an invited user of `role` receives in the inviting account
    pub fn for_invited(role: UserRole) -> Option<MemberRole> {
        match role {
            UserRole::Agency => Some(MemberRole::Agency),
            UserRole::Client => Some(MemberRole::Client),
            _ => None,
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountMember {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
}

/// A member row joined with the user's public profile
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MemberWithUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl AccountMember {
    /// Inserts the membership unless one already exists for the pair.
    ///
    /// Returns `true` when a row was written. An existing row keeps its role.
    pub async fn ensure(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO ozza_account_members (account_id, user_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (account_id, user_id) DO NOTHING",
        )
        .bind(account_id)
        .bind(user_id)
        .bind(role)
        .execute(db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AccountMember>(
            "SELECT account_id, user_id, role, created_at
             FROM ozza_account_members
             WHERE account_id = $1 AND user_id = $2",
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    pub async fn get_role(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MemberRole>, sqlx::Error> {
        sqlx::query_scalar::<_, MemberRole>(
            "SELECT role FROM ozza_account_members WHERE account_id = $1 AND user_id = $2",
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    pub async fn list_members(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
    ) -> Result<Vec<MemberWithUser>, sqlx::Error> {
        sqlx::query_as::<_, MemberWithUser>(
            "SELECT u.id AS user_id, u.email, u.name, u.avatar_url, m.role,
                    m.created_at AS joined_at
             FROM ozza_account_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.account_id = $1
             ORDER BY m.created_at ASC",
        )
        .bind(account_id)
        .fetch_all(db)
        .await
    }

    /// Removes a non-owner member. Owners can only leave by deleting the account.
    pub async fn remove(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM ozza_account_members
             WHERE account_id = $1 AND user_id = $2 AND role <> 'owner'",
        )
        .bind(account_id)
        .bind(user_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_for_account(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM ozza_account_members WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        let ordered = [
            MemberRole::Owner,
            MemberRole::Admin,
            MemberRole::Agency,
            MemberRole::Client,
            MemberRole::Viewer,
        ];

        for (i, stronger) in ordered.iter().enumerate() {
            for weaker in &ordered[i..] {
                assert!(stronger.has_permission(weaker), "{stronger} should cover {weaker}");
            }
            for higher in &ordered[..i] {
                assert!(!stronger.has_permission(higher), "{stronger} should not cover {higher}");
            }
        }
    }

    #[test]
    fn test_management_rights() {
        assert!(MemberRole::Owner.can_manage_members());
        assert!(MemberRole::Admin.can_manage_members());
        assert!(!MemberRole::Agency.can_manage_members());
        assert!(MemberRole::Owner.can_manage_billing());
        assert!(!MemberRole::Admin.can_manage_billing());
    }

    #[test]
    fn test_member_role_for_invited_user() {
        assert_eq!(MemberRole::for_invited(UserRole::Agency), Some(MemberRole::Agency));
        assert_eq!(MemberRole::for_invited(UserRole::Client), Some(MemberRole::Client));
        assert_eq!(MemberRole::for_invited(UserRole::Coach), None);
    }

    // Idempotency of `ensure` is covered in tests/onboarding_tests.rs
}
