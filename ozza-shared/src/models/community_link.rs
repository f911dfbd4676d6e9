/// Community (referral) links
///
/// A reusable signup code owned by an account. Each redemption bumps
/// `usage_count` in a single guarded `UPDATE`, so the cap in `max_uses`
/// holds under concurrent signups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::invitation::InvitationKind;

const LINK_COLUMNS: &str =
    "id, code, account_id, created_by, kind, usage_count, max_uses, active, expires_at, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommunityLink {
    pub id: Uuid,
    pub code: String,
    pub account_id: Uuid,
    pub created_by: Uuid,
    /// Role granted to people who sign up through the link
    pub kind: InvitationKind,
    pub usage_count: i32,
    /// `None` means unlimited
    pub max_uses: Option<i32>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CommunityLink {
    /// Whether a redemption at `now` would succeed
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.max_uses.map_or(true, |max| self.usage_count < max)
            && self.expires_at.map_or(true, |exp| exp > now)
    }

    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_uses.map(|max| (max - self.usage_count).max(0))
    }
}

#[derive(Debug, Clone)]
pub struct CreateCommunityLink {
    pub code: String,
    pub account_id: Uuid,
    pub created_by: Uuid,
    pub kind: InvitationKind,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CommunityLink {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateCommunityLink) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, CommunityLink>(&format!(
            "INSERT INTO community_links (code, account_id, created_by, kind, max_uses, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(data.code)
        .bind(data.account_id)
        .bind(data.created_by)
        .bind(data.kind)
        .bind(data.max_uses)
        .bind(data.expires_at)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CommunityLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM community_links WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_code(db: impl PgExecutor<'_>, code: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CommunityLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM community_links WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(db)
        .await
    }

    pub async fn list_by_account(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CommunityLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM community_links
             WHERE account_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(db)
        .await
    }

    /// Consumes one use. `None` when the code is unknown, inactive, expired
    /// or already at its cap.
    pub async fn redeem(db: impl PgExecutor<'_>, code: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CommunityLink>(&format!(
            "UPDATE community_links
             SET usage_count = usage_count + 1
             WHERE code = $1
               AND active
               AND (max_uses IS NULL OR usage_count < max_uses)
               AND (expires_at IS NULL OR expires_at > NOW())
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(code)
        .fetch_optional(db)
        .await
    }

    pub async fn deactivate(
        db: impl PgExecutor<'_>,
        id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CommunityLink>(&format!(
            "UPDATE community_links SET active = FALSE
             WHERE id = $1 AND account_id = $2
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(id)
        .bind(account_id)
        .fetch_optional(db)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(usage_count: i32, max_uses: Option<i32>) -> CommunityLink {
        CommunityLink {
            id: Uuid::new_v4(),
            code: "ABCDEFGH23".to_string(),
            account_id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            kind: InvitationKind::Client,
            usage_count,
            max_uses,
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cap_is_enforced() {
        let now = Utc::now();
        assert!(link(0, Some(2)).is_redeemable_at(now));
        assert!(link(1, Some(2)).is_redeemable_at(now));
        assert!(!link(2, Some(2)).is_redeemable_at(now));
        assert!(link(10_000, None).is_redeemable_at(now));
    }

    #[test]
    fn test_inactive_or_expired_links_are_not_redeemable() {
        let now = Utc::now();

        let mut inactive = link(0, None);
        inactive.active = false;
        assert!(!inactive.is_redeemable_at(now));

        let mut expired = link(0, None);
        expired.expires_at = Some(now - Duration::minutes(1));
        assert!(!expired.is_redeemable_at(now));
    }

    #[test]
    fn test_remaining_uses() {
        assert_eq!(link(3, Some(5)).remaining_uses(), Some(2));
        assert_eq!(link(5, Some(5)).remaining_uses(), Some(0));
        assert_eq!(link(3, None).remaining_uses(), None);
    }
}
