/// Tenant accounts (`ozza_accounts`)
///
/// Accounts form a tree: a coach owns a root account, agencies own accounts
/// parented to the coach account that invited them, and clients own accounts
/// parented to their agency. The parent link is written once at creation;
/// a database trigger rejects any later change.
///
/// # Example
///
/// ```no_run
/// use ozza_shared::models::account::{Account, AccountKind, CreateAccount};
/// # async fn example(pool: sqlx::PgPool, coach_id: uuid::Uuid) -> Result<(), sqlx::Error> {
/// let root = Account::create(&pool, CreateAccount {
///     name: "Casey Coaching".to_string(),
///     kind: AccountKind::Coach,
///     owner_id: coach_id,
///     parent_account_id: None,
/// })
/// .await?;
///
/// assert!(root.parent_account_id.is_none());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use std::fmt;
use uuid::Uuid;

use super::membership::MemberRole;

const ACCOUNT_COLUMNS: &str = "id, name, kind, owner_id, parent_account_id, primary_color, \
     secondary_color, logo_url, plan, stripe_customer_id, stripe_subscription_id, \
     created_at, updated_at";

/// What kind of party owns the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Coach,
    Agency,
    Client,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Coach => "coach",
            AccountKind::Agency => "agency",
            AccountKind::Client => "client",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing plan. Stored as text so plans can be added without a type migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Plan::Free),
            "starter" => Some(Plan::Starter),
            "pro" => Some(Plan::Pro),
            "enterprise" => Some(Plan::Enterprise),
            _ => None,
        }
    }

    /// Plans a customer can buy through checkout
    pub fn is_paid(&self) -> bool {
        !matches!(self, Plan::Free)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub kind: AccountKind,
    pub owner_id: Uuid,
    pub parent_account_id: Option<Uuid>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub logo_url: Option<String>,
    /// One of `free | starter | pro | enterprise`, see [`Account::plan`]
    pub plan: String,
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Parsed plan; unknown values fall back to `Free`.
    pub fn plan(&self) -> Plan {
        Plan::from_str(&self.plan).unwrap_or(Plan::Free)
    }
}

#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub name: String,
    pub kind: AccountKind,
    pub owner_id: Uuid,
    pub parent_account_id: Option<Uuid>,
}

/// Branding fields; `Some(None)` clears a value.
#[derive(Debug, Clone, Default)]
pub struct UpdateBranding {
    pub name: Option<String>,
    pub primary_color: Option<Option<String>>,
    pub secondary_color: Option<Option<String>>,
    pub logo_url: Option<Option<String>>,
}

impl UpdateBranding {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.primary_color.is_none()
            && self.secondary_color.is_none()
            && self.logo_url.is_none()
    }
}

/// An account together with the caller's role in it
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountWithRole {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub account: Account,
    pub member_role: MemberRole,
}

impl Account {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateAccount) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO ozza_accounts (name, kind, owner_id, parent_account_id)
             VALUES ($1, $2, $3, $4)
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(data.name)
        .bind(data.kind)
        .bind(data.owner_id)
        .bind(data.parent_account_id)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ozza_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Row-locks the account for the rest of the transaction. Used to
    /// serialize cap checks that count rows before inserting.
    pub async fn lock(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ozza_accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// The single account of `kind` owned by `owner_id`, if any
    pub async fn find_owned(
        db: impl PgExecutor<'_>,
        owner_id: Uuid,
        kind: AccountKind,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ozza_accounts WHERE owner_id = $1 AND kind = $2"
        ))
        .bind(owner_id)
        .bind(kind)
        .fetch_optional(db)
        .await
    }

    /// Every account the user is a member of, with their role, oldest first
    pub async fn list_for_user(
        db: impl PgExecutor<'_>,
        user_id: Uuid,
    ) -> Result<Vec<AccountWithRole>, sqlx::Error> {
        sqlx::query_as::<_, AccountWithRole>(
            "SELECT a.id, a.name, a.kind, a.owner_id, a.parent_account_id, a.primary_color,
                    a.secondary_color, a.logo_url, a.plan, a.stripe_customer_id,
                    a.stripe_subscription_id, a.created_at, a.updated_at,
                    m.role AS member_role
             FROM ozza_accounts a
             JOIN ozza_account_members m ON m.account_id = a.id
             WHERE m.user_id = $1
             ORDER BY a.created_at ASC",
        )
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    /// Direct children (agency accounts under a coach, client accounts under an agency)
    pub async fn list_children(
        db: impl PgExecutor<'_>,
        parent_account_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ozza_accounts
             WHERE parent_account_id = $1
             ORDER BY created_at ASC"
        ))
        .bind(parent_account_id)
        .fetch_all(db)
        .await
    }

    pub async fn update_branding(
        db: impl PgExecutor<'_>,
        id: Uuid,
        data: UpdateBranding,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE ozza_accounts SET updated_at = NOW()");

        if let Some(name) = data.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(primary_color) = data.primary_color {
            query.push(", primary_color = ").push_bind(primary_color);
        }
        if let Some(secondary_color) = data.secondary_color {
            query.push(", secondary_color = ").push_bind(secondary_color);
        }
        if let Some(logo_url) = data.logo_url {
            query.push(", logo_url = ").push_bind(logo_url);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(format!(" RETURNING {ACCOUNT_COLUMNS}"));

        query.build_query_as::<Account>().fetch_optional(db).await
    }

    pub async fn set_stripe_customer(
        db: impl PgExecutor<'_>,
        id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE ozza_accounts SET stripe_customer_id = $2 WHERE id = $1")
            .bind(id)
            .bind(customer_id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Sets the plan after a payments-provider event. Returns `false` when
    /// no account carries that customer id.
    pub async fn apply_subscription(
        db: impl PgExecutor<'_>,
        stripe_customer_id: &str,
        plan: Plan,
        stripe_subscription_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ozza_accounts
             SET plan = $2, stripe_subscription_id = $3
             WHERE stripe_customer_id = $1",
        )
        .bind(stripe_customer_id)
        .bind(plan.as_str())
        .bind(stripe_subscription_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Accounts per kind, for the admin console
    pub async fn count_by_kind(
        db: impl PgExecutor<'_>,
    ) -> Result<Vec<(AccountKind, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (AccountKind, i64)>(
            "SELECT kind, COUNT(*) FROM ozza_accounts GROUP BY kind ORDER BY kind",
        )
        .fetch_all(db)
        .await
    }
}
