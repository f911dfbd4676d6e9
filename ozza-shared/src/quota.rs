/// Plan limits and usage metering
///
/// Caps are attached to the account's plan:
///
/// | Plan       | Downloads / month | Active integrations | Open projects |
/// |------------|-------------------|---------------------|---------------|
/// | free       | 50                | 1                   | 3             |
/// | starter    | 500               | 3                   | 25            |
/// | pro        | 5,000             | 10                  | unlimited     |
/// | enterprise | unlimited         | unlimited           | unlimited     |
///
/// Downloads are metered: [`QuotaEnforcer::record_download`] increments the
/// monthly counter only when the result stays within the cap, in a single
/// statement. Integrations and projects are counted rows; [`enforce_cap`]
/// row-locks the account inside the caller's transaction before counting so
/// two concurrent creates cannot both squeeze under the cap.
///
/// # Example
///
/// ```no_run
/// use ozza_shared::quota::{enforce_cap, QuotaEnforcer, QuotaType};
/// # async fn example(pool: sqlx::PgPool, account_id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let enforcer = QuotaEnforcer::new(pool.clone());
/// enforcer.record_download(account_id).await?;
///
/// let mut tx = pool.begin().await?;
/// enforce_cap(&mut tx, account_id, QuotaType::Integrations).await?;
/// // insert the integration...
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::fmt;
use uuid::Uuid;

use crate::models::account::{Account, Plan};
use crate::models::integration::Integration;
use crate::models::project::Project;
use crate::models::usage::{UsageCounter, UsageMetric};

#[derive(Debug)]
pub enum QuotaError {
    LimitExceeded {
        quota_type: QuotaType,
        limit: i64,
        current: i64,
    },

    DatabaseError(sqlx::Error),

    AccountNotFound(Uuid),
}

impl fmt::Display for QuotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaError::LimitExceeded {
                quota_type,
                limit,
                current,
            } => write!(
                f,
                "{} limit reached ({}/{}); upgrade your plan to continue",
                quota_type.as_str(),
                current,
                limit
            ),
            QuotaError::DatabaseError(err) => write!(f, "Database error: {}", err),
            QuotaError::AccountNotFound(id) => write!(f, "Account not found: {}", id),
        }
    }
}

impl std::error::Error for QuotaError {}

impl From<sqlx::Error> for QuotaError {
    fn from(err: sqlx::Error) -> Self {
        QuotaError::DatabaseError(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    /// File downloads per calendar month
    Downloads,
    /// Active integrations
    Integrations,
    /// Projects that are not archived
    Projects,
}

impl QuotaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::Downloads => "Monthly downloads",
            QuotaType::Integrations => "Integrations",
            QuotaType::Projects => "Open projects",
        }
    }
}

/// Caps for one plan; `None` is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub downloads: Option<i64>,
    pub integrations: Option<i64>,
    pub projects: Option<i64>,
}

impl PlanLimits {
    pub fn for_plan(plan: Plan) -> Self {
        match plan {
            Plan::Free => PlanLimits {
                downloads: Some(50),
                integrations: Some(1),
                projects: Some(3),
            },
            Plan::Starter => PlanLimits {
                downloads: Some(500),
                integrations: Some(3),
                projects: Some(25),
            },
            Plan::Pro => PlanLimits {
                downloads: Some(5_000),
                integrations: Some(10),
                projects: None,
            },
            Plan::Enterprise => PlanLimits {
                downloads: None,
                integrations: None,
                projects: None,
            },
        }
    }

    pub fn get(&self, quota_type: QuotaType) -> Option<i64> {
        match quota_type {
            QuotaType::Downloads => self.downloads,
            QuotaType::Integrations => self.integrations,
            QuotaType::Projects => self.projects,
        }
    }
}

/// One metered quantity against its cap
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub used: i64,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
}

impl QuotaStatus {
    pub fn new(used: i64, limit: Option<i64>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.map(|l| (l - used).max(0)),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|l| self.used >= l)
    }
}

/// Usage summary returned by the billing endpoint
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub account_id: Uuid,
    pub plan: Plan,
    pub period: chrono::NaiveDate,
    pub downloads: QuotaStatus,
    pub integrations: QuotaStatus,
    pub projects: QuotaStatus,
    pub integration_calls: i64,
    pub webhook_deliveries: i64,
}

/// Checks `quota_type` for `account_id` inside the caller's transaction.
///
/// Locks the account row, so hold the transaction until the new row is
/// inserted. Downloads are metered through [`QuotaEnforcer::record_download`]
/// instead.
pub async fn enforce_cap(
    conn: &mut PgConnection,
    account_id: Uuid,
    quota_type: QuotaType,
) -> Result<(), QuotaError> {
    let account = Account::lock(&mut *conn, account_id)
        .await?
        .ok_or(QuotaError::AccountNotFound(account_id))?;

    let Some(limit) = PlanLimits::for_plan(account.plan()).get(quota_type) else {
        return Ok(());
    };

    let current = match quota_type {
        QuotaType::Integrations => Integration::count_active(&mut *conn, account_id).await?,
        QuotaType::Projects => Project::count_open_for_account(&mut *conn, account_id).await?,
        QuotaType::Downloads => UsageCounter::get_current(&mut *conn, account_id).await?.downloads,
    };

    if current >= limit {
        tracing::info!(
            account_id = %account_id,
            quota = quota_type.as_str(),
            current,
            limit,
            "Plan cap reached"
        );
        return Err(QuotaError::LimitExceeded {
            quota_type,
            limit,
            current,
        });
    }

    Ok(())
}

/// Metering service over the pool
#[derive(Clone)]
pub struct QuotaEnforcer {
    db: PgPool,
}

impl QuotaEnforcer {
    pub fn new(db: PgPool) -> Self {
        QuotaEnforcer { db }
    }

    async fn plan_limits(&self, account_id: Uuid) -> Result<(Plan, PlanLimits), QuotaError> {
        let account = Account::find_by_id(&self.db, account_id)
            .await?
            .ok_or(QuotaError::AccountNotFound(account_id))?;

        let plan = account.plan();
        Ok((plan, PlanLimits::for_plan(plan)))
    }

    /// Counts one download against the account's monthly cap.
    pub async fn record_download(&self, account_id: Uuid) -> Result<UsageCounter, QuotaError> {
        let (_, limits) = self.plan_limits(account_id).await?;

        let Some(limit) = limits.downloads else {
            return Ok(UsageCounter::increment(&self.db, account_id, UsageMetric::Downloads, 1).await?);
        };

        match UsageCounter::increment_within(&self.db, account_id, UsageMetric::Downloads, limit).await? {
            Some(usage) => Ok(usage),
            None => {
                let current = UsageCounter::get_current(&self.db, account_id).await?.downloads;
                tracing::info!(account_id = %account_id, current, limit, "Download cap reached");
                Err(QuotaError::LimitExceeded {
                    quota_type: QuotaType::Downloads,
                    limit,
                    current,
                })
            }
        }
    }

    /// Unmetered counter bump, e.g. integration calls and webhook deliveries
    pub async fn record(&self, account_id: Uuid, metric: UsageMetric) -> Result<UsageCounter, QuotaError> {
        Ok(UsageCounter::increment(&self.db, account_id, metric, 1).await?)
    }

    pub async fn usage_report(&self, account_id: Uuid) -> Result<UsageReport, QuotaError> {
        let (plan, limits) = self.plan_limits(account_id).await?;

        let usage = UsageCounter::get_current(&self.db, account_id).await?;
        let integrations = Integration::count_active(&self.db, account_id).await?;
        let projects = Project::count_open_for_account(&self.db, account_id).await?;

        Ok(UsageReport {
            account_id,
            plan,
            period: usage.period,
            downloads: QuotaStatus::new(usage.downloads, limits.downloads),
            integrations: QuotaStatus::new(integrations, limits.integrations),
            projects: QuotaStatus::new(projects, limits.projects),
            integration_calls: usage.integration_calls,
            webhook_deliveries: usage.webhook_deliveries,
        })
    }
}
