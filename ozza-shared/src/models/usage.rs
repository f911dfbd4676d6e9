/// Monthly usage counters per account
///
/// One row per `(account_id, period)` where `period` is the first day of the
/// month (UTC). Counters are bumped with an upsert so the first event of a
/// month creates the row.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageCounter {
    pub account_id: Uuid,
    pub period: NaiveDate,
    pub downloads: i64,
    pub integration_calls: i64,
    pub webhook_deliveries: i64,
}

/// A metered quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetric {
    Downloads,
    IntegrationCalls,
    WebhookDeliveries,
}

impl UsageMetric {
    fn column(&self) -> &'static str {
        match self {
            UsageMetric::Downloads => "downloads",
            UsageMetric::IntegrationCalls => "integration_calls",
            UsageMetric::WebhookDeliveries => "webhook_deliveries",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.column()
    }
}

/// First day of the month containing `date`
pub fn period_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn current_period() -> NaiveDate {
    period_start(Utc::now().date_naive())
}

impl UsageCounter {
    pub fn empty(account_id: Uuid, period: NaiveDate) -> Self {
        Self {
            account_id,
            period,
            downloads: 0,
            integration_calls: 0,
            webhook_deliveries: 0,
        }
    }

    pub fn value(&self, metric: UsageMetric) -> i64 {
        match metric {
            UsageMetric::Downloads => self.downloads,
            UsageMetric::IntegrationCalls => self.integration_calls,
            UsageMetric::WebhookDeliveries => self.webhook_deliveries,
        }
    }

    /// Counters for the current month; zeros when nothing was recorded yet.
    pub async fn get_current(db: impl PgExecutor<'_>, account_id: Uuid) -> Result<Self, sqlx::Error> {
        let period = current_period();

        let usage = sqlx::query_as::<_, UsageCounter>(
            "SELECT account_id, period, downloads, integration_calls, webhook_deliveries
             FROM usage_counters
             WHERE account_id = $1 AND period = $2",
        )
        .bind(account_id)
        .bind(period)
        .fetch_optional(db)
        .await?;

        Ok(usage.unwrap_or_else(|| Self::empty(account_id, period)))
    }

    /// Adds `amount` to `metric` for the current month.
    pub async fn increment(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        metric: UsageMetric,
        amount: i64,
    ) -> Result<Self, sqlx::Error> {
        let column = metric.column();

        sqlx::query_as::<_, UsageCounter>(&format!(
            "INSERT INTO usage_counters (account_id, period, {column})
             VALUES ($1, $2, $3)
             ON CONFLICT (account_id, period)
             DO UPDATE SET {column} = usage_counters.{column} + EXCLUDED.{column},
                           updated_at = NOW()
             RETURNING account_id, period, downloads, integration_calls, webhook_deliveries"
        ))
        .bind(account_id)
        .bind(current_period())
        .bind(amount)
        .fetch_one(db)
        .await
    }

    /// Adds one to `metric` only if the result stays within `limit`.
    ///
    /// Returns `None` when the increment would exceed the limit. The check
    /// and the write are one statement, so concurrent requests cannot
    /// overshoot.
    pub async fn increment_within(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        if limit <= 0 {
            return Ok(None);
        }

        let column = metric.column();

        sqlx::query_as::<_, UsageCounter>(&format!(
            "INSERT INTO usage_counters (account_id, period, {column})
             VALUES ($1, $2, 1)
             ON CONFLICT (account_id, period)
             DO UPDATE SET {column} = usage_counters.{column} + 1, updated_at = NOW()
             WHERE usage_counters.{column} < $3
             RETURNING account_id, period, downloads, integration_calls, webhook_deliveries"
        ))
        .bind(account_id)
        .bind(current_period())
        .bind(limit)
        .fetch_optional(db)
        .await
    }

    /// Most recent `months` periods, newest first
    pub async fn get_history(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        months: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UsageCounter>(
            "SELECT account_id, period, downloads, integration_calls, webhook_deliveries
             FROM usage_counters
             WHERE account_id = $1
             ORDER BY period DESC
             LIMIT $2",
        )
        .bind(account_id)
        .bind(months)
        .fetch_all(db)
        .await
    }

    /// Platform-wide totals for the current month
    pub async fn platform_totals(db: impl PgExecutor<'_>) -> Result<UsageTotals, sqlx::Error> {
        sqlx::query_as::<_, UsageTotals>(
            "SELECT COALESCE(SUM(downloads), 0)::BIGINT AS downloads,
                    COALESCE(SUM(integration_calls), 0)::BIGINT AS integration_calls,
                    COALESCE(SUM(webhook_deliveries), 0)::BIGINT AS webhook_deliveries
             FROM usage_counters
             WHERE period = $1",
        )
        .bind(current_period())
        .fetch_one(db)
        .await
    }
}

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct UsageTotals {
    pub downloads: i64,
    pub integration_calls: i64,
    pub webhook_deliveries: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_start() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 17).unwrap();
        assert_eq!(period_start(date), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());

        let first = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
        assert_eq!(period_start(first), first);
        assert_eq!(current_period().day(), 1);
    }

    #[test]
    fn test_metric_values() {
        let mut usage = UsageCounter::empty(Uuid::new_v4(), current_period());
        usage.downloads = 7;
        usage.webhook_deliveries = 2;

        assert_eq!(usage.value(UsageMetric::Downloads), 7);
        assert_eq!(usage.value(UsageMetric::IntegrationCalls), 0);
        assert_eq!(usage.value(UsageMetric::WebhookDeliveries), 2);
        assert_eq!(UsageMetric::IntegrationCalls.as_str(), "integration_calls");
    }
}
