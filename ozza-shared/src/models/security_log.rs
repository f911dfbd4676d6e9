/// Security event log
///
/// Written for logins, signups, failed logins and invitation acceptance,
/// and surfaced read-only in the admin console. The CSV export quotes
/// fields through the `csv` writer and neutralizes cells that a
/// spreadsheet would evaluate as formulas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

const SECURITY_LOG_COLUMNS: &str = "id, event_type, user_id, email, ip_address, details, created_at";

/// Maximum rows returned by a single export
pub const EXPORT_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecurityLog {
    pub id: Uuid,
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSecurityLog {
    pub event_type: &'static str,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
}

impl NewSecurityLog {
    pub fn new(event_type: &'static str) -> Self {
        Self {
            event_type,
            user_id: None,
            email: None,
            ip_address: None,
            details: serde_json::json!({}),
        }
    }

    pub fn user(mut self, user_id: Uuid, email: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.email = Some(email.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Filters for the admin log viewer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityLogFilter {
    pub event_type: Option<String>,
    pub user_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SecurityLogFilter {
    fn push_conditions<'a>(&'a self, query: &mut QueryBuilder<'a, Postgres>) {
        query.push(" WHERE TRUE");
        if let Some(event_type) = &self.event_type {
            query.push(" AND event_type = ").push_bind(event_type);
        }
        if let Some(user_id) = self.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(since) = self.since {
            query.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = self.until {
            query.push(" AND created_at < ").push_bind(until);
        }
    }
}

impl SecurityLog {
    pub async fn record(db: impl PgExecutor<'_>, entry: NewSecurityLog) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SecurityLog>(&format!(
            "INSERT INTO security_logs (event_type, user_id, email, ip_address, details)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {SECURITY_LOG_COLUMNS}"
        ))
        .bind(entry.event_type)
        .bind(entry.user_id)
        .bind(entry.email)
        .bind(entry.ip_address)
        .bind(entry.details)
        .fetch_one(db)
        .await
    }

    /// Newest first; `limit` is clamped to `1..=EXPORT_LIMIT`.
    pub async fn list(db: impl PgExecutor<'_>, filter: &SecurityLogFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(100).clamp(1, EXPORT_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SECURITY_LOG_COLUMNS} FROM security_logs"
        ));
        filter.push_conditions(&mut query);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        query.build_query_as::<SecurityLog>().fetch_all(db).await
    }

    pub async fn count(db: impl PgExecutor<'_>, filter: &SecurityLogFilter) -> Result<i64, sqlx::Error> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM security_logs");
        filter.push_conditions(&mut query);

        let (count,): (i64,) = query.build_query_as().fetch_one(db).await?;
        Ok(count)
    }

    /// Events of `event_type` in the last 24 hours
    pub async fn count_recent(db: impl PgExecutor<'_>, event_type: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM security_logs
             WHERE event_type = $1 AND created_at > NOW() - INTERVAL '24 hours'",
        )
        .bind(event_type)
        .fetch_one(db)
        .await?;
        Ok(count)
    }
}

/// Prefixes cells starting with a formula trigger so spreadsheets show
/// them as text.
fn neutralize_formula(cell: String) -> String {
    match cell.chars().next() {
        Some('=' | '+' | '-' | '@' | '\t' | '\r') => format!("'{cell}"),
        _ => cell,
    }
}

/// Renders logs as CSV with a header row.
pub fn export_csv(logs: &[SecurityLog]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(vec![]);

    writer.write_record([
        "id",
        "created_at",
        "event_type",
        "user_id",
        "email",
        "ip_address",
        "details",
    ])?;

    for log in logs {
        writer.write_record([
            log.id.to_string(),
            log.created_at.to_rfc3339(),
            neutralize_formula(log.event_type.clone()),
            log.user_id.map(|u| u.to_string()).unwrap_or_default(),
            neutralize_formula(log.email.clone().unwrap_or_default()),
            neutralize_formula(log.ip_address.clone().unwrap_or_default()),
            neutralize_formula(log.details.to_string()),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(email: &str, details: serde_json::Value) -> SecurityLog {
        SecurityLog {
            id: Uuid::new_v4(),
            event_type: "auth.login_failed".to_string(),
            user_id: None,
            email: Some(email.to_string()),
            ip_address: Some("203.0.113.9".to_string()),
            details,
            created_at: Utc::now(),
        }
    }

    fn parse(bytes: &[u8]) -> Vec<csv::StringRecord> {
        csv::Reader::from_reader(bytes)
            .records()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_export_header_and_rows() {
        let bytes = export_csv(&[log("a@example.com", serde_json::json!({}))]).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("id,created_at,event_type,user_id,email,ip_address,details\n"));

        let rows = parse(&bytes);
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][2], "auth.login_failed");
        assert_eq!(&rows[0][3], "");
        assert_eq!(&rows[0][4], "a@example.com");
    }

    #[test]
    fn test_export_quotes_commas_quotes_and_newlines() {
        let details = serde_json::json!({"reason": "bad \"password\", twice\nagain"});
        let bytes = export_csv(&[log("x@example.com", details.clone())]).unwrap();

        let rows = parse(&bytes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 7);
        let parsed: serde_json::Value = serde_json::from_str(&rows[0][6]).unwrap();
        assert_eq!(parsed, details);
    }

    #[test]
    fn test_export_neutralizes_formulas() {
        let bytes = export_csv(&[log("=HYPERLINK(\"http://evil\")", serde_json::json!({}))]).unwrap();
        let rows = parse(&bytes);
        assert!(rows[0][4].starts_with("'="));
    }

    #[test]
    fn test_export_empty() {
        let bytes = export_csv(&[]).unwrap();
        assert!(parse(&bytes).is_empty());
    }
}
