/// API route handlers, one module per resource
///
/// - `health`: liveness and database check
/// - `auth`: signup, login, logout, refresh, profile
/// - `invitations`, `community_links`: onboarding chain
/// - `accounts`: tenants, branding, members, child accounts
/// - `projects`, `milestones`, `tasks`, `deliverables`, `comments`,
///   `time_entries`, `files`: the project tree, each mutation logged
/// - `billing`, `integrations`, `webhooks`: plans, caps and outbound events
/// - `dashboard`: role summaries and landing redirect
/// - `admin`: platform stats and the security log

pub mod accounts;
pub mod admin;
pub mod auth;
pub mod billing;
pub mod comments;
pub mod community_links;
pub mod dashboard;
pub mod deliverables;
pub mod files;
pub mod health;
pub mod integrations;
pub mod invitations;
pub mod milestones;
pub mod projects;
pub mod tasks;
pub mod time_entries;
pub mod webhooks;

use crate::app::AppState;
use ozza_shared::models::activity_log::ActivityLog;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Tells an absent field (`None`) from an explicit `null` (`Some(None)`),
/// for PATCH bodies that may clear a column.
///
/// ```ignore
/// #[serde(default, deserialize_with = "crate::routes::double_option")]
/// pub due_date: Option<Option<NaiveDate>>,
/// ```
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// `?limit=&offset=` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// `?account_id=` query parameter
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccountQuery {
    pub account_id: Uuid,
}

/// One row of a `GROUP BY` count
#[derive(Debug, Clone, Serialize)]
pub struct Tally<K> {
    pub key: K,
    pub count: i64,
}

pub fn tally<K>(rows: Vec<(K, i64)>) -> Vec<Tally<K>> {
    rows.into_iter().map(|(key, count)| Tally { key, count }).collect()
}

/// Dispatches `event` to the account's webhooks once the caller has committed.
pub(crate) fn notify(state: &AppState, account_id: Uuid, event: String, data: serde_json::Value) {
    state.webhooks.spawn_dispatch(account_id, event, data);
}

/// Webhook for one committed activity entry, e.g. `task.status_changed`
pub(crate) fn notify_activity(state: &AppState, account_id: Uuid, entry: &ActivityLog) {
    let event = format!("{}.{}", entry.entity_type, entry.action);

    match serde_json::to_value(entry) {
        Ok(data) => notify(state, account_id, event, data),
        Err(e) => tracing::warn!(error = %e, event = %event, "Skipping webhook for unserializable activity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        due_date: Option<Option<NaiveDate>>,
    }

    #[test]
    fn test_double_option() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.due_date, None);

        let cleared: Patch = serde_json::from_str(r#"{"due_date": null}"#).unwrap();
        assert_eq!(cleared.due_date, Some(None));

        let set: Patch = serde_json::from_str(r#"{"due_date": "2026-03-01"}"#).unwrap();
        assert_eq!(set.due_date, Some(NaiveDate::from_ymd_opt(2026, 3, 1)));
    }

    #[test]
    fn test_pagination_bounds() {
        let default = Pagination::default();
        assert_eq!(default.limit(), Pagination::DEFAULT_LIMIT);
        assert_eq!(default.offset(), 0);

        let wild = Pagination {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(wild.limit(), Pagination::MAX_LIMIT);
        assert_eq!(wild.offset(), 0);

        let zero = Pagination {
            limit: Some(0),
            offset: None,
        };
        assert_eq!(zero.limit(), 1);
    }
}
