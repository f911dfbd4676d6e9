/// Outbound webhook endpoints
///
/// Deliveries are `POST`s signed with `X-Ozza-Signature: sha256=<hex>`.
/// The signing secret is shown once, in the create response. An empty
/// `events` list subscribes to every event.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::AccountQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use ozza_shared::{
    auth::{authorization::require_role, middleware::AuthContext},
    models::{
        membership::MemberRole,
        webhook::{CreateWebhook, Webhook},
    },
    webhooks::{validate_url, DeliveryReport, WebhookPayload, TEST_EVENT},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const MAX_EVENTS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub account_id: Uuid,

    pub url: String,

    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateWebhookResponse {
    #[serde(flatten)]
    pub webhook: Webhook,

    /// Hex signing secret, only returned here
    pub secret: String,
}

/// `entity.action`, lowercase with underscores, e.g. `time_entry.created`
fn is_event_name(name: &str) -> bool {
    let valid_part = |part: &str| {
        !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c == '_')
    };
    matches!(name.split_once('.'), Some((entity, action)) if valid_part(entity) && valid_part(action))
}

fn normalize_events(events: Vec<String>) -> ApiResult<Vec<String>> {
    if events.len() > MAX_EVENTS {
        return Err(ApiError::invalid_field("events", format!("At most {MAX_EVENTS} events")));
    }

    let mut normalized: Vec<String> = events.into_iter().map(|e| e.trim().to_string()).collect();
    if let Some(bad) = normalized.iter().find(|e| !is_event_name(e)) {
        return Err(ApiError::invalid_field("events", format!("Invalid event name: {bad}")));
    }

    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

/// `GET /api/webhooks?account_id=`
pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<Webhook>>> {
    require_role(&state.db, query.account_id, auth.user_id, MemberRole::Admin).await?;

    let webhooks = Webhook::list_by_account(&state.db, query.account_id).await?;
    Ok(Json(webhooks))
}

/// `POST /api/webhooks`
pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<CreateWebhookResponse>)> {
    let url = req.url.trim().to_string();
    validate_url(&url)?;
    let events = normalize_events(req.events)?;

    require_role(&state.db, req.account_id, auth.user_id, MemberRole::Admin).await?;

    let webhook = Webhook::create(
        &state.db,
        CreateWebhook {
            account_id: req.account_id,
            url,
            events,
        },
    )
    .await?;

    tracing::info!(webhook_id = %webhook.id, account_id = %webhook.account_id, "Webhook created");

    Ok((
        StatusCode::CREATED,
        Json(CreateWebhookResponse {
            secret: webhook.secret_hex(),
            webhook,
        }),
    ))
}

async fn owned_webhook(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Webhook> {
    let webhook = Webhook::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook not found".to_string()))?;

    require_role(&state.db, webhook.account_id, auth.user_id, MemberRole::Admin).await?;
    Ok(webhook)
}

/// `DELETE /api/webhooks/:id`
pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let webhook = owned_webhook(&state, &auth, id).await?;

    if !Webhook::delete(&state.db, id, webhook.account_id).await? {
        return Err(ApiError::NotFound("Webhook not found".to_string()));
    }

    tracing::info!(webhook_id = %id, "Webhook deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/webhooks/:id/test`
///
/// Sends a `webhook.test` event synchronously and reports the receiver's
/// answer. A failed delivery is still a 200; see `success` in the report.
pub async fn test_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryReport>> {
    let webhook = owned_webhook(&state, &auth, id).await?;

    let payload = WebhookPayload::new(
        TEST_EVENT,
        webhook.account_id,
        json!({ "webhook_id": webhook.id, "triggered_by": auth.user_id }),
    );

    let report = state.webhooks.deliver_with_report(&webhook, &payload).await;
    Ok(Json(report))
}
