/// Integration endpoints
///
/// Creating an integration counts against the plan's integration cap. The
/// check and the insert share a transaction holding the account row lock,
/// so concurrent creates cannot overshoot the cap.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{notify, AccountQuery},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use ozza_shared::{
    auth::{
        authorization::{require_membership, require_role},
        middleware::AuthContext,
    },
    models::{
        integration::{CreateIntegration, Integration},
        membership::MemberRole,
    },
    quota::{enforce_cap, QuotaType},
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIntegrationRequest {
    pub account_id: Uuid,

    #[validate(length(min = 1, max = 50, message = "Provider must be 1 to 50 characters"))]
    pub provider: String,

    #[validate(length(min = 1, max = 100, message = "Display name must be 1 to 100 characters"))]
    pub display_name: String,

    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Provider slugs look like `google_drive` or `slack`
fn is_provider_slug(provider: &str) -> bool {
    provider
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// `GET /api/integrations?account_id=`, any member
pub async fn list_integrations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<Integration>>> {
    require_membership(&state.db, query.account_id, auth.user_id).await?;

    let integrations = Integration::list_by_account(&state.db, query.account_id).await?;
    Ok(Json(integrations))
}

/// `POST /api/integrations`
///
/// Over the cap this answers 403 naming the limit.
pub async fn create_integration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateIntegrationRequest>,
) -> ApiResult<(StatusCode, Json<Integration>)> {
    req.validate()?;
    if !is_provider_slug(&req.provider) {
        return Err(ApiError::invalid_field(
            "provider",
            "Use lowercase letters, digits, '_' or '-'",
        ));
    }
    if !req.config.is_object() {
        return Err(ApiError::invalid_field("config", "Config must be a JSON object"));
    }

    require_role(&state.db, req.account_id, auth.user_id, MemberRole::Admin).await?;

    let mut tx = state.db.begin().await?;

    enforce_cap(&mut *tx, req.account_id, QuotaType::Integrations).await?;

    let integration = Integration::create(
        &mut *tx,
        CreateIntegration {
            account_id: req.account_id,
            provider: req.provider,
            display_name: req.display_name.trim().to_string(),
            config: req.config,
            created_by: auth.user_id,
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        integration_id = %integration.id,
        account_id = %integration.account_id,
        provider = %integration.provider,
        "Integration created"
    );

    notify(
        &state,
        integration.account_id,
        "integration.created".to_string(),
        serde_json::to_value(&integration).unwrap_or_default(),
    );

    Ok((StatusCode::CREATED, Json(integration)))
}

/// `DELETE /api/integrations/:id`
pub async fn delete_integration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let integration = Integration::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Integration not found".to_string()))?;

    require_role(&state.db, integration.account_id, auth.user_id, MemberRole::Admin).await?;

    if !Integration::delete(&state.db, id, integration.account_id).await? {
        return Err(ApiError::NotFound("Integration not found".to_string()));
    }

    tracing::info!(integration_id = %id, "Integration deleted");
    notify(
        &state,
        integration.account_id,
        "integration.deleted".to_string(),
        serde_json::json!({ "id": id, "provider": integration.provider }),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_slug() {
        assert!(is_provider_slug("google_drive"));
        assert!(is_provider_slug("zapier-2"));
        assert!(!is_provider_slug("Google Drive"));
    }

    #[test]
    fn test_config_defaults_to_empty_object() {
        let req: CreateIntegrationRequest = serde_json::from_value(json!({
            "account_id": Uuid::new_v4(),
            "provider": "slack",
            "display_name": "Team Slack",
        }))
        .unwrap();
        assert_eq!(req.config, json!({}));
        assert!(req.validate().is_ok());
    }
}
