/// Billing endpoints
///
/// - `GET /api/billing/usage?account_id=` - plan, caps and this month's usage
/// - `POST /api/billing/checkout` - hosted checkout URL for a paid plan
/// - `POST /api/billing/portal` - hosted billing portal URL
/// - `POST /api/billing/webhook` - provider callback, signature-verified
///
/// Checkout and portal need the account owner. Plan changes only ever come
/// from verified provider callbacks.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::auth::client_ip,
    routes::AccountQuery,
};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Extension, Json,
};
use ozza_shared::{
    auth::{
        authorization::{require_membership, require_role},
        middleware::AuthContext,
    },
    models::{
        account::{Account, Plan},
        membership::MemberRole,
        security_log::{NewSecurityLog, SecurityLog},
    },
    payments::{CheckoutRequest, PaymentsError, PaymentsEvent},
    quota::UsageReport,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub account_id: Uuid,
    pub plan: Plan,
}

#[derive(Debug, Deserialize)]
pub struct PortalBody {
    pub account_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RedirectUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub received: bool,
}

/// `GET /api/billing/usage?account_id=`, any member
pub async fn usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<UsageReport>> {
    if !auth.is_staff() {
        require_membership(&state.db, query.account_id, auth.user_id).await?;
    }

    let report = state.quota.usage_report(query.account_id).await?;
    Ok(Json(report))
}

async fn billing_account(state: &AppState, auth: &AuthContext, account_id: Uuid) -> ApiResult<Account> {
    require_role(&state.db, account_id, auth.user_id, MemberRole::Owner).await?;

    Account::find_by_id(&state.db, account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))
}

/// `POST /api/billing/checkout`
///
/// Creates the provider customer on first use.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<Json<RedirectUrl>> {
    if !body.plan.is_paid() {
        return Err(PaymentsError::PlanNotPurchasable(body.plan.as_str().to_string()).into());
    }

    let account = billing_account(&state, &auth, body.account_id).await?;

    let customer_id = match account.stripe_customer_id.clone() {
        Some(id) => id,
        None => {
            let id = state.payments.create_customer(&account, &auth.email).await?;
            Account::set_stripe_customer(&state.db, account.id, &id).await?;
            tracing::info!(account_id = %account.id, "Payments customer created");
            id
        }
    };

    let url = state
        .payments
        .create_checkout_session(CheckoutRequest {
            account_id: account.id,
            customer_id,
            plan: body.plan,
            success_url: state.app_url("/billing?checkout=success"),
            cancel_url: state.app_url("/billing?checkout=cancelled"),
        })
        .await?;

    SecurityLog::record(
        &state.db,
        NewSecurityLog::new("billing.checkout_started")
            .user(auth.user_id, auth.email.clone())
            .ip(client_ip(&headers))
            .details(json!({ "account_id": account.id, "plan": body.plan })),
    )
    .await?;

    Ok(Json(RedirectUrl { url }))
}

/// `POST /api/billing/portal`
pub async fn portal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<PortalBody>,
) -> ApiResult<Json<RedirectUrl>> {
    let account = billing_account(&state, &auth, body.account_id).await?;

    let customer_id = account
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::Conflict("Account has no billing profile yet".to_string()))?;

    let url = state
        .payments
        .create_portal_session(customer_id, &state.app_url("/billing"))
        .await?;

    Ok(Json(RedirectUrl { url }))
}

/// `POST /api/billing/webhook`, called by the payments provider
///
/// The raw body is verified against the `Stripe-Signature` header before it
/// is parsed. Unknown events are acknowledged so the provider stops retrying.
pub async fn payments_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<CallbackAck>> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(PaymentsError::InvalidSignature("missing signature header"))?;

    let event = state.payments.parse_callback(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Rejected payments callback");
        e
    })?;

    match &event {
        PaymentsEvent::Ignored(kind) => {
            tracing::debug!(event = %kind, "Ignoring payments callback");
        }
        _ => {
            let matched = event.apply(&state.db).await?;
            if matched {
                tracing::info!(?event, "Applied plan change");
            } else {
                tracing::warn!(?event, "Plan change matched no account");
            }
        }
    }

    Ok(Json(CallbackAck { received: true }))
}
