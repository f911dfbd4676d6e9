/// Payments provider: checkout, billing portal and subscription callbacks
///
/// Handlers talk to a [`PaymentsProvider`] trait object; [`StripeProvider`]
/// is the production implementation and speaks Stripe's form-encoded REST
/// API over `reqwest`. Plans map to Stripe price ids through a
/// [`PriceTable`].
///
/// Callbacks are authenticated with the `Stripe-Signature` header
/// (`t=<unix>,v1=<hex hmac>`): HMAC-SHA256 over `"{t}.{body}"` with the
/// endpoint secret, within a five minute tolerance.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgExecutor;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::token::constant_time_eq;
use crate::models::account::{Account, Plan};

/// Accepted clock skew for callback timestamps, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum PaymentsError {
    #[error("Payments provider is not configured")]
    NotConfigured,

    #[error("Plan {0} cannot be purchased")]
    PlanNotPurchasable(String),

    #[error("Payments provider error: {0}")]
    Api(String),

    #[error("Payments provider unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid callback signature: {0}")]
    InvalidSignature(&'static str),

    #[error("Malformed provider payload: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Stripe price ids per purchasable plan
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    pub starter: Option<String>,
    pub pro: Option<String>,
    pub enterprise: Option<String>,
}

impl PriceTable {
    pub fn price_for(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Free => None,
            Plan::Starter => self.starter.as_deref(),
            Plan::Pro => self.pro.as_deref(),
            Plan::Enterprise => self.enterprise.as_deref(),
        }
    }

    pub fn plan_for(&self, price_id: &str) -> Option<Plan> {
        [Plan::Starter, Plan::Pro, Plan::Enterprise]
            .into_iter()
            .find(|plan| self.price_for(*plan) == Some(price_id))
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub account_id: Uuid,
    pub customer_id: String,
    pub plan: Plan,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider callback reduced to what Ozza acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentsEvent {
    /// The customer's subscription now grants `plan`
    PlanChanged {
        customer_id: String,
        subscription_id: Option<String>,
        plan: Plan,
    },
    /// The subscription ended; the account falls back to free
    SubscriptionEnded { customer_id: String },
    /// Anything else, acknowledged and ignored
    Ignored(String),
}

impl PaymentsEvent {
    /// Writes the plan change to the matching account. Returns `false` when
    /// nothing matched.
    pub async fn apply(&self, db: impl PgExecutor<'_>) -> Result<bool, sqlx::Error> {
        match self {
            PaymentsEvent::PlanChanged {
                customer_id,
                subscription_id,
                plan,
            } => Account::apply_subscription(db, customer_id, *plan, subscription_id.as_deref()).await,
            PaymentsEvent::SubscriptionEnded { customer_id } => {
                Account::apply_subscription(db, customer_id, Plan::Free, None).await
            }
            PaymentsEvent::Ignored(_) => Ok(false),
        }
    }
}

#[async_trait]
pub trait PaymentsProvider: Send + Sync {
    /// Creates a provider-side customer for `account` and returns its id.
    async fn create_customer(&self, account: &Account, email: &str) -> Result<String, PaymentsError>;

    /// Returns the hosted checkout URL.
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String, PaymentsError>;

    /// Returns the hosted billing portal URL.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, PaymentsError>;

    /// Authenticates and decodes a callback body.
    fn parse_callback(&self, payload: &str, signature_header: &str) -> Result<PaymentsEvent, PaymentsError>;
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub prices: PriceTable,
}

pub struct StripeProvider {
    config: StripeConfig,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UrlOnly {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    status: String,
    items: StripeList<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: IdOnly,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeApiError {
    error: StripeApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeApiErrorDetail {
    message: String,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            config,
            client,
            base_url: STRIPE_API_BASE.to_string(),
        })
    }

    fn secret_key(&self) -> Result<&str, PaymentsError> {
        self.config.secret_key.as_deref().ok_or(PaymentsError::NotConfigured)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, PaymentsError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .basic_auth(self.secret_key()?, Option::<&str>::None)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<StripeApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            tracing::warn!(path, %status, error = %message, "Stripe request failed");
            return Err(PaymentsError::Api(message));
        }

        serde_json::from_str(&body).map_err(|e| PaymentsError::Parse(e.to_string()))
    }

    fn decode_event(&self, event: StripeEvent) -> Result<PaymentsEvent, PaymentsError> {
        let parse_err = |e: serde_json::Error| PaymentsError::Parse(e.to_string());

        match event.event_type.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                let sub: StripeSubscription = serde_json::from_value(event.data.object).map_err(parse_err)?;

                if !matches!(sub.status.as_str(), "active" | "trialing") {
                    return Ok(PaymentsEvent::SubscriptionEnded {
                        customer_id: sub.customer,
                    });
                }

                let plan = sub
                    .items
                    .data
                    .iter()
                    .find_map(|item| self.config.prices.plan_for(&item.price.id));

                match plan {
                    Some(plan) => Ok(PaymentsEvent::PlanChanged {
                        customer_id: sub.customer,
                        subscription_id: Some(sub.id),
                        plan,
                    }),
                    None => Ok(PaymentsEvent::Ignored(format!(
                        "{} (unknown price)",
                        event.event_type
                    ))),
                }
            }
            "customer.subscription.deleted" => {
                let sub: StripeSubscription = serde_json::from_value(event.data.object).map_err(parse_err)?;
                Ok(PaymentsEvent::SubscriptionEnded {
                    customer_id: sub.customer,
                })
            }
            "checkout.session.completed" => {
                let session: StripeCheckoutSession =
                    serde_json::from_value(event.data.object).map_err(parse_err)?;

                let plan = session.metadata.get("plan").and_then(|p| Plan::from_str(p));

                match (session.customer, plan) {
                    (Some(customer_id), Some(plan)) => Ok(PaymentsEvent::PlanChanged {
                        customer_id,
                        subscription_id: session.subscription,
                        plan,
                    }),
                    _ => Ok(PaymentsEvent::Ignored(event.event_type)),
                }
            }
            _ => Ok(PaymentsEvent::Ignored(event.event_type)),
        }
    }
}

#[async_trait]
impl PaymentsProvider for StripeProvider {
    async fn create_customer(&self, account: &Account, email: &str) -> Result<String, PaymentsError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("name".to_string(), account.name.clone()),
            ("metadata[account_id]".to_string(), account.id.to_string()),
        ];

        let customer: IdOnly = self.post_form("customers", &form).await?;
        tracing::info!(account_id = %account.id, customer_id = %customer.id, "Created payments customer");
        Ok(customer.id)
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String, PaymentsError> {
        let price = self
            .config
            .prices
            .price_for(request.plan)
            .ok_or_else(|| PaymentsError::PlanNotPurchasable(request.plan.as_str().to_string()))?;

        let form = vec![
            ("customer".to_string(), request.customer_id),
            ("mode".to_string(), "subscription".to_string()),
            ("success_url".to_string(), request.success_url),
            ("cancel_url".to_string(), request.cancel_url),
            ("line_items[0][price]".to_string(), price.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("client_reference_id".to_string(), request.account_id.to_string()),
            ("metadata[account_id]".to_string(), request.account_id.to_string()),
            ("metadata[plan]".to_string(), request.plan.as_str().to_string()),
        ];

        let session: UrlOnly = self.post_form("checkout/sessions", &form).await?;
        Ok(session.url)
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, PaymentsError> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];

        let session: UrlOnly = self.post_form("billing_portal/sessions", &form).await?;
        Ok(session.url)
    }

    fn parse_callback(&self, payload: &str, signature_header: &str) -> Result<PaymentsEvent, PaymentsError> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or(PaymentsError::NotConfigured)?;

        verify_stripe_signature(payload, signature_header, secret, Utc::now().timestamp())?;

        let event: StripeEvent =
            serde_json::from_str(payload).map_err(|e| PaymentsError::Parse(e.to_string()))?;

        self.decode_event(event)
    }
}

fn hmac_hex(secret: &[u8], message: &[u8]) -> Result<String, PaymentsError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| PaymentsError::InvalidSignature("unusable secret"))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `Stripe-Signature` header against `payload` at time `now`.
pub fn verify_stripe_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), PaymentsError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentsError::InvalidSignature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(PaymentsError::InvalidSignature("missing v1 signature"));
    }

    let issued: i64 = timestamp
        .parse()
        .map_err(|_| PaymentsError::InvalidSignature("malformed timestamp"))?;
    if (now - issued).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(PaymentsError::InvalidSignature("timestamp outside tolerance"));
    }

    let expected = hmac_hex(secret.as_bytes(), format!("{timestamp}.{payload}").as_bytes())?;

    if signatures
        .iter()
        .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()))
    {
        Ok(())
    } else {
        Err(PaymentsError::InvalidSignature("signature mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn header(payload: &str, t: i64) -> String {
        let sig = hmac_hex(SECRET.as_bytes(), format!("{t}.{payload}").as_bytes()).unwrap();
        format!("t={t},v1={sig}")
    }

    fn provider() -> StripeProvider {
        StripeProvider::new(StripeConfig {
            secret_key: Some("sk_test".to_string()),
            webhook_secret: Some(SECRET.to_string()),
            prices: PriceTable {
                starter: Some("price_starter".to_string()),
                pro: Some("price_pro".to_string()),
                enterprise: None,
            },
        })
        .unwrap()
    }

    #[test]
    fn test_price_table() {
        let prices = provider().config.prices;
        assert_eq!(prices.price_for(Plan::Pro), Some("price_pro"));
        assert_eq!(prices.price_for(Plan::Free), None);
        assert_eq!(prices.plan_for("price_starter"), Some(Plan::Starter));
        assert_eq!(prices.plan_for("price_unknown"), None);
    }

    #[test]
    fn test_verify_signature() {
        let payload = r#"{"type":"ping"}"#;
        let now = 1_760_000_000;

        assert!(verify_stripe_signature(payload, &header(payload, now), SECRET, now).is_ok());
        assert!(verify_stripe_signature(payload, &header(payload, now - 60), SECRET, now).is_ok());

        // Extra schemes and a second, wrong v1 entry are tolerated
        let multi = format!("{},v0=abc,v1=deadbeef", header(payload, now));
        assert!(verify_stripe_signature(payload, &multi, SECRET, now).is_ok());
    }

    #[test]
    fn test_verify_signature_rejects() {
        let payload = r#"{"type":"ping"}"#;
        let now = 1_760_000_000;

        let tampered = verify_stripe_signature(r#"{"type":"pong"}"#, &header(payload, now), SECRET, now);
        assert!(matches!(tampered, Err(PaymentsError::InvalidSignature("signature mismatch"))));

        let stale = verify_stripe_signature(payload, &header(payload, now - 301), SECRET, now);
        assert!(matches!(stale, Err(PaymentsError::InvalidSignature("timestamp outside tolerance"))));

        let wrong_secret = verify_stripe_signature(payload, &header(payload, now), "other", now);
        assert!(wrong_secret.is_err());

        assert!(verify_stripe_signature(payload, "v1=abc", SECRET, now).is_err());
        assert!(verify_stripe_signature(payload, &format!("t={now}"), SECRET, now).is_err());
    }

    #[test]
    fn test_parse_subscription_updated() {
        let payload = serde_json::json!({
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_123",
                "customer": "cus_abc",
                "status": "active",
                "items": {"data": [{"price": {"id": "price_pro"}}]}
            }}
        })
        .to_string();
        let now = Utc::now().timestamp();

        let event = provider().parse_callback(&payload, &header(&payload, now)).unwrap();
        assert_eq!(
            event,
            PaymentsEvent::PlanChanged {
                customer_id: "cus_abc".to_string(),
                subscription_id: Some("sub_123".to_string()),
                plan: Plan::Pro,
            }
        );
    }

    #[test]
    fn test_parse_ended_and_ignored() {
        let p = provider();
        let now = Utc::now().timestamp();

        let canceled = serde_json::json!({
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_123", "customer": "cus_abc", "status": "canceled",
                "items": {"data": []}
            }}
        })
        .to_string();
        assert_eq!(
            p.parse_callback(&canceled, &header(&canceled, now)).unwrap(),
            PaymentsEvent::SubscriptionEnded { customer_id: "cus_abc".to_string() }
        );

        let other = r#"{"type":"invoice.created","data":{"object":{}}}"#;
        assert_eq!(
            p.parse_callback(other, &header(other, now)).unwrap(),
            PaymentsEvent::Ignored("invoice.created".to_string())
        );
    }

    #[test]
    fn test_parse_checkout_completed() {
        let payload = serde_json::json!({
            "type": "checkout.session.completed",
            "data": {"object": {
                "customer": "cus_abc",
                "subscription": "sub_9",
                "metadata": {"plan": "starter", "account_id": Uuid::nil().to_string()}
            }}
        })
        .to_string();
        let now = Utc::now().timestamp();

        let event = provider().parse_callback(&payload, &header(&payload, now)).unwrap();
        assert!(matches!(event, PaymentsEvent::PlanChanged { plan: Plan::Starter, .. }));
    }

    #[test]
    fn test_unconfigured_webhook_secret() {
        let p = StripeProvider::new(StripeConfig {
            secret_key: None,
            webhook_secret: None,
            prices: PriceTable::default(),
        })
        .unwrap();
        assert!(matches!(p.parse_callback("{}", "t=1,v1=a"), Err(PaymentsError::NotConfigured)));
        assert!(matches!(p.secret_key(), Err(PaymentsError::NotConfigured)));
    }
}
