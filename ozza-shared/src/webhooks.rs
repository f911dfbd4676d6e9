/// Outbound webhook signing and delivery
///
/// Each delivery is a `POST` of a JSON [`WebhookPayload`] with:
///
/// - `X-Ozza-Signature: sha256=<hex HMAC-SHA256(secret, body)>`
/// - `X-Ozza-Event: <event name>`
/// - `X-Ozza-Delivery: <payload id>`
///
/// Receivers recompute the HMAC over the raw body with the secret they were
/// shown at creation and compare in constant time ([`verify_signature`]).
///
/// Deliveries run after the triggering transaction commits, on a spawned
/// task, with a single attempt bounded by [`DELIVERY_TIMEOUT`]. A failed
/// delivery is logged and does not affect the request that caused it.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::auth::token::constant_time_eq;
use crate::models::usage::{UsageCounter, UsageMetric};
use crate::models::webhook::Webhook;

pub const SIGNATURE_HEADER: &str = "X-Ozza-Signature";
pub const EVENT_HEADER: &str = "X-Ozza-Event";
pub const DELIVERY_HEADER: &str = "X-Ozza-Delivery";

/// Event sent by `POST /api/webhooks/:id/test`
pub const TEST_EVENT: &str = "webhook.test";

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook URL must be an absolute http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("Unusable signing secret")]
    InvalidSecret,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Delivery failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Receiver answered {status}")]
    Rejected { status: u16 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Body of every delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub id: Uuid,
    pub event: String,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn new(event: impl Into<String>, account_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            account_id,
            created_at: Utc::now(),
            data,
        }
    }
}

/// Outcome of one delivery, returned by the test endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub webhook_id: Uuid,
    pub delivery_id: Uuid,
    pub status: Option<u16>,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// `sha256=<hex>` signature of `body`
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Receiver-side check of a signature header
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    match sign(secret, body) {
        Ok(expected) => constant_time_eq(expected.as_bytes(), header.trim().as_bytes()),
        Err(_) => false,
    }
}

pub fn validate_url(url: &str) -> Result<(), WebhookError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => Ok(()),
        _ => Err(WebhookError::InvalidUrl(url.to_string())),
    }
}

/// Sends payloads to subscribed webhooks and meters deliveries
#[derive(Clone)]
pub struct WebhookDispatcher {
    db: PgPool,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(db: PgPool) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .user_agent(concat!("Ozza-Webhooks/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { db, client })
    }

    /// Delivers `payload` to one webhook. Non-2xx answers are errors.
    pub async fn deliver(&self, webhook: &Webhook, payload: &WebhookPayload) -> Result<u16, WebhookError> {
        let body = serde_json::to_vec(payload)?;
        let signature = sign(&webhook.secret, &body)?;

        let response = self
            .client
            .post(&webhook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, payload.event.as_str())
            .header(DELIVERY_HEADER, payload.id.to_string())
            .body(body)
            .send()
            .await?;

        let status = response.status();

        // Metering is best-effort
        if let Err(e) =
            UsageCounter::increment(&self.db, webhook.account_id, UsageMetric::WebhookDeliveries, 1).await
        {
            tracing::warn!(
                webhook_id = %webhook.id,
                account_id = %webhook.account_id,
                error = %e,
                "Failed to meter webhook delivery"
            );
        }

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(WebhookError::Rejected {
                status: status.as_u16(),
            })
        }
    }

    /// Delivers and reports instead of failing
    pub async fn deliver_with_report(&self, webhook: &Webhook, payload: &WebhookPayload) -> DeliveryReport {
        let started = Instant::now();
        let result = self.deliver(webhook, payload).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, error) = match &result {
            Ok(status) => (Some(*status), None),
            Err(WebhookError::Rejected { status }) => (Some(*status), Some(format!("Receiver answered {status}"))),
            Err(e) => (None, Some(e.to_string())),
        };

        match &error {
            None => tracing::debug!(
                webhook_id = %webhook.id,
                event = %payload.event,
                duration_ms,
                "Webhook delivered"
            ),
            Some(err) => tracing::warn!(
                webhook_id = %webhook.id,
                event = %payload.event,
                duration_ms,
                error = %err,
                "Webhook delivery failed"
            ),
        }

        DeliveryReport {
            webhook_id: webhook.id,
            delivery_id: payload.id,
            status,
            success: result.is_ok(),
            duration_ms,
            error,
        }
    }

    /// Delivers `event` to every active subscriber of `account_id`.
    pub async fn dispatch(
        &self,
        account_id: Uuid,
        event: &str,
        data: serde_json::Value,
    ) -> Result<Vec<DeliveryReport>, WebhookError> {
        let webhooks = Webhook::list_for_event(&self.db, account_id, event).await?;
        if webhooks.is_empty() {
            return Ok(Vec::new());
        }

        let payload = WebhookPayload::new(event, account_id, data);

        let reports = futures::future::join_all(
            webhooks
                .iter()
                .map(|webhook| self.deliver_with_report(webhook, &payload)),
        )
        .await;

        Ok(reports)
    }

    /// Fire-and-forget [`dispatch`](Self::dispatch), for use after a commit.
    pub fn spawn_dispatch(&self, account_id: Uuid, event: String, data: serde_json::Value) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(account_id, &event, data).await {
                tracing::error!(account_id = %account_id, event = %event, error = %e, "Webhook dispatch failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_format() {
        let sig = sign(b"secret", b"{\"event\":\"task.created\"}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert!(sig["sha256=".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let sig = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_signature() {
        let secret = Webhook::generate_secret();
        let body = br#"{"id":"1","event":"deliverable.reviewed"}"#;
        let header = sign(&secret, body).unwrap();

        assert!(verify_signature(&secret, body, &header));
        assert!(!verify_signature(&secret, b"{}", &header));
        assert!(!verify_signature(b"other", body, &header));
        assert!(!verify_signature(&secret, body, "sha256=00"));
    }

    /// Answers every connection with `status` and an empty body
    async fn one_shot_receiver(status: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/hook")
    }

    fn unreachable_pool() -> PgPool {
        let config = crate::db::pool::DatabaseConfig {
            connect_timeout_seconds: 1,
            min_connections: 0,
            ..crate::db::pool::DatabaseConfig::from_url("postgres://ozza@127.0.0.1:1/unused")
        };
        crate::db::pool::create_lazy_pool(&config).unwrap()
    }

    fn webhook_for(url: String) -> Webhook {
        Webhook {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            url,
            secret: Webhook::generate_secret(),
            active: true,
            events: vec![TEST_EVENT.to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_delivery_succeeds_when_metering_fails() {
        let url = one_shot_receiver("200 OK").await;
        let webhook = webhook_for(url);
        let dispatcher = WebhookDispatcher::new(unreachable_pool()).unwrap();
        let payload = WebhookPayload::new(TEST_EVENT, webhook.account_id, serde_json::json!({}));

        let report = dispatcher.deliver_with_report(&webhook, &payload).await;
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.status, Some(200));
    }

    #[tokio::test]
    async fn test_rejected_delivery_reports_status() {
        let url = one_shot_receiver("500 Internal Server Error").await;
        let webhook = webhook_for(url);
        let dispatcher = WebhookDispatcher::new(unreachable_pool()).unwrap();
        let payload = WebhookPayload::new(TEST_EVENT, webhook.account_id, serde_json::json!({}));

        let report = dispatcher.deliver_with_report(&webhook, &payload).await;
        assert!(!report.success);
        assert_eq!(report.status, Some(500));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://hooks.example.com/ozza").is_ok());
        assert!(validate_url("http://localhost:9000/in").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("/relative").is_err());
    }

    #[test]
    fn test_payload_shape() {
        let account_id = Uuid::new_v4();
        let payload = WebhookPayload::new("task.created", account_id, serde_json::json!({"title": "Draft"}));
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["event"], "task.created");
        assert_eq!(json["account_id"], account_id.to_string());
        assert_eq!(json["data"]["title"], "Draft");
        assert!(json.get("id").is_some());
        assert!(json.get("created_at").is_some());
    }
}
