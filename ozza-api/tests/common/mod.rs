//! Shared helpers for API integration tests
//!
//! Two kinds of tests live here:
//! - router tests built on a lazy pool, for paths that answer before any
//!   query runs (auth rejection, validation, signature checks);
//! - database tests that call `require_app!()` and are skipped without
//!   `DATABASE_URL`.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use ozza_api::{
    app::{build_router, AppState},
    config::{ApiConfig, Config, DatabaseConfig, InvitationConfig, JwtConfig, StripeSettings},
};
use ozza_shared::{
    db::{
        migrations::run_migrations,
        pool::{self, create_lazy_pool, create_pool},
    },
    models::account::{Account, Plan},
    payments::{CheckoutRequest, PaymentsError, PaymentsEvent, PaymentsProvider},
};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret-key-at-least-32-bytes-long";
pub const CALLBACK_SECRET: &str = "whsec_test_callback";
pub const PASSWORD: &str = "Sup3rSecret!pass";

pub fn test_config(database_url: &str) -> Config {
    Config {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            app_base_url: "https://app.ozza.test".to_string(),
            cors_origins: vec!["https://app.ozza.test".to_string()],
            production: false,
        },
        database: DatabaseConfig {
            url: database_url.to_string(),
            max_connections: 5,
        },
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
        },
        invitations: InvitationConfig {
            ttl_hours: 168,
            sweep_interval_secs: 300,
        },
        stripe: StripeSettings::default(),
    }
}

/// Payments provider that never leaves the process. Callbacks are signed
/// with a hex HMAC-SHA256 of the body under [`CALLBACK_SECRET`].
pub struct FakePayments;

#[derive(Deserialize)]
struct FakeCallback {
    #[serde(rename = "type")]
    kind: String,
    customer_id: Option<String>,
    plan: Option<Plan>,
}

pub fn sign_callback(payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(CALLBACK_SECRET.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl PaymentsProvider for FakePayments {
    async fn create_customer(&self, account: &Account, _email: &str) -> Result<String, PaymentsError> {
        Ok(format!("cus_{}", account.id.simple()))
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String, PaymentsError> {
        Ok(format!(
            "https://checkout.payments.test/{}/{}",
            request.customer_id,
            request.plan.as_str()
        ))
    }

    async fn create_portal_session(&self, customer_id: &str, _return_url: &str) -> Result<String, PaymentsError> {
        Ok(format!("https://portal.payments.test/{customer_id}"))
    }

    fn parse_callback(&self, payload: &str, signature_header: &str) -> Result<PaymentsEvent, PaymentsError> {
        if sign_callback(payload) != signature_header {
            return Err(PaymentsError::InvalidSignature("signature mismatch"));
        }

        let callback: FakeCallback =
            serde_json::from_str(payload).map_err(|e| PaymentsError::Parse(e.to_string()))?;

        Ok(match (callback.kind.as_str(), callback.customer_id, callback.plan) {
            ("plan_changed", Some(customer_id), Some(plan)) => PaymentsEvent::PlanChanged {
                customer_id,
                subscription_id: Some("sub_test".to_string()),
                plan,
            },
            ("subscription_ended", Some(customer_id), _) => PaymentsEvent::SubscriptionEnded { customer_id },
            (other, _, _) => PaymentsEvent::Ignored(other.to_string()),
        })
    }
}

fn router_for(pool: PgPool, database_url: &str) -> Router {
    let state = AppState::with_payments(pool, test_config(database_url), Arc::new(FakePayments))
        .expect("Failed to build app state");
    build_router(state)
}

/// Router whose pool never connects; only for requests that fail or
/// succeed before touching the database.
pub fn offline_router() -> Router {
    let url = "postgres://localhost:1/unused";
    let pool = create_lazy_pool(&pool::DatabaseConfig::from_url(url)).expect("lazy pool");
    router_for(pool, url)
}

pub struct TestApp {
    pub pool: PgPool,
    pub router: Router,
}

impl TestApp {
    /// Migrated database and router, or `None` without `DATABASE_URL`
    pub async fn new() -> Option<Self> {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").ok()?;

        let pool = create_pool(pool::DatabaseConfig {
            max_connections: 5,
            ..pool::DatabaseConfig::from_url(url.clone())
        })
        .await
        .expect("Failed to connect to test database");
        run_migrations(&pool).await.expect("Failed to run migrations");

        Some(Self {
            router: router_for(pool.clone(), &url),
            pool,
        })
    }

    pub async fn call(&self, request: Request<Body>) -> TestResponse {
        send(&self.router, request).await
    }

    /// Signs up through the API and returns the session
    pub async fn signup(&self, prefix: &str, extra: Value) -> Session {
        let mut body = serde_json::json!({
            "email": unique_email(prefix),
            "password": PASSWORD,
            "name": format!("Test {prefix}"),
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }

        let res = self.call(json_request(Method::POST, "/api/auth/signup", None, Some(body))).await;
        assert_eq!(res.status, StatusCode::CREATED, "signup failed: {}", res.body);
        Session::from_body(&res.body)
    }
}

#[macro_export]
macro_rules! require_app {
    () => {
        match common::TestApp::new().await {
            Some(app) => app,
            None => {
                eprintln!("DATABASE_URL not set; skipping database test");
                return;
            }
        }
    };
}

/// What a signup or invitation acceptance hands back
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub role: String,
    pub account_id: Option<Uuid>,
}

impl Session {
    pub fn from_body(body: &Value) -> Self {
        Self {
            token: body["session_token"].as_str().expect("session_token").to_string(),
            user_id: body["user"]["id"].as_str().and_then(|s| s.parse().ok()).expect("user id"),
            role: body["user"]["role"].as_str().expect("role").to_string(),
            account_id: body["account"]["id"].as_str().and_then(|s| s.parse().ok()),
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw: Vec<u8>,
}

pub fn unique_email(prefix: &str) -> String {
    format!("{}+{}@example.com", prefix, Uuid::new_v4().simple())
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let raw = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);

    TestResponse {
        status,
        headers,
        body,
        raw,
    }
}
