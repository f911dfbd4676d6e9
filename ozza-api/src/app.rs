/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use ozza_api::{app::{build_router, AppState}, config::Config};
/// use ozza_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = create_pool(DatabaseConfig::from_url(config.database.url.clone())).await?;
/// let state = AppState::new(pool, config)?;
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    error::ApiError,
    middleware::{
        auth::{require_staff_layer, session_auth_layer},
        security::SecurityHeadersLayer,
    },
};
use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};
use ozza_shared::{
    payments::{PaymentsProvider, StripeProvider},
    quota::QuotaEnforcer,
    webhooks::WebhookDispatcher,
};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,

    pub config: Arc<Config>,

    pub payments: Arc<dyn PaymentsProvider>,

    pub webhooks: WebhookDispatcher,

    pub quota: QuotaEnforcer,
}

impl AppState {
    /// State backed by the Stripe provider from `config.stripe`
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let payments = Arc::new(StripeProvider::new(config.stripe.provider_config())?);
        Self::with_payments(db, config, payments)
    }

    /// State with an explicit payments provider
    pub fn with_payments(
        db: PgPool,
        config: Config,
        payments: Arc<dyn PaymentsProvider>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            webhooks: WebhookDispatcher::new(db.clone())?,
            quota: QuotaEnforcer::new(db.clone()),
            db,
            config: Arc::new(config),
            payments,
        })
    }

    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    /// Absolute URL on the web app, e.g. `app_url("/billing")`
    pub fn app_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api.app_base_url, path)
    }
}

/// Builds the complete router
///
/// ```text
/// /health                                   public
/// /api/auth/{signup,login,logout,refresh}   public
/// /api/invitations/preview                  public
/// /api/community-links/preview              public
/// /api/billing/webhook                      public, signature-verified
/// /api/...                                  session required
/// /api/admin/...                            session + admin/developer
/// ```
///
/// Middleware, outermost first: security headers, CORS, compression,
/// tracing; then per-route session auth.
pub fn build_router(state: AppState) -> Router {
    use crate::routes::{
        accounts, admin, auth, billing, comments, community_links, dashboard, deliverables, files,
        health, integrations, invitations, milestones, projects, tasks, time_entries, webhooks,
    };

    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/refresh", post(auth::refresh))
        .route("/invitations/preview", get(invitations::preview_invitation))
        .route("/community-links/preview", get(community_links::preview_community_link))
        .route("/billing/webhook", post(billing::payments_webhook));

    let admin_routes = Router::new()
        .route("/stats", get(admin::stats))
        .route("/security-logs", get(admin::list_security_logs))
        .route("/security-logs/export", get(admin::export_security_logs))
        .route_layer(from_fn(require_staff_layer));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::archive_project),
        )
        .route("/:id/activity", get(projects::list_activity))
        .route(
            "/:id/milestones",
            get(milestones::list_milestones).post(milestones::create_milestone),
        )
        .route(
            "/:id/milestones/:milestone_id",
            patch(milestones::update_milestone).delete(milestones::delete_milestone),
        )
        .route("/:id/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/:id/tasks/:task_id",
            patch(tasks::update_task).delete(tasks::delete_task),
        )
        .route(
            "/:id/deliverables",
            get(deliverables::list_deliverables).post(deliverables::create_deliverable),
        )
        .route(
            "/:id/deliverables/:deliverable_id",
            patch(deliverables::update_deliverable).delete(deliverables::delete_deliverable),
        )
        .route(
            "/:id/deliverables/:deliverable_id/review",
            post(deliverables::review_deliverable),
        )
        .route(
            "/:id/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route("/:id/comments/:comment_id", delete(comments::delete_comment))
        .route(
            "/:id/time-entries",
            get(time_entries::list_time_entries).post(time_entries::create_time_entry),
        )
        .route("/:id/time-entries/:entry_id", delete(time_entries::delete_time_entry))
        .route("/:id/files", get(files::list_files).post(files::create_file))
        .route("/:id/files/:file_id", delete(files::delete_file))
        .route("/:id/files/:file_id/download", get(files::download_file));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me).patch(auth::update_me))
        .route("/invitations", get(invitations::list_invitations))
        .route("/invitations/agency", post(invitations::create_agency_invitation))
        .route("/invitations/client", post(invitations::create_client_invitation))
        .route("/invitations/accept", post(invitations::accept_invitation))
        .route("/invitations/:id/revoke", post(invitations::revoke_invitation))
        .route(
            "/community-links",
            get(community_links::list_community_links).post(community_links::create_community_link),
        )
        .route(
            "/community-links/:id/deactivate",
            post(community_links::deactivate_community_link),
        )
        .route("/accounts", get(accounts::list_accounts))
        .route("/accounts/:id", get(accounts::get_account))
        .route("/accounts/:id/branding", patch(accounts::update_branding))
        .route("/accounts/:id/members", get(accounts::list_members))
        .route("/accounts/:id/members/:user_id", delete(accounts::remove_member))
        .route("/accounts/:id/children", get(accounts::list_children))
        .nest("/projects", project_routes)
        .route("/billing/usage", get(billing::usage))
        .route("/billing/checkout", post(billing::checkout))
        .route("/billing/portal", post(billing::portal))
        .route("/webhooks", get(webhooks::list_webhooks).post(webhooks::create_webhook))
        .route("/webhooks/:id", delete(webhooks::delete_webhook))
        .route("/webhooks/:id/test", post(webhooks::test_webhook))
        .route(
            "/integrations",
            get(integrations::list_integrations).post(integrations::create_integration),
        )
        .route("/integrations/:id", delete(integrations::delete_integration))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/dashboard/redirect", get(dashboard::redirect))
        .nest("/admin", admin_routes)
        .route_layer(from_fn_with_state(state.clone(), session_auth_layer));

    let api_routes = public_routes.merge(protected_routes);

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        user_id = tracing::field::Empty,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_is_permissive() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}
