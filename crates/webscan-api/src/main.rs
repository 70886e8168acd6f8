//! Webscan API Server

mod auth;
mod db;
mod dispatch;
mod error;
mod routes;
mod stripe;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webscan_core::store::{SubscriptionStore, UserStore};
use webscan_core::{BillingService, ScanService};

use crate::db::repos::{PgQuotaStore, PgScanStore, PgSubscriptionStore, PgUserStore};
use crate::dispatch::HttpScanDispatcher;
use crate::stripe::StripeClient;

/// Application state shared across handlers
pub struct AppState {
    pub scans: ScanService,
    pub billing: BillingService,
    pub stripe: Arc<StripeClient>,
    pub users: Arc<dyn UserStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub config: AppConfig,
}

/// Application configuration
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub backend_api_url: String,
    pub app_base_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub dispatch_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/webscan".to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            backend_api_url: std::env::var("BACKEND_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            dispatch_timeout_secs: 30,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "webscan_api=debug,webscan_core=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Webscan API Server");

    let config = AppConfig::default();

    // Connect to database
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    info!("Database migrations complete");

    // Storage
    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));
    let scans = Arc::new(PgScanStore::new(pool.clone()));
    let quota = Arc::new(PgQuotaStore::new(pool.clone()));
    let subscriptions: Arc<dyn SubscriptionStore> =
        Arc::new(PgSubscriptionStore::new(pool.clone()));

    // External collaborators
    let dispatcher = Arc::new(HttpScanDispatcher::new(
        config.backend_api_url.clone(),
        Duration::from_secs(config.dispatch_timeout_secs),
    ));
    let stripe = Arc::new(StripeClient::new(config.stripe_secret_key.clone()));

    // Services
    let callback_url = format!("{}/api/scan/callback", config.app_base_url);
    let scan_service = ScanService::new(
        users.clone(),
        scans,
        quota,
        subscriptions.clone(),
        dispatcher,
        callback_url,
    );
    let billing_service = BillingService::new(users.clone(), subscriptions.clone(), stripe.clone());

    // Create shared state
    let state = Arc::new(AppState {
        scans: scan_service,
        billing: billing_service,
        stripe,
        users,
        subscriptions,
        config,
    });

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(routes::health_check))

        // Scans
        .route("/api/scans", post(routes::scans::create_scan))
        .route("/api/scans", get(routes::scans::list_scans))
        .route("/api/scans/:id", get(routes::scans::get_scan))
        .route("/api/scans/:id/results", get(routes::scans::get_results))

        // Backend callback
        .route("/api/scan/callback", post(routes::callback::scan_callback))

        // Billing
        .route("/api/billing/webhook", post(routes::billing::webhook))
        .route("/api/billing/checkout", post(routes::billing::create_checkout_session))
        .route("/api/billing/portal", post(routes::billing::create_portal_session))

        // Account
        .route("/api/account/me", get(routes::account::me))
        .route("/api/account/usage", get(routes::account::usage))

        // Admin
        .route("/api/admin/stats", get(routes::admin::get_stats))

        // CORS
        .layer(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any))

        // Tracing
        .layer(TraceLayer::new_for_http())

        // State
        .with_state(state);

    // Start server
    let addr = "0.0.0.0:3000";
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
