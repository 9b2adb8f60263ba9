//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{consumption, health, purchases, subscriptions, topup, wallets};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Wallets
/// - `POST /v1/wallets` - Create a wallet
/// - `GET /v1/wallets/:org` - Get a wallet
/// - `GET /v1/wallets/:org/history` - List balance history
/// - `GET /v1/wallets/:org/forecast` - Consumption forecast
/// - `POST /v1/wallets/:org/adjust` - Manual adjustment
/// - `POST /v1/wallets/:org/suspend` - Suspend debits
/// - `POST /v1/wallets/:org/reactivate` - Reactivate
///
/// ## Purchases
/// - `GET /v1/packages` - Package catalog
/// - `POST /v1/quotes` - Price a prospective purchase
/// - `POST /v1/purchases` - Initialize a purchase
/// - `POST /v1/purchases/:reference/execute` - Execute
/// - `GET /v1/purchases/:reference` - Get by reference
/// - `POST /v1/purchases/:reference/cancel` - Cancel before execution
/// - `POST /v1/purchases/:reference/refund` - Refund the unconsumed remainder
/// - `GET /v1/wallets/:org/purchases` - List an organization's purchases
///
/// ## Subscriptions
/// - `POST /v1/subscriptions` - Subscribe
/// - `GET /v1/subscriptions/:id` - Get
/// - `POST /v1/subscriptions/:id/pause|resume|cancel` - Lifecycle
/// - `GET /v1/wallets/:org/subscriptions` - List
///
/// ## Auto-top-up and thresholds
/// - `PUT /v1/wallets/:org/topup-policy` - Configure
/// - `GET /v1/wallets/:org/topup-policy` - Get
/// - `POST /v1/wallets/:org/topup-policy/enable|disable` - Toggle
/// - `POST /v1/wallets/:org/thresholds` - Add a low-balance threshold
/// - `GET /v1/wallets/:org/thresholds` - List
/// - `DELETE /v1/wallets/:org/thresholds/:id` - Remove
///
/// ## Consumption (metering services)
/// - `POST /v1/consumption` - Report a consumption event
/// - `POST /v1/consumption/check` - Check balance sufficiency
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Wallets
        .route("/v1/wallets", post(wallets::create_wallet))
        .route("/v1/wallets/:org", get(wallets::get_wallet))
        .route("/v1/wallets/:org/history", get(wallets::list_history))
        .route("/v1/wallets/:org/forecast", get(wallets::get_forecast))
        .route("/v1/wallets/:org/adjust", post(wallets::adjust_wallet))
        .route("/v1/wallets/:org/suspend", post(wallets::suspend_wallet))
        .route(
            "/v1/wallets/:org/reactivate",
            post(wallets::reactivate_wallet),
        )
        // Thresholds
        .route(
            "/v1/wallets/:org/thresholds",
            post(wallets::add_threshold).get(wallets::list_thresholds),
        )
        .route(
            "/v1/wallets/:org/thresholds/:id",
            delete(wallets::remove_threshold),
        )
        // Packages and purchases
        .route("/v1/packages", get(purchases::list_packages))
        .route("/v1/quotes", post(purchases::quote))
        .route("/v1/purchases", post(purchases::initialize_purchase))
        .route("/v1/purchases/:reference", get(purchases::get_purchase))
        .route(
            "/v1/purchases/:reference/execute",
            post(purchases::execute_purchase),
        )
        .route(
            "/v1/purchases/:reference/cancel",
            post(purchases::cancel_purchase),
        )
        .route(
            "/v1/purchases/:reference/refund",
            post(purchases::refund_purchase),
        )
        .route("/v1/wallets/:org/purchases", get(purchases::list_purchases))
        // Subscriptions
        .route(
            "/v1/subscriptions",
            post(subscriptions::create_subscription),
        )
        .route(
            "/v1/subscriptions/:id",
            get(subscriptions::get_subscription),
        )
        .route(
            "/v1/subscriptions/:id/pause",
            post(subscriptions::pause_subscription),
        )
        .route(
            "/v1/subscriptions/:id/resume",
            post(subscriptions::resume_subscription),
        )
        .route(
            "/v1/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/v1/wallets/:org/subscriptions",
            get(subscriptions::list_subscriptions),
        )
        // Auto-top-up policies
        .route(
            "/v1/wallets/:org/topup-policy",
            put(topup::configure_policy).get(topup::get_policy),
        )
        .route(
            "/v1/wallets/:org/topup-policy/enable",
            post(topup::enable_policy),
        )
        .route(
            "/v1/wallets/:org/topup-policy/disable",
            post(topup::disable_policy),
        )
        // Consumption (metering services)
        .route("/v1/consumption", post(consumption::report_consumption))
        .route("/v1/consumption/check", post(consumption::check_balance))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
