//! Token Ledger HTTP API Service.
//!
//! This crate provides the HTTP API over the ledger engines:
//!
//! - Wallet management, balance history, and forecasting
//! - Purchase initialization, execution, cancellation, and refunds
//! - Subscription lifecycle
//! - Auto-top-up policies and low-balance thresholds
//! - Consumption reporting for metering services
//!
//! # Authentication
//!
//! All `/v1` routes require the service API key (`x-api-key` header). The
//! service sits behind other platform services; there is no end-user auth
//! surface here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async only for routing consistency

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
