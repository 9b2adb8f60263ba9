//! Business engines for the token wallet and billing ledger.
//!
//! Each engine is dependency-injected over [`token_ledger_store::Store`] and,
//! where money moves, a [`PaymentGateway`]:
//!
//! - [`PurchaseOrchestrator`] — the purchase lifecycle: initialize, execute
//!   (idempotent), cancel, refund, and reconciliation of purchases stuck in
//!   `processing`.
//! - [`SubscriptionScheduler`] — recurring billing with worker leases, grace
//!   periods, and failure-driven cancellation.
//! - [`AutoTopupEngine`] — threshold and scheduled automatic replenishment
//!   under a monthly spending cap.
//! - [`ThresholdMonitor`] — low-balance alerts with per-day storm dedup.
//! - [`ForecastCalculator`] — consumption-rate projections from the balance
//!   history.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod alerts;
pub mod forecast;
pub mod gateway;
pub mod http_gateway;
pub mod notify;
pub mod purchase;
pub mod retry;
pub mod scheduler;
pub mod topup;

pub use alerts::ThresholdMonitor;
pub use forecast::{ForecastCalculator, UsageForecast};
pub use gateway::{ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway};
pub use http_gateway::HttpGateway;
pub use notify::{LogDispatcher, Notification, NotificationDispatcher};
pub use purchase::{PurchaseOrchestrator, PurchaseRequest, ReconcileReport};
pub use scheduler::{BillingRunReport, SchedulerConfig, SubscribeRequest, SubscriptionScheduler};
pub use topup::{AutoTopupEngine, TopupRunReport};
