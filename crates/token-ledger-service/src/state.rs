//! Application state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use token_ledger_core::Amount;
use token_ledger_engine::{
    AutoTopupEngine, ChargeOutcome, ChargeRequest, ForecastCalculator, GatewayError, HttpGateway,
    LogDispatcher, NotificationDispatcher, PaymentGateway, PurchaseOrchestrator, SchedulerConfig,
    SubscriptionScheduler, ThresholdMonitor,
};
use token_ledger_store::{RocksStore, Store};

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Purchase lifecycle orchestrator.
    pub orchestrator: Arc<PurchaseOrchestrator>,

    /// Subscription billing scheduler.
    pub scheduler: Arc<SubscriptionScheduler>,

    /// Auto-top-up engine.
    pub topup: Arc<AutoTopupEngine>,

    /// Low-balance threshold monitor.
    pub monitor: Arc<ThresholdMonitor>,

    /// Consumption forecaster.
    pub forecast: Arc<ForecastCalculator>,
}

impl AppState {
    /// Create the application state, building the payment gateway from
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured gateway URL or key is unusable.
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Result<Self, GatewayError> {
        let gateway: Arc<dyn PaymentGateway> =
            match (&config.gateway_base_url, &config.gateway_api_key) {
                (Some(url), Some(key)) => {
                    tracing::info!(gateway_url = %url, "Payment gateway enabled");
                    Arc::new(HttpGateway::new(
                        url,
                        key,
                        Duration::from_secs(config.gateway_timeout_seconds),
                    )?)
                }
                _ => {
                    tracing::warn!("Payment gateway not configured - charges will not settle");
                    Arc::new(UnconfiguredGateway)
                }
            };

        Ok(Self::with_gateway(store, config, gateway))
    }

    /// Create the application state with an explicit gateway.
    ///
    /// This is the wiring point tests use to substitute a fake gateway.
    #[must_use]
    pub fn with_gateway(
        store: Arc<RocksStore>,
        config: ServiceConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let notifier: Arc<dyn NotificationDispatcher> = Arc::new(LogDispatcher);
        let store_dyn = store.clone() as Arc<dyn Store>;

        let orchestrator = Arc::new(PurchaseOrchestrator::new(
            store_dyn.clone(),
            gateway,
            config.pricing.clone(),
            notifier.clone(),
        ));

        let scheduler = Arc::new(SubscriptionScheduler::new(
            store_dyn.clone(),
            orchestrator.clone(),
            config.pricing.clone(),
            notifier.clone(),
            SchedulerConfig {
                grace_period_days: config.grace_period_days,
                max_failed_payments: config.max_failed_payments,
                ..SchedulerConfig::default()
            },
        ));

        let topup = Arc::new(AutoTopupEngine::new(
            store_dyn.clone(),
            orchestrator.clone(),
            config.pricing.clone(),
            notifier.clone(),
        ));

        let monitor = Arc::new(ThresholdMonitor::new(store_dyn.clone(), notifier));
        let forecast = Arc::new(ForecastCalculator::new(store_dyn));

        Self {
            store,
            config,
            orchestrator,
            scheduler,
            topup,
            monitor,
            forecast,
        }
    }

    /// Check if a real payment gateway is configured.
    #[must_use]
    pub fn has_gateway(&self) -> bool {
        self.config.gateway_base_url.is_some() && self.config.gateway_api_key.is_some()
    }
}

/// Stand-in gateway used when no gateway is configured.
///
/// Every call reports a transport failure, so charges are treated as
/// unknown-outcome and purchases wait in `processing` rather than being
/// fabricated as declined.
struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn charge(&self, _request: &ChargeRequest<'_>) -> Result<ChargeOutcome, GatewayError> {
        Err(GatewayError::Transport(
            "payment gateway not configured".into(),
        ))
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: Amount,
        _currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        Err(GatewayError::Transport(
            "payment gateway not configured".into(),
        ))
    }

    async fn lookup(&self, _idempotency_key: &str) -> Result<Option<ChargeOutcome>, GatewayError> {
        Err(GatewayError::Transport(
            "payment gateway not configured".into(),
        ))
    }
}
