//! Common test utilities for token-ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use tempfile::TempDir;

use token_ledger_core::{Amount, PricingConfig};
use token_ledger_engine::{
    ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway,
};
use token_ledger_service::{create_router, AppState, ServiceConfig};
use token_ledger_store::RocksStore;

/// Gateway test double: succeeds unless a decline reason has been queued.
#[derive(Default)]
pub struct TestGateway {
    declines: Mutex<VecDeque<String>>,
    counter: Mutex<u64>,
}

impl TestGateway {
    /// Queue a decline for the next charge.
    pub fn push_decline(&self, reason: &str) {
        self.declines.lock().unwrap().push_back(reason.to_string());
    }

    fn next_transaction_id(&self) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("txn-{counter}")
    }
}

#[async_trait]
impl PaymentGateway for TestGateway {
    async fn charge(&self, _request: &ChargeRequest<'_>) -> Result<ChargeOutcome, GatewayError> {
        if let Some(reason) = self.declines.lock().unwrap().pop_front() {
            return Ok(ChargeOutcome {
                transaction_id: String::new(),
                status: ChargeStatus::Declined,
                decline_reason: Some(reason),
            });
        }
        Ok(ChargeOutcome {
            transaction_id: self.next_transaction_id(),
            status: ChargeStatus::Succeeded,
            decline_reason: None,
        })
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: Amount,
        _currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        Ok(ChargeOutcome {
            transaction_id: self.next_transaction_id(),
            status: ChargeStatus::Succeeded,
            decline_reason: None,
        })
    }

    async fn lookup(&self, _idempotency_key: &str) -> Result<Option<ChargeOutcome>, GatewayError> {
        Ok(None)
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The gateway double, for scripting declines.
    pub gateway: Arc<TestGateway>,
    /// The service API key for authenticated requests.
    pub service_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let service_api_key = "test-service-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(service_api_key.clone()),
            // One cent per token keeps the arithmetic visible in assertions.
            pricing: PricingConfig {
                default_price_per_token: Amount::from_minor(1),
                ..PricingConfig::default()
            },
            ..ServiceConfig::default()
        };

        let gateway = Arc::new(TestGateway::default());
        let state = AppState::with_gateway(store, config, gateway.clone());
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            gateway,
            service_api_key,
        }
    }

    /// Create a wallet and return its organization id.
    pub async fn create_wallet(&self) -> String {
        let response = self
            .server
            .post("/v1/wallets")
            .add_header("x-api-key", self.service_api_key.clone())
            .json(&serde_json::json!({}))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["organization_id"].as_str().unwrap().to_string()
    }

    /// Buy `quantity` tokens for `org` through the full purchase flow.
    pub async fn buy_tokens(&self, org: &str, quantity: i64) {
        let response = self
            .server
            .post("/v1/purchases")
            .add_header("x-api-key", self.service_api_key.clone())
            .json(&serde_json::json!({
                "organization_id": org,
                "custom_quantity": quantity,
                "payment_method_id": "pm_test"
            }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        let reference = body["reference_id"].as_str().unwrap();

        self.server
            .post(&format!("/v1/purchases/{reference}/execute"))
            .add_header("x-api-key", self.service_api_key.clone())
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
