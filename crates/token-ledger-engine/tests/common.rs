//! Shared test fixtures for the engine crates.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use token_ledger_core::{Amount, OrganizationId, PricingConfig, Wallet};
use token_ledger_engine::{
    ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, Notification,
    NotificationDispatcher, PaymentGateway, PurchaseOrchestrator,
};
use token_ledger_store::{RocksStore, Store};

/// A scripted gateway response.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Charge succeeds.
    Succeed,
    /// Charge is definitively declined.
    Decline(&'static str),
    /// Gateway gives no definitive answer.
    Unavailable,
}

/// In-memory gateway with scriptable outcomes.
///
/// Charges consume scripted outcomes in order; with nothing scripted every
/// charge succeeds. Lookups answer from an explicit table, `Ok(None)` when
/// unset.
#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<VecDeque<Scripted>>,
    lookups: Mutex<HashMap<String, Option<ChargeOutcome>>>,
    charged_keys: Mutex<Vec<String>>,
    counter: Mutex<u64>,
}

impl FakeGateway {
    pub fn script(&self, outcomes: impl IntoIterator<Item = Scripted>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn set_lookup(&self, idempotency_key: &str, outcome: Option<ChargeOutcome>) {
        self.lookups
            .lock()
            .unwrap()
            .insert(idempotency_key.to_string(), outcome);
    }

    /// Idempotency keys of every charge attempt, in order.
    pub fn charged_keys(&self) -> Vec<String> {
        self.charged_keys.lock().unwrap().clone()
    }

    pub fn succeeded(transaction_id: &str) -> ChargeOutcome {
        ChargeOutcome {
            transaction_id: transaction_id.to_string(),
            status: ChargeStatus::Succeeded,
            decline_reason: None,
        }
    }

    pub fn declined(reason: &str) -> ChargeOutcome {
        ChargeOutcome {
            transaction_id: String::new(),
            status: ChargeStatus::Declined,
            decline_reason: Some(reason.to_string()),
        }
    }

    fn next_transaction_id(&self) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("txn-{counter}")
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge(&self, request: &ChargeRequest<'_>) -> Result<ChargeOutcome, GatewayError> {
        self.charged_keys
            .lock()
            .unwrap()
            .push(request.idempotency_key.to_string());

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted.unwrap_or(Scripted::Succeed) {
            Scripted::Succeed => Ok(Self::succeeded(&self.next_transaction_id())),
            Scripted::Decline(reason) => Ok(Self::declined(reason)),
            Scripted::Unavailable => Err(GatewayError::Timeout),
        }
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: Amount,
        _currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        Ok(Self::succeeded(&self.next_transaction_id()))
    }

    async fn lookup(&self, idempotency_key: &str) -> Result<Option<ChargeOutcome>, GatewayError> {
        Ok(self
            .lookups
            .lock()
            .unwrap()
            .get(idempotency_key)
            .cloned()
            .flatten())
    }
}

/// Dispatcher that records every notification for assertions.
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|n| predicate(n)).count()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: &Notification) {
        self.events.lock().unwrap().push(notification.clone());
    }
}

/// Everything the engine tests need, wired over a temp RocksDB.
pub struct Harness {
    pub store: Arc<RocksStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingDispatcher>,
    pub orchestrator: Arc<PurchaseOrchestrator>,
    pub pricing: PricingConfig,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingDispatcher::default());

        // One cent per token, so 500 tokens price at $5.00.
        let pricing = PricingConfig {
            default_price_per_token: Amount::from_minor(1),
            ..PricingConfig::default()
        };

        let orchestrator = Arc::new(PurchaseOrchestrator::new(
            store.clone() as Arc<dyn Store>,
            gateway.clone(),
            pricing.clone(),
            notifier.clone(),
        ));

        Self {
            store,
            gateway,
            notifier,
            orchestrator,
            pricing,
            _dir: dir,
        }
    }

    /// Create a fresh wallet and return its organization id.
    pub fn new_wallet(&self) -> OrganizationId {
        let organization_id = OrganizationId::generate();
        let wallet = Wallet::new(organization_id, Amount::from_minor(1));
        self.store.put_wallet(&wallet).unwrap();
        organization_id
    }
}
