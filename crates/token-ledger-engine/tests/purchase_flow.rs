//! End-to-end purchase lifecycle tests.

mod common;

use chrono::{Duration, Utc};
use common::{FakeGateway, Harness, Scripted};
use token_ledger_core::{
    Amount, ChangeType, LedgerError, PurchaseStatus, PurchaseType, ReferenceType,
};
use token_ledger_engine::{Notification, PurchaseRequest};
use token_ledger_store::{ChangeRecord, HistoryFilter, Store};

fn one_time(harness: &Harness, reference: &str, quantity: i64) -> PurchaseRequest {
    PurchaseRequest {
        organization_id: harness.new_wallet(),
        reference_id: Some(reference.to_string()),
        purchase_type: PurchaseType::OneTime,
        package_id: None,
        custom_quantity: Some(quantity),
        payment_method_id: "pm_test".to_string(),
    }
}

fn consume(harness: &Harness, org: &token_ledger_core::OrganizationId, amount: i64, evt: &str) {
    harness
        .store
        .debit(
            org,
            amount,
            ChangeRecord {
                change_type: ChangeType::Consumption,
                reference_type: ReferenceType::Consumption,
                reference_id: evt,
                performed_by: "metering",
            },
        )
        .unwrap();
}

#[tokio::test]
async fn purchase_then_consume() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-a", 500);
    let org = request.organization_id;

    let purchase = harness.orchestrator.initialize(&request).unwrap();
    assert_eq!(purchase.total_amount, Amount::from_minor(500)); // $5.00
    assert_eq!(purchase.status, PurchaseStatus::Pending);

    let purchase = harness.orchestrator.execute("ref-a").await.unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);

    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 500);
    assert!(wallet.invariant_holds());

    consume(&harness, &org, 120, "evt-1");
    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 380);
    assert_eq!(wallet.total_consumed, 120);
    assert!(wallet.invariant_holds());

    // History reproduces the balance.
    let history = harness
        .store
        .list_history(&org, &HistoryFilter::default())
        .unwrap();
    let sum: i64 = history.iter().map(|e| e.change_amount).sum();
    assert_eq!(sum, wallet.balance);
}

#[tokio::test]
async fn initialize_is_idempotent_per_reference() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-b", 500);

    let first = harness.orchestrator.initialize(&request).unwrap();
    let replay = harness.orchestrator.initialize(&request).unwrap();
    assert_eq!(first.id, replay.id);

    // Same reference, different parameters.
    let mismatched = PurchaseRequest {
        custom_quantity: Some(600),
        ..request
    };
    let err = harness.orchestrator.initialize(&mismatched).unwrap_err();
    assert!(matches!(err, LedgerError::DuplicatePurchase { .. }));
}

#[tokio::test]
async fn execute_replay_returns_completed_without_recharging() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-c", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();

    harness.orchestrator.execute("ref-c").await.unwrap();
    let replay = harness.orchestrator.execute("ref-c").await.unwrap();
    assert_eq!(replay.status, PurchaseStatus::Completed);

    // One gateway charge, one credit.
    assert_eq!(harness.gateway.charged_keys(), vec!["ref-c".to_string()]);
    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 500);
}

#[tokio::test]
async fn concurrent_execute_charges_once() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-d", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();

    let a = harness.orchestrator.execute("ref-d");
    let b = harness.orchestrator.execute("ref-d");
    let (ra, rb) = tokio::join!(a, b);

    // Both observers see a resolved purchase; the winner charged.
    for result in [ra, rb] {
        let purchase = result.unwrap();
        assert!(matches!(
            purchase.status,
            PurchaseStatus::Completed | PurchaseStatus::Processing
        ));
    }
    assert_eq!(harness.gateway.charged_keys().len(), 1);
    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 500);
}

#[tokio::test]
async fn declined_charge_fails_purchase_and_leaves_wallet() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-e", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();
    harness.gateway.script([Scripted::Decline("card expired")]);

    let err = harness.orchestrator.execute("ref-e").await.unwrap_err();
    assert!(matches!(err, LedgerError::PaymentDeclined(_)));

    let purchase = harness.orchestrator.load("ref-e").unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Failed);
    assert_eq!(purchase.failure_reason.as_deref(), Some("card expired"));

    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 0);
    assert_eq!(
        harness
            .notifier
            .count(|n| matches!(n, Notification::PaymentFailed { .. })),
        1
    );
}

#[tokio::test]
async fn unknown_outcome_stays_processing_until_reconciled() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-f", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();
    harness.gateway.script([Scripted::Unavailable]);

    let err = harness.orchestrator.execute("ref-f").await.unwrap_err();
    assert!(matches!(err, LedgerError::GatewayUnavailable(_)));
    let purchase = harness.orchestrator.load("ref-f").unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Processing);

    // The gateway did take the charge; reconciliation finds and applies it.
    harness
        .gateway
        .set_lookup("ref-f", Some(FakeGateway::succeeded("txn-recovered")));
    let later = Utc::now() + Duration::minutes(20);
    let report = harness
        .orchestrator
        .reconcile(later, Duration::minutes(10), 10)
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.completed, 1);

    let purchase = harness.orchestrator.load("ref-f").unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(
        purchase.gateway_transaction_id.as_deref(),
        Some("txn-recovered")
    );
    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 500);
}

#[tokio::test]
async fn reconcile_fails_purchase_with_no_gateway_record() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-g", 500);
    harness.orchestrator.initialize(&request).unwrap();
    harness.gateway.script([Scripted::Unavailable]);
    let _ = harness.orchestrator.execute("ref-g").await;

    // No lookup entry: the charge never reached the gateway.
    let later = Utc::now() + Duration::minutes(20);
    let report = harness
        .orchestrator
        .reconcile(later, Duration::minutes(10), 10)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let purchase = harness.orchestrator.load("ref-g").unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Failed);
}

#[tokio::test]
async fn cancel_only_before_claim() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-h", 500);
    harness.orchestrator.initialize(&request).unwrap();

    let cancelled = harness.orchestrator.cancel("ref-h").unwrap();
    assert_eq!(cancelled.status, PurchaseStatus::Cancelled);

    // A cancelled purchase is terminal; executing it is an error, not a replay.
    let err = harness.orchestrator.execute("ref-h").await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    assert!(harness.gateway.charged_keys().is_empty());
}

#[tokio::test]
async fn failed_purchase_cannot_be_re_executed() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-h2", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();

    harness.gateway.script([Scripted::Decline("card_declined")]);
    let err = harness.orchestrator.execute("ref-h2").await.unwrap_err();
    assert!(matches!(err, LedgerError::PaymentDeclined(_)));

    // The decline is terminal too; a retry needs a fresh reference.
    let err = harness.orchestrator.execute("ref-h2").await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    assert_eq!(harness.gateway.charged_keys().len(), 1);
    let wallet = harness.store.get_wallet(&org).unwrap().unwrap();
    assert_eq!(wallet.balance, 0);
}

#[tokio::test]
async fn refund_shrinks_with_consumption() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-i", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();
    harness.orchestrator.execute("ref-i").await.unwrap();

    consume(&harness, &org, 200, "evt-1");

    let (purchase, wallet) = harness.orchestrator.refund("ref-i").await.unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Refunded);
    // 300 tokens remained refundable at $0.01 each.
    assert_eq!(purchase.refunded_tokens, Some(300));
    assert_eq!(purchase.refunded_amount, Some(Amount::from_minor(300)));
    assert_eq!(wallet.balance, 0);
    assert!(wallet.invariant_holds());
}

#[tokio::test]
async fn refund_blocked_when_fully_consumed() {
    let harness = Harness::new();
    let request = one_time(&harness, "ref-j", 500);
    let org = request.organization_id;
    harness.orchestrator.initialize(&request).unwrap();
    harness.orchestrator.execute("ref-j").await.unwrap();

    consume(&harness, &org, 500, "evt-1");

    let err = harness.orchestrator.refund("ref-j").await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    let purchase = harness.orchestrator.load("ref-j").unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
}

#[tokio::test]
async fn initialize_requires_wallet_and_valid_selector() {
    let harness = Harness::new();

    let no_wallet = PurchaseRequest {
        organization_id: token_ledger_core::OrganizationId::generate(),
        reference_id: None,
        purchase_type: PurchaseType::OneTime,
        package_id: None,
        custom_quantity: Some(500),
        payment_method_id: "pm_test".to_string(),
    };
    assert!(matches!(
        harness.orchestrator.initialize(&no_wallet),
        Err(LedgerError::NotFound { .. })
    ));

    let both_selectors = PurchaseRequest {
        organization_id: harness.new_wallet(),
        reference_id: None,
        purchase_type: PurchaseType::OneTime,
        package_id: Some("growth-10k".to_string()),
        custom_quantity: Some(500),
        payment_method_id: "pm_test".to_string(),
    };
    assert!(matches!(
        harness.orchestrator.initialize(&both_selectors),
        Err(LedgerError::Validation(_))
    ));
}
