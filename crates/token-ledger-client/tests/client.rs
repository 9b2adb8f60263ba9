//! Client integration tests against a mocked token-ledger API.

use token_ledger_client::{ClientError, ConsumptionEvent, PurchaseRequest, TokenLedgerClient};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> TokenLedgerClient {
    TokenLedgerClient::new(server.uri(), "test-api-key")
}

#[tokio::test]
async fn report_consumption_returns_new_balance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/consumption"))
        .and(header("x-api-key", "test-api-key"))
        .and(body_partial_json(serde_json::json!({
            "event_id": "evt-1",
            "amount": 250,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "balance": 750,
            "consumed": 250,
        })))
        .mount(&server)
        .await;

    let response = client(&server)
        .report_consumption(ConsumptionEvent {
            event_id: "evt-1".to_string(),
            organization_id: "org-1".to_string(),
            amount: 250,
        })
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.balance, 750);
}

#[tokio::test]
async fn insufficient_balance_maps_to_typed_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/consumption"))
        .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
            "error": {
                "code": "insufficient_balance",
                "message": "insufficient balance: balance=100, required=500",
                "details": { "balance": 100, "required": 500 }
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .report_consumption(ConsumptionEvent {
            event_id: "evt-1".to_string(),
            organization_id: "org-1".to_string(),
            amount: 500,
        })
        .await
        .unwrap_err();

    match err {
        ClientError::InsufficientBalance { balance, required } => {
            assert_eq!(balance, 100);
            assert_eq!(required, 500);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn check_balance_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/consumption/check"))
        .and(body_partial_json(serde_json::json!({
            "organization_id": "org-1",
            "required_tokens": 100,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sufficient": true,
            "balance": 900,
            "required_tokens": 100,
        })))
        .mount(&server)
        .await;

    let response = client(&server).check_balance("org-1", 100).await.unwrap();
    assert!(response.sufficient);
    assert_eq!(response.balance, 900);
}

#[tokio::test]
async fn purchase_tokens_initializes_then_executes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/purchases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "reference_id": "ref-1",
            "organization_id": "org-1",
            "status": "pending",
            "token_quantity": 500,
            "total_amount": "5.00",
            "currency": "USD",
            "gateway_transaction_id": null,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/purchases/ref-1/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "reference_id": "ref-1",
            "organization_id": "org-1",
            "status": "completed",
            "token_quantity": 500,
            "total_amount": "5.00",
            "currency": "USD",
            "gateway_transaction_id": "txn_1",
        })))
        .mount(&server)
        .await;

    let purchase = client(&server)
        .purchase_tokens(PurchaseRequest {
            organization_id: "org-1".to_string(),
            reference_id: None,
            package_id: None,
            custom_quantity: Some(500),
            payment_method_id: "pm_test".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(purchase.status, "completed");
    assert_eq!(purchase.gateway_transaction_id.as_deref(), Some("txn_1"));
}

#[tokio::test]
async fn unknown_wallet_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/wallets/org-9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {
                "code": "not_found",
                "message": "wallet not found: org-9",
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_wallet("org-9").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
}

#[tokio::test]
async fn unparseable_error_body_falls_back_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/wallets/org-1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("nope"))
        .mount(&server)
        .await;

    let err = client(&server).get_wallet("org-1").await.unwrap_err();
    match err {
        ClientError::Api { code, status, .. } => {
            assert_eq!(code, "unknown");
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
