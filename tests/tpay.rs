use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use entitlements::payments::{
    AccessCredential, Payer, PaymentProvider, RemoteTransactionRequest, TpayClient, TpayConfig,
    TransactionError,
};
use httpmock::prelude::*;
use serde_json::json;

fn config(api_url: String) -> TpayConfig {
    TpayConfig {
        api_url,
        client_id: "01-client".to_string(),
        client_secret: "s3cret".to_string(),
        scope: "read".to_string(),
        security_code: "code".to_string(),
        accept_test_mode: false,
        success_url: "https://app.example.com/payment/success".to_string(),
        error_url: "https://app.example.com/payment/error".to_string(),
        notification_email: "payments@example.com".to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn request() -> RemoteTransactionRequest {
    RemoteTransactionRequest {
        amount: "29.99".to_string(),
        description: "PLAYMAKER.PRO | Monthly premium profile".to_string(),
        hidden_description: "0b1c4bd4-5a5e-4b4e-8c53-2f4bba1cf3f1".to_string(),
        payer: Payer {
            email: "buyer@example.com".to_string(),
            name: "Buyer".to_string(),
        },
        success_url: "https://app.example.com/payment/success?product=premium".to_string(),
        error_url: "https://app.example.com/payment/error".to_string(),
        notification_email: "payments@example.com".to_string(),
    }
}

fn credential() -> AccessCredential {
    AccessCredential {
        access_token: "tok-123".to_string(),
        token_type: "Bearer".to_string(),
        expires_at: Utc::now() + ChronoDuration::hours(2),
    }
}

#[tokio::test]
async fn authenticate_exchanges_client_credentials() {
    let server = MockServer::start_async().await;
    let auth_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/oauth/auth")
            .json_body(json!({
                "client_id": "01-client",
                "client_secret": "s3cret",
                "scope": "read",
            }));
        then.status(200).json_body(json!({
            "issued_at": 1717416000,
            "scope": "read",
            "token_type": "Bearer",
            "expires_in": 7200,
            "client_id": "01-client",
            "access_token": "tok-123",
        }));
    });

    let client = TpayClient::new(config(server.base_url())).unwrap();
    let now = Utc::now();
    let credential = client.authenticate(now).await.unwrap();

    auth_mock.assert();
    assert_eq!(credential.access_token, "tok-123");
    assert_eq!(credential.expires_at, now + ChronoDuration::seconds(7200));
    assert!(credential.is_valid(now));
}

#[tokio::test]
async fn rejected_authentication_is_an_auth_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/oauth/auth");
        then.status(401).body("invalid_client");
    });

    let client = TpayClient::new(config(server.base_url())).unwrap();
    let err = client.authenticate(Utc::now()).await.unwrap_err();

    assert!(matches!(err, TransactionError::Auth(ref message) if message.contains("invalid_client")));
    assert!(err.invalidates_credential());
}

#[tokio::test]
async fn create_transaction_sends_bearer_and_payload() {
    let server = MockServer::start_async().await;
    let create_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/transactions")
            .header("authorization", "Bearer tok-123")
            .json_body_partial(
                r#"{
                    "amount": 29.99,
                    "description": "PLAYMAKER.PRO | Monthly premium profile",
                    "hiddenDescription": "0b1c4bd4-5a5e-4b4e-8c53-2f4bba1cf3f1",
                    "payer": { "email": "buyer@example.com", "name": "Buyer" },
                    "callbacks": {
                        "payerUrls": {
                            "success": "https://app.example.com/payment/success?product=premium",
                            "error": "https://app.example.com/payment/error"
                        },
                        "notification": { "email": "payments@example.com" }
                    }
                }"#,
            );
        then.status(200).json_body(json!({
            "result": "success",
            "requestId": "9c4b0e",
            "transactionId": "01HZX",
            "title": "TR-BRA-1234",
            "status": "pending",
            "transactionPaymentUrl": "https://secure.sandbox.tpay.com/?title=TR-BRA-1234",
        }));
    });

    let client = TpayClient::new(config(server.base_url())).unwrap();
    let remote = client
        .create_transaction(&credential(), &request())
        .await
        .unwrap();

    create_mock.assert();
    assert_eq!(remote.transaction_id, "01HZX");
    assert_eq!(remote.title, "TR-BRA-1234");
    assert_eq!(
        remote.payment_url,
        "https://secure.sandbox.tpay.com/?title=TR-BRA-1234"
    );
    assert_eq!(remote.raw["requestId"], "9c4b0e");
}

#[tokio::test]
async fn create_transaction_maps_failures() {
    let server = MockServer::start_async().await;
    let mut unauthorized = server.mock(|when, then| {
        when.method(POST).path("/transactions");
        then.status(401).body("token expired");
    });

    let client = TpayClient::new(config(server.base_url())).unwrap();
    let err = client
        .create_transaction(&credential(), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, TransactionError::Rejected { status: 401, .. }));
    assert!(err.invalidates_credential());
    unauthorized.delete();

    server.mock(|when, then| {
        when.method(POST).path("/transactions");
        then.status(200).json_body(json!({
            "result": "failed",
            "transactionId": "",
            "title": "",
            "transactionPaymentUrl": "",
        }));
    });
    let err = client
        .create_transaction(&credential(), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, TransactionError::Rejected { status: 200, .. }));
    assert!(!err.invalidates_credential());
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    let client = TpayClient::new(config("http://127.0.0.1:9".to_string())).unwrap();
    let err = client.authenticate(Utc::now()).await.unwrap_err();
    assert!(matches!(err, TransactionError::Transport(_)));
}
