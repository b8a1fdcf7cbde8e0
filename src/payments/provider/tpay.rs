use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::notification::{CallbackSecurity, ProviderNotification};
use super::{
    AccessCredential, PaymentProvider, RemoteTransaction, RemoteTransactionRequest,
    TransactionError,
};
use crate::config;
use crate::payments::models::Transaction;

/// key: tpay-config -> gateway credentials and callback targets
#[derive(Debug, Clone)]
pub struct TpayConfig {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub security_code: String,
    pub accept_test_mode: bool,
    pub success_url: String,
    pub error_url: String,
    pub notification_email: String,
    pub timeout: Duration,
}

impl TpayConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: config::TPAY_API_URL.clone(),
            client_id: config::TPAY_CLIENT_ID.clone(),
            client_secret: config::TPAY_CLIENT_SECRET.clone(),
            scope: config::TPAY_SCOPE.clone(),
            security_code: config::TPAY_SECURITY_CODE.clone(),
            accept_test_mode: *config::TPAY_ACCEPT_TEST_MODE,
            success_url: config::TPAY_SUCCESS_URL.clone(),
            error_url: config::TPAY_ERROR_URL.clone(),
            notification_email: config::TPAY_NOTIFICATION_EMAIL.clone(),
            timeout: Duration::from_secs(*config::TPAY_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct TpayAuthBody<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    scope: &'a str,
}

#[derive(Debug, Deserialize)]
struct TpayAuthResponse {
    expires_in: i64,
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TpayTransactionResponse {
    result: String,
    transaction_id: String,
    title: String,
    transaction_payment_url: String,
}

/// key: tpay-client -> REST adapter for the Tpay gateway
#[derive(Clone)]
pub struct TpayClient {
    client: reqwest::Client,
    config: TpayConfig,
    security: CallbackSecurity,
}

impl TpayClient {
    pub fn new(config: TpayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build tpay client: {err}"))?;
        let security = CallbackSecurity {
            security_code: config.security_code.clone(),
            accept_test_mode: config.accept_test_mode,
        };
        Ok(Self {
            client,
            config,
            security,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        request: reqwest::RequestBuilder,
        body: &B,
    ) -> Result<Value, TransactionError> {
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|err| TransactionError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransactionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|err| TransactionError::Decode(err.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for TpayClient {
    async fn authenticate(&self, now: DateTime<Utc>) -> Result<AccessCredential, TransactionError> {
        let body = TpayAuthBody {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            scope: &self.config.scope,
        };
        let raw = self
            .post_json(self.client.post(self.endpoint("oauth/auth")), &body)
            .await
            .map_err(|err| match err {
                TransactionError::Rejected { status, body } => {
                    TransactionError::Auth(format!("status {status}: {body}"))
                }
                other => other,
            })?;
        let parsed: TpayAuthResponse = serde_json::from_value(raw)
            .map_err(|err| TransactionError::Decode(err.to_string()))?;

        tracing::info!(expires_in = parsed.expires_in, "tpay credential issued");
        Ok(AccessCredential {
            access_token: parsed.access_token,
            token_type: parsed.token_type,
            expires_at: now + chrono::Duration::seconds(parsed.expires_in),
        })
    }

    async fn create_transaction(
        &self,
        credential: &AccessCredential,
        request: &RemoteTransactionRequest,
    ) -> Result<RemoteTransaction, TransactionError> {
        let amount: f64 = request
            .amount
            .parse()
            .map_err(|_| TransactionError::Decode(format!("invalid amount `{}`", request.amount)))?;
        let body = json!({
            "amount": amount,
            "description": request.description,
            "hiddenDescription": request.hidden_description,
            "lang": "pl",
            "payer": {
                "email": request.payer.email,
                "name": request.payer.name,
            },
            "callbacks": {
                "payerUrls": {
                    "success": request.success_url,
                    "error": request.error_url,
                },
                "notification": {
                    "email": request.notification_email,
                },
            },
        });

        let raw = self
            .post_json(
                self.client
                    .post(self.endpoint("transactions"))
                    .header(reqwest::header::AUTHORIZATION, credential.authorization_header()),
                &body,
            )
            .await?;
        let parsed: TpayTransactionResponse = serde_json::from_value(raw.clone())
            .map_err(|err| TransactionError::Decode(err.to_string()))?;
        if parsed.result != "success" {
            return Err(TransactionError::Rejected {
                status: 200,
                body: raw.to_string(),
            });
        }

        Ok(RemoteTransaction {
            transaction_id: parsed.transaction_id,
            title: parsed.title,
            payment_url: parsed.transaction_payment_url,
            raw,
        })
    }

    fn success_url(&self, reference: &str, inquiry_count: Option<i64>) -> String {
        let reference = reference.to_lowercase();
        match Url::parse(&self.config.success_url) {
            Ok(mut url) => {
                {
                    let mut pairs = url.query_pairs_mut();
                    if let Some(count) = inquiry_count {
                        pairs.append_pair("inquiry_count", &count.to_string());
                    }
                    pairs.append_pair("product", &reference);
                }
                url.to_string()
            }
            Err(err) => {
                tracing::warn!(?err, url = %self.config.success_url, "success url is not absolute; appending raw query");
                let mut url = self.config.success_url.clone();
                if let Some(count) = inquiry_count {
                    url.push_str(&format!("&inquiry_count={count}"));
                }
                url.push_str(&format!("&product={reference}"));
                url
            }
        }
    }

    fn error_url(&self) -> String {
        self.config.error_url.clone()
    }

    fn notification_email(&self) -> String {
        self.config.notification_email.clone()
    }

    fn verify_callback(
        &self,
        notification: &ProviderNotification,
        transaction: Option<&Transaction>,
    ) -> Vec<String> {
        self.security.verify(notification, transaction)
    }
}
