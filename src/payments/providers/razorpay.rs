use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{CreateOrderRequest, GatewayOrder, GatewayPayment};
use crate::payments::utils::{HttpAuth, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "razorpay";

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            base_url: "https://api.razorpay.com/v1".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl RazorpayConfig {
    pub fn from_gateway_config(config: &crate::config::GatewayConfig) -> Self {
        Self {
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: PaymentHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> PaymentResult<Self> {
        if config.key_id.trim().is_empty() || config.key_secret.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "gateway key id and secret are required".to_string(),
                field: Some("GATEWAY_KEY_ID".to_string()),
            });
        }
        let http = PaymentHttpClient::new(
            PROVIDER,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> HttpAuth<'_> {
        HttpAuth::Basic {
            username: &self.config.key_id,
            password: &self.config.key_secret,
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<GatewayPayment> {
        if payment_id.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "payment id is required".to_string(),
                field: Some("payment_id".to_string()),
            });
        }

        let raw: RazorpayPayment = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/payments/{}", payment_id)),
                Some(self.auth()),
                None,
            )
            .await
            .map_err(|e| match e {
                PaymentError::NotFound { .. } => PaymentError::NotFound {
                    resource: "payment".to_string(),
                    id: payment_id.to_string(),
                },
                other => other,
            })?;

        Ok(GatewayPayment {
            id: raw.id,
            order_id: raw.order_id,
            status: raw.status,
            amount_minor: raw.amount,
            currency: raw.currency,
            error_description: raw.error_description,
        })
    }

    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<GatewayOrder> {
        if request.amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "receipt": request.receipt,
            "notes": request.notes,
        });

        let raw: RazorpayOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/orders"),
                Some(self.auth()),
                Some(&payload),
            )
            .await?;
        info!(gateway_order_id = %raw.id, receipt = ?raw.receipt, "gateway order created");

        Ok(GatewayOrder {
            id: raw.id,
            amount_minor: raw.amount,
            currency: raw.currency,
            receipt: raw.receipt,
            status: raw.status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    #[serde(default)]
    order_id: Option<String>,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
    status: String,
}
