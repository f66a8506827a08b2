use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{CreateOrderRequest, GatewayOrder, GatewayPayment};
use async_trait::async_trait;

/// Stand-in used when the service runs without gateway credentials.
///
/// Every call fails with a non-retryable provider error, so reconciliation
/// reports `gateway_api_error` and retry jobs leave records untouched.
#[derive(Debug, Clone, Default)]
pub struct DisabledGateway;

impl DisabledGateway {
    fn disabled<T>(&self) -> PaymentResult<T> {
        Err(PaymentError::ProviderError {
            provider: "disabled".to_string(),
            message: "payment gateway disabled by configuration".to_string(),
            provider_code: None,
            retryable: false,
        })
    }
}

#[async_trait]
impl PaymentGateway for DisabledGateway {
    fn provider(&self) -> &str {
        "disabled"
    }

    async fn fetch_payment(&self, _payment_id: &str) -> PaymentResult<GatewayPayment> {
        self.disabled()
    }

    async fn create_order(&self, _request: CreateOrderRequest) -> PaymentResult<GatewayOrder> {
        self.disabled()
    }
}
