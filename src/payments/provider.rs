use crate::payments::error::PaymentResult;
use crate::payments::types::{CreateOrderRequest, GatewayOrder, GatewayPayment};
use async_trait::async_trait;

/// The minimal gateway contract the engine depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Identifier stored in `PaymentIntent::provider`.
    fn provider(&self) -> &str;

    /// Authoritative payment record; `PaymentError::NotFound` when the gateway
    /// has no such payment.
    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<GatewayPayment>;

    /// Creates a fresh gateway order for a payment retry.
    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<GatewayOrder>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn provider(&self) -> &str {
            "mock"
        }

        async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<GatewayPayment> {
            if payment_id == "missing" {
                return Err(PaymentError::NotFound {
                    resource: "payment".to_string(),
                    id: payment_id.to_string(),
                });
            }
            Ok(GatewayPayment {
                id: payment_id.to_string(),
                order_id: Some("order_mock".to_string()),
                status: "captured".to_string(),
                amount_minor: 1000,
                currency: "INR".to_string(),
                error_description: None,
            })
        }

        async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<GatewayOrder> {
            Ok(GatewayOrder {
                id: "order_new".to_string(),
                amount_minor: request.amount_minor,
                currency: request.currency,
                receipt: Some(request.receipt),
                status: "created".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let payment = gateway
            .fetch_payment("pay_1")
            .await
            .expect("payment lookup should succeed");
        assert_eq!(payment.status, "captured");

        let err = gateway.fetch_payment("missing").await.unwrap_err();
        assert!(err.is_not_found());

        let order = gateway
            .create_order(CreateOrderRequest {
                amount_minor: 49900,
                currency: "INR".to_string(),
                receipt: "SUB-1-retry-1".to_string(),
                notes: serde_json::json!({}),
            })
            .await
            .expect("order creation should succeed");
        assert_eq!(order.amount_minor, 49900);
    }
}
