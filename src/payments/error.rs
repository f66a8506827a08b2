use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Not found at gateway: {resource} {id}")]
    NotFound { resource: String, id: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Gateway timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NotFound { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PaymentError::NotFound { .. })
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match &err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::Timeout { timeout_secs } => AppErrorKind::External(ExternalError::Timeout {
                service: "payment gateway".to_string(),
                timeout_secs: *timeout_secs,
            }),
            _ => AppErrorKind::External(ExternalError::PaymentGateway {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(PaymentError::Timeout { timeout_secs: 10 }.is_retryable());
        assert!(!PaymentError::NotFound {
            resource: "payment".to_string(),
            id: "pay_1".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn not_found_is_distinguished_from_transport_errors() {
        let missing = PaymentError::NotFound {
            resource: "payment".to_string(),
            id: "pay_1".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!PaymentError::ProviderError {
            provider: "razorpay".to_string(),
            message: "HTTP 500".to_string(),
            provider_code: Some("500".to_string()),
            retryable: true,
        }
        .is_not_found());
    }
}
