use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Gateway credentials are not configured")]
    CredentialsMissing,

    #[error("Authentication with the gateway failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// The gateway reports the order was captured by a concurrent request.
    /// Callers fold this into their already-completed handling.
    #[error("Order {order_id} was already captured")]
    OrderAlreadyCaptured { order_id: String },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Gateway error: {message}")]
    ApiError {
        message: String,
        issue: Option<String>,
        retryable: bool,
    },

    #[error("Unexpected gateway response: {message}")]
    UnexpectedResponse { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::CredentialsMissing => false,
            GatewayError::AuthenticationFailed { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::OrderAlreadyCaptured { .. } => false,
            GatewayError::WebhookVerificationError { .. } => false,
            GatewayError::ApiError { retryable, .. } => *retryable,
            GatewayError::UnexpectedResponse { .. } => false,
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        match err {
            GatewayError::WebhookVerificationError { message } => {
                AppError::new(AppErrorKind::External(ExternalError::WebhookVerification {
                    message,
                }))
            }
            other => {
                let retryable = other.is_retryable();
                AppError::gateway(other.to_string(), retryable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(GatewayError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::OrderAlreadyCaptured {
            order_id: "ORDER-1".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::CredentialsMissing.is_retryable());
    }

    #[test]
    fn webhook_errors_convert_to_verification_failures() {
        let app_error: crate::error::AppError = GatewayError::WebhookVerificationError {
            message: "bad signature".to_string(),
        }
        .into();
        assert_eq!(app_error.status_code(), 400);
    }

    #[test]
    fn api_errors_convert_to_gateway_errors() {
        let app_error: crate::error::AppError = GatewayError::ApiError {
            message: "HTTP 500".to_string(),
            issue: None,
            retryable: true,
        }
        .into();
        assert_eq!(app_error.status_code(), 500);
        assert!(app_error.is_retryable());
    }
}
