//! Unified error handling for the visapass backend
//!
//! One `AppError` type carries every failure across the API boundary, with
//! HTTP status mapping, machine-readable error codes, and user-safe messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced to clients for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "RESOURCE_EXHAUSTED")]
    ResourceExhausted,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "WEBHOOK_VERIFICATION_FAILED")]
    WebhookVerificationFailed,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Application with the given identifier does not exist
    ApplicationNotFound { application_id: String },
    /// Payment with the given identifier does not exist
    PaymentNotFound { payment_id: String },
    /// Additional-applicant index is out of range
    ApplicantNotFound { index: usize },
    /// Operation is not valid for the entity's current state
    InvalidState {
        entity: &'static str,
        current: String,
        operation: &'static str,
    },
    /// Another open payment already exists for the application
    OpenPaymentExists { application_id: String },
    /// Email does not match the application owner
    EmailMismatch { application_id: String },
    /// Identifier allocation exhausted its retry budget
    IdAllocationExhausted { attempts: u32 },
}

/// Infrastructure-level errors (storage, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Storage read/write failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment gateway call failed or returned an unexpected shape
    Gateway { message: String, is_retryable: bool },
    /// Webhook signature could not be verified
    WebhookVerification { message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing
    MissingField { field: String },
    /// Field value is malformed or out of range
    InvalidField { field: String, reason: String },
    /// Passport country is not in the supported set
    UnsupportedCountry { country: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn application_not_found(application_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::ApplicationNotFound {
            application_id: application_id.into(),
        }))
    }

    pub fn payment_not_found(payment_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            payment_id: payment_id.into(),
        }))
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::InvalidState {
            entity,
            current: current.into(),
            operation,
        }))
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn gateway(message: impl Into<String>, is_retryable: bool) -> Self {
        Self::new(AppErrorKind::External(ExternalError::Gateway {
            message: message.into(),
            is_retryable,
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ApplicationNotFound { .. }
                | DomainError::PaymentNotFound { .. }
                | DomainError::ApplicantNotFound { .. } => 404,
                DomainError::InvalidState { .. } | DomainError::OpenPaymentExists { .. } => 400,
                DomainError::EmailMismatch { .. } => 403,
                DomainError::IdAllocationExhausted { .. } => 500,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 500,
                ExternalError::WebhookVerification { .. } => 400,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ApplicationNotFound { .. }
                | DomainError::PaymentNotFound { .. }
                | DomainError::ApplicantNotFound { .. } => ErrorCode::NotFound,
                DomainError::InvalidState { .. } => ErrorCode::InvalidState,
                DomainError::OpenPaymentExists { .. } => ErrorCode::Conflict,
                DomainError::EmailMismatch { .. } => ErrorCode::Unauthorized,
                DomainError::IdAllocationExhausted { .. } => ErrorCode::ResourceExhausted,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::WebhookVerification { .. } => ErrorCode::WebhookVerificationFailed,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-facing error message
    ///
    /// Domain and validation errors carry safe detail; infrastructure and
    /// gateway errors collapse to a generic message (full detail is logged).
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ApplicationNotFound { application_id } => {
                    format!("Application '{}' not found", application_id)
                }
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::ApplicantNotFound { index } => {
                    format!("No additional applicant at index {}", index)
                }
                DomainError::InvalidState {
                    entity,
                    current,
                    operation,
                } => {
                    format!(
                        "Cannot {} while {} is in state '{}'",
                        operation, entity, current
                    )
                }
                DomainError::OpenPaymentExists { application_id } => {
                    format!(
                        "Application '{}' already has a payment in progress",
                        application_id
                    )
                }
                DomainError::EmailMismatch { .. } => {
                    "Email does not match this application".to_string()
                }
                DomainError::IdAllocationExhausted { .. } => {
                    "Could not allocate an application identifier. Please try again".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment gateway is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::WebhookVerification { .. } => {
                    "Webhook signature verification failed".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::UnsupportedCountry { country } => {
                    format!("Applications from '{}' are not supported", country)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) | AppErrorKind::Validation(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::WebhookVerification { .. } => false,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let error = AppError::application_not_found("app_123");
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::NotFound);
        assert!(error.user_message().contains("app_123"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn invalid_state_maps_to_400() {
        let error = AppError::invalid_state("application", "started", "submit");
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidState);
        assert!(error.user_message().contains("submit"));
    }

    #[test]
    fn email_mismatch_maps_to_403() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::EmailMismatch {
            application_id: "app_123".to_string(),
        }));
        assert_eq!(error.status_code(), 403);
        assert_eq!(error.error_code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn gateway_errors_hide_detail() {
        let error = AppError::gateway("upstream returned 500: secret internals", false);
        assert_eq!(error.status_code(), 500);
        assert!(!error.user_message().contains("secret"));
    }

    #[test]
    fn webhook_verification_maps_to_400() {
        let error = AppError::new(AppErrorKind::External(ExternalError::WebhookVerification {
            message: "bad transmission signature".to_string(),
        }));
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::WebhookVerificationFailed);
        assert!(!error.is_retryable());
    }

    #[test]
    fn retryable_gateway_error_says_try_again() {
        let error = AppError::gateway("connect timeout", true);
        assert!(error.is_retryable());
        assert!(error.user_message().contains("try again"));
    }
}
