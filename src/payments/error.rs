use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid provider response: {message}")]
    InvalidResponse { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    /// Whether repeating the same request may succeed.
    ///
    /// The confirmation poller does not consult this: every status-check
    /// failure is treated as inconclusive. It is exposed for callers deciding
    /// whether to offer a retry after a failed push.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::InvalidResponse { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::Timeout { timeout_secs } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service: "mpesa".to_string(),
                    timeout_secs,
                })
            }
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "mpesa".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}
