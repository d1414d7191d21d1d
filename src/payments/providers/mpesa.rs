use crate::config::{parse_env, require_env, ConfigError};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    ProviderIds, PushRequest, PushResponse, StatusRequest, StatusResponse,
};
use crate::payments::utils::{is_local_subscriber_number, PaymentHttpClient};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub push_path: String,
    pub status_path: String,
    pub api_token: Option<String>,
    /// Product line the charge is booked against (`productTag` on the wire).
    pub product_tag: String,
    /// Confirmation charge sent with every push.
    pub push_amount: Decimal,
    pub timeout_secs: u64,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            push_path: "/api/mpesa/stk-push".to_string(),
            status_path: "/api/mpesa/stk-status".to_string(),
            api_token: None,
            product_tag: "marine".to_string(),
            push_amount: Decimal::ONE,
            timeout_secs: 15,
        }
    }
}

impl MpesaConfig {
    /// Reads the provider section. `timeout_secs` is not read here: the
    /// application config aligns it with the status-check timeout.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let base_url = require_env("MPESA_BASE_URL")?;

        let config = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            push_path: std::env::var("MPESA_PUSH_PATH").unwrap_or(defaults.push_path),
            status_path: std::env::var("MPESA_STATUS_PATH").unwrap_or(defaults.status_path),
            api_token: std::env::var("MPESA_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            product_tag: std::env::var("MPESA_PRODUCT_TAG").unwrap_or(defaults.product_tag),
            push_amount: parse_env::<Decimal>("MPESA_PUSH_AMOUNT")?
                .unwrap_or(defaults.push_amount),
            timeout_secs: defaults.timeout_secs,
        };
        config
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if self.push_amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError {
                message: "push amount must be greater than zero".to_string(),
                field: Some("MPESA_PUSH_AMOUNT".to_string()),
            });
        }
        if self.product_tag.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "product tag is required".to_string(),
                field: Some("MPESA_PRODUCT_TAG".to_string()),
            });
        }
        if self.timeout_secs == 0 {
            return Err(PaymentError::ValidationError {
                message: "request timeout must be at least one second".to_string(),
                field: Some("PAYMENT_STATUS_TIMEOUT_SECS".to_string()),
            });
        }
        Ok(())
    }
}

pub struct MpesaGateway {
    config: MpesaConfig,
    http: PaymentHttpClient,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        config.validate()?;
        let http = PaymentHttpClient::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn push_payment(
        &self,
        reference: &str,
        phone_number: &str,
        amount: Decimal,
    ) -> PaymentResult<ProviderIds> {
        if reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        if !is_local_subscriber_number(phone_number) {
            return Err(PaymentError::ValidationError {
                message: "phone_number must be a 10-digit local subscriber number".to_string(),
                field: Some("phone_number".to_string()),
            });
        }
        if amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let payload = PushRequest {
            phone_number: phone_number.to_string(),
            amount,
            reference: reference.to_string(),
            product_tag: self.config.product_tag.clone(),
        };

        let raw: PushResponse = self
            .http
            .post_json(
                &self.endpoint(&self.config.push_path),
                self.config.api_token.as_deref(),
                &payload,
            )
            .await
            .map_err(tag_provider)?;

        let ids = raw.into_provider_ids()?;
        info!(
            reference = %reference,
            checkout_request_id = %ids.request_id,
            "mpesa push accepted"
        );
        Ok(ids)
    }

    async fn check_status(&self, ids: &ProviderIds) -> PaymentResult<StatusResponse> {
        let payload = StatusRequest::from(ids);
        let status: StatusResponse = self
            .http
            .post_json(
                &self.endpoint(&self.config.status_path),
                self.config.api_token.as_deref(),
                &payload,
            )
            .await
            .map_err(tag_provider)?;
        debug!(
            checkout_request_id = %ids.request_id,
            result_code = status.result_code,
            "mpesa status received"
        );
        Ok(status)
    }

    fn name(&self) -> &'static str {
        "mpesa"
    }
}

fn tag_provider(err: PaymentError) -> PaymentError {
    match err {
        PaymentError::ProviderError {
            message,
            provider_code,
            retryable,
            ..
        } => PaymentError::ProviderError {
            provider: "mpesa".to_string(),
            message,
            provider_code,
            retryable,
        },
        other => other,
    }
}
