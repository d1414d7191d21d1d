use crate::payments::error::{PaymentError, PaymentResult};
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self { client, timeout })
    }

    /// POST a JSON body and decode a JSON response. A single attempt: retry
    /// policy belongs to the caller.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        body: &B,
    ) -> PaymentResult<T> {
        let mut request = self.client.post(url).timeout(self.timeout).json(body);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                PaymentError::NetworkError {
                    message: format!("provider request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PaymentError::NetworkError {
            message: format!("failed to read provider response: {}", e),
        })?;

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| PaymentError::InvalidResponse {
                message: format!("invalid provider JSON response: {}", e),
            });
        }

        if status.is_server_error() {
            warn!(status = %status, url = %url, "provider server error");
        }

        Err(PaymentError::ProviderError {
            provider: "http".to_string(),
            message: format!("HTTP {}: {}", status, text),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error() || status.as_u16() == 429,
        })
    }
}

fn local_subscriber_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0[17][0-9]{8}$").expect("static regex is valid"))
}

/// True for a 10-digit, trunk-prefixed local subscriber number (`07…`/`01…`).
pub fn is_local_subscriber_number(phone: &str) -> bool {
    local_subscriber_pattern().is_match(phone)
}

/// Rewrites international and bare forms of a subscriber number into the
/// 10-digit local form the provider expects.
pub fn normalize_subscriber_number(raw: &str) -> PaymentResult<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    let local = if let Some(rest) = digits.strip_prefix("254") {
        format!("0{}", rest)
    } else if digits.len() == 9 && !digits.starts_with('0') {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };

    if !is_local_subscriber_number(&local) {
        return Err(PaymentError::ValidationError {
            message: format!("'{}' is not a valid subscriber number", raw.trim()),
            field: Some("phone_number".to_string()),
        });
    }
    Ok(local)
}
