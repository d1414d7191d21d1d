use crate::payments::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifiers handed back by the provider once a push prompt was accepted.
/// Both are required to query the payment status afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderIds {
    /// `checkOutRequestId` on the wire.
    pub request_id: String,
    /// `merchantRequestId` on the wire.
    pub correlation_id: String,
}

/// Body of the push request sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub phone_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference: String,
    pub product_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub check_out_request_id: String,
    pub merchant_request_id: String,
}

impl PushResponse {
    pub fn into_provider_ids(self) -> Result<ProviderIds, PaymentError> {
        if self.check_out_request_id.trim().is_empty()
            || self.merchant_request_id.trim().is_empty()
        {
            return Err(PaymentError::InvalidResponse {
                message: "push response is missing checkOutRequestId or merchantRequestId"
                    .to_string(),
            });
        }
        Ok(ProviderIds {
            request_id: self.check_out_request_id,
            correlation_id: self.merchant_request_id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub merchant_request_id: String,
    pub check_out_request_id: String,
}

impl From<&ProviderIds> for StatusRequest {
    fn from(ids: &ProviderIds) -> Self {
        Self {
            merchant_request_id: ids.correlation_id.clone(),
            check_out_request_id: ids.request_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub result_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpesa_code: Option<String>,
}

/// How a single status response bears on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusVerdict {
    Paid { mpesa_code: String },
    Declined { result_code: i64 },
    /// The provider has not concluded yet; keep polling.
    Pending,
}

impl StatusResponse {
    pub fn verdict(&self) -> StatusVerdict {
        let code = self
            .mpesa_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        match (self.result_code, code) {
            (0, Some(code)) => StatusVerdict::Paid {
                mpesa_code: code.to_string(),
            },
            (0, None) => StatusVerdict::Pending,
            (result_code, _) => StatusVerdict::Declined { result_code },
        }
    }
}
