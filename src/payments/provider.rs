use crate::payments::error::PaymentResult;
use crate::payments::types::{ProviderIds, StatusResponse};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Request/response access to the mobile-money provider.
///
/// Implementations hold no per-payment state; the confirmation poller owns
/// all sequencing.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the provider to prompt the subscriber's handset for authorization.
    async fn push_payment(
        &self,
        reference: &str,
        phone_number: &str,
        amount: Decimal,
    ) -> PaymentResult<ProviderIds>;

    async fn check_status(&self, ids: &ProviderIds) -> PaymentResult<StatusResponse>;

    fn name(&self) -> &'static str;
}
