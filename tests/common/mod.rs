#![allow(dead_code)]

use async_trait::async_trait;
use quotepay_backend::payments::error::{PaymentError, PaymentResult};
use quotepay_backend::payments::provider::PaymentGateway;
use quotepay_backend::payments::types::{ProviderIds, StatusResponse};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply to a status check.
pub enum Step {
    Reply(PaymentResult<StatusResponse>),
    /// Reply after the given delay.
    Delayed(Duration, PaymentResult<StatusResponse>),
    /// Never reply.
    Hang,
}

pub fn paid(code: &str) -> Step {
    Step::Reply(Ok(StatusResponse {
        result_code: 0,
        mpesa_code: Some(code.to_string()),
    }))
}

pub fn declined(result_code: i64) -> Step {
    Step::Reply(Ok(StatusResponse {
        result_code,
        mpesa_code: None,
    }))
}

pub fn network_error() -> Step {
    Step::Reply(Err(PaymentError::NetworkError {
        message: "connection reset by peer".to_string(),
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushCall {
    pub reference: String,
    pub phone_number: String,
    pub amount: Decimal,
}

/// Gateway whose status replies are scripted per checkout request id.
/// Unscripted checks fail with a network error.
#[derive(Default)]
pub struct FakeGateway {
    ids: Mutex<HashMap<String, ProviderIds>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    push_error: Mutex<Option<PaymentError>>,
    push_delay: Mutex<Option<Duration>>,
    pushes: Mutex<Vec<PushCall>>,
    status_calls: AtomicU32,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(self, reference: &str, request_id: &str, correlation_id: &str) -> Self {
        self.ids.lock().unwrap().insert(
            reference.to_string(),
            ProviderIds {
                request_id: request_id.to_string(),
                correlation_id: correlation_id.to_string(),
            },
        );
        self
    }

    /// Scripts replies for the session created for `reference`.
    pub fn script(self, reference: &str, steps: Vec<Step>) -> Self {
        let request_id = self.ids_for(reference).request_id;
        self.scripts
            .lock()
            .unwrap()
            .entry(request_id)
            .or_default()
            .extend(steps);
        self
    }

    pub fn failing_push(self, error: PaymentError) -> Self {
        *self.push_error.lock().unwrap() = Some(error);
        self
    }

    pub fn push_delay(self, delay: Duration) -> Self {
        *self.push_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<PushCall> {
        self.pushes.lock().unwrap().clone()
    }

    fn ids_for(&self, reference: &str) -> ProviderIds {
        self.ids
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| ProviderIds {
                request_id: format!("C-{}", reference),
                correlation_id: format!("M-{}", reference),
            })
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn push_payment(
        &self,
        reference: &str,
        phone_number: &str,
        amount: Decimal,
    ) -> PaymentResult<ProviderIds> {
        self.pushes.lock().unwrap().push(PushCall {
            reference: reference.to_string(),
            phone_number: phone_number.to_string(),
            amount,
        });
        let delay = *self.push_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let error = self.push_error.lock().unwrap().clone();
        match error {
            Some(error) => Err(error),
            None => Ok(self.ids_for(reference)),
        }
    }

    async fn check_status(&self, ids: &ProviderIds) -> PaymentResult<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&ids.request_id)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(Step::Hang) => std::future::pending().await,
            None => Err(PaymentError::NetworkError {
                message: "connection reset by peer".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
