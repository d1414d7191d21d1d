//! Notifications delivered to whoever initiated a payment.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Terminal result of a confirmation attempt. Cancellation has no outcome:
/// the stream simply ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded { mpesa_code: String, attempts: u32 },
    /// The provider concluded the transaction negatively.
    Failed { result_code: i64, attempts: u32 },
    /// No decisive answer within the attempt budget.
    TimedOut { attempts: u32 },
}

impl PaymentOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PaymentOutcome::Succeeded { attempts, .. }
            | PaymentOutcome::Failed { attempts, .. }
            | PaymentOutcome::TimedOut { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    Processing {
        session_id: Uuid,
        attempt: u32,
        max_attempts: u32,
    },
    Completed {
        session_id: Uuid,
        outcome: PaymentOutcome,
    },
}

impl PaymentEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            PaymentEvent::Processing { session_id, .. }
            | PaymentEvent::Completed { session_id, .. } => *session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::Processing { .. } => "processing",
            PaymentEvent::Completed { .. } => "completed",
        }
    }
}

/// Receiving side of one initiation: zero or more `Processing` events, then
/// either one `Completed` event or, on cancellation, the end of the stream.
pub struct OutcomeStream {
    session_id: Uuid,
    reference: String,
    rx: mpsc::UnboundedReceiver<PaymentEvent>,
}

impl OutcomeStream {
    pub fn new(
        session_id: Uuid,
        reference: impl Into<String>,
        rx: mpsc::UnboundedReceiver<PaymentEvent>,
    ) -> Self {
        Self {
            session_id,
            reference: reference.into(),
            rx,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub async fn next_event(&mut self) -> Option<PaymentEvent> {
        self.rx.recv().await
    }

    /// Drains the stream. `None` means the session was cancelled.
    pub async fn outcome(mut self) -> Option<PaymentOutcome> {
        while let Some(event) = self.rx.recv().await {
            if let PaymentEvent::Completed { outcome, .. } = event {
                return Some(outcome);
            }
        }
        None
    }
}

impl Stream for OutcomeStream {
    type Item = PaymentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
