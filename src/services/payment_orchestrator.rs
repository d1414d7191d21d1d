//! Payment Orchestrator Service
//!
//! Entry point for push-payment confirmation. Issues the push through the
//! gateway, keeps at most one live session per business reference and hands
//! accepted pushes to a [`ConfirmationPoller`] task.

use crate::logging::mask_phone_number;
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::services::payment_events::{OutcomeStream, PaymentEvent};
use crate::services::poll_session::{PollSession, PollState, SessionError, SessionHandle};
use crate::workers::confirmation_poller::{ConfirmationPoller, PollerConfig};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("payment reference is required")]
    MissingReference,

    #[error("push payment failed: {0}")]
    Push(#[from] PaymentError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<OrchestratorError> for crate::error::AppError {
    fn from(err: OrchestratorError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError, ValidationError};

        match err {
            OrchestratorError::MissingReference => {
                AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                    field: "reference".to_string(),
                }))
            }
            OrchestratorError::Push(e) => e.into(),
            OrchestratorError::Session(e) => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
                    message: e.to_string(),
                }))
            }
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

type SessionTable = Arc<Mutex<HashMap<String, SessionHandle>>>;

pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    poller: Arc<ConfirmationPoller>,
    config: PollerConfig,
    /// reference -> live session. Every insert, replace and removal happens
    /// under this lock.
    sessions: SessionTable,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: PollerConfig) -> Self {
        let poller = Arc::new(ConfirmationPoller::new(gateway.clone(), config.clone()));
        Self {
            gateway,
            poller,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Requests a push payment for `reference` and starts confirmation
    /// polling once the provider accepts it.
    ///
    /// A live session for the same reference is cancelled before the push is
    /// sent. Push failures are returned directly and leave no session behind.
    /// `phone_number` must already be in the provider's local format.
    pub async fn initiate(
        &self,
        reference: &str,
        phone_number: &str,
        amount: Decimal,
    ) -> OrchestratorResult<OutcomeStream> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OrchestratorError::MissingReference);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session =
            PollSession::new(reference, self.config.max_attempts, self.config.interval);
        session.begin_push()?;
        let handle = SessionHandle::new(session, events_tx);
        let stream = OutcomeStream::new(handle.session_id(), reference, events_rx);

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(previous) = sessions.insert(reference.to_string(), handle.clone()) {
                if previous.cancel() {
                    info!(
                        reference = %reference,
                        replaced_session_id = %previous.session_id(),
                        session_id = %handle.session_id(),
                        "replacing live payment session"
                    );
                }
            }
        }

        info!(
            reference = %reference,
            session_id = %handle.session_id(),
            phone = %mask_phone_number(phone_number),
            amount = %amount,
            provider = self.gateway.name(),
            "requesting push payment"
        );

        let pushed = match tokio::time::timeout(
            self.config.request_timeout,
            self.gateway.push_payment(reference, phone_number, amount),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout {
                timeout_secs: self.config.request_timeout.as_secs(),
            }),
        };

        let mut sessions = self.sessions.lock().await;

        let ids = match pushed {
            Ok(ids) => ids,
            Err(e) => {
                {
                    let mut slot = handle.lock();
                    if slot.session_mut().transition(PollState::Failed).is_ok() {
                        slot.close();
                    }
                }
                remove_if_current(&mut sessions, reference, handle.session_id());
                warn!(
                    reference = %reference,
                    session_id = %handle.session_id(),
                    error = %e,
                    "push payment failed"
                );
                return Err(e.into());
            }
        };

        let started = {
            let mut slot = handle.lock();
            match slot.session_mut().start_polling(ids) {
                Ok(()) => {
                    slot.emit(PaymentEvent::Processing {
                        session_id: handle.session_id(),
                        attempt: 0,
                        max_attempts: self.config.max_attempts,
                    });
                    true
                }
                Err(_) => false,
            }
        };

        if !started {
            // Replaced or cancelled while the push was in flight; the stream
            // is already closed.
            debug!(
                reference = %reference,
                session_id = %handle.session_id(),
                "push accepted for a session that is no longer live"
            );
            return Ok(stream);
        }

        let poller = self.poller.clone();
        let table = self.sessions.clone();
        let task_handle = handle.clone();
        let task_reference = reference.to_string();
        tokio::spawn(async move {
            let final_state = poller.run(task_handle.clone()).await;
            let mut sessions = table.lock().await;
            remove_if_current(&mut sessions, &task_reference, task_handle.session_id());
            debug!(
                reference = %task_reference,
                session_id = %task_handle.session_id(),
                state = %final_state,
                "payment session finished"
            );
        });
        drop(sessions);

        Ok(stream)
    }

    /// Cancels the live session for `reference`. Its outcome stream ends
    /// without a terminal value. Returns false if nothing was live.
    pub async fn cancel(&self, reference: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(handle) = sessions.remove(reference.trim()) else {
            return false;
        };
        let cancelled = handle.cancel();
        if cancelled {
            info!(
                reference = %reference,
                session_id = %handle.session_id(),
                "payment session cancelled"
            );
        }
        cancelled
    }

    /// Cancels `session_id` only if it is still the live session for
    /// `reference`; a replacement started since is left alone.
    pub async fn cancel_session(&self, reference: &str, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let reference = reference.trim();
        let Some(handle) = sessions.get(reference) else {
            return false;
        };
        if handle.session_id() != session_id {
            return false;
        }
        let cancelled = handle.cancel();
        sessions.remove(reference);
        if cancelled {
            info!(
                reference = %reference,
                session_id = %session_id,
                "abandoned payment session cancelled"
            );
        }
        cancelled
    }

    /// Copy of the live session for `reference`, if any.
    pub async fn session(&self, reference: &str) -> Option<PollSession> {
        self.sessions
            .lock()
            .await
            .get(reference.trim())
            .map(SessionHandle::snapshot)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Cancels every live session.
    pub async fn shutdown(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let count = sessions
            .drain()
            .filter(|(_, handle)| handle.cancel())
            .count();
        if count > 0 {
            info!(cancelled = count, "cancelled live payment sessions on shutdown");
        }
        count
    }
}

fn remove_if_current(
    sessions: &mut HashMap<String, SessionHandle>,
    reference: &str,
    session_id: Uuid,
) {
    if sessions
        .get(reference)
        .is_some_and(|h| h.session_id() == session_id)
    {
        sessions.remove(reference);
    }
}
