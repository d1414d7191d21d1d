//! Poll sessions
//!
//! A [`PollSession`] records one confirmation attempt for a business
//! reference: the provider identifiers returned by the push, how many status
//! checks were issued and where the attempt sits in its lifecycle.
//! [`SessionHandle`] is the shared, lock-protected view of a live session
//! that the orchestrator and the poller task both hold.

use crate::payments::types::ProviderIds;
use crate::services::payment_events::PaymentEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

// ============================================================================
// Session State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// Created, push not requested yet
    Idle,
    /// Push request in flight
    AwaitingPush,
    /// Push accepted, status checks running
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Idle => "idle",
            PollState::AwaitingPush => "awaiting_push",
            PollState::Polling => "polling",
            PollState::Succeeded => "succeeded",
            PollState::Failed => "failed",
            PollState::TimedOut => "timed_out",
            PollState::Cancelled => "cancelled",
        }
    }

    pub fn valid_transitions(&self) -> Vec<PollState> {
        match self {
            PollState::Idle => vec![PollState::AwaitingPush, PollState::Cancelled],
            PollState::AwaitingPush => vec![
                PollState::Polling,
                PollState::Failed,
                PollState::Cancelled,
            ],
            PollState::Polling => vec![
                PollState::Succeeded,
                PollState::Failed,
                PollState::TimedOut,
                PollState::Cancelled,
            ],
            PollState::Succeeded
            | PollState::Failed
            | PollState::TimedOut
            | PollState::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, next: PollState) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed | PollState::TimedOut | PollState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: PollState, to: PollState },

    #[error("status check requires a polling session, current state is {state}")]
    NotPolling { state: PollState },

    #[error("attempt budget of {max_attempts} exhausted")]
    AttemptsExhausted { max_attempts: u32 },
}

// ============================================================================
// Poll Session
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSession {
    session_id: Uuid,
    reference: String,
    provider_ids: Option<ProviderIds>,
    attempt: u32,
    max_attempts: u32,
    interval_ms: u64,
    state: PollState,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    terminated_at: Option<DateTime<Utc>>,
}

impl PollSession {
    pub fn new(reference: impl Into<String>, max_attempts: u32, interval: Duration) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            reference: reference.into(),
            provider_ids: None,
            attempt: 0,
            max_attempts,
            interval_ms: interval.as_millis() as u64,
            state: PollState::Idle,
            last_error: None,
            created_at: Utc::now(),
            terminated_at: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn provider_ids(&self) -> Option<&ProviderIds> {
        self.provider_ids.as_ref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn transition(&mut self, next: PollState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.terminated_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn begin_push(&mut self) -> Result<(), SessionError> {
        self.transition(PollState::AwaitingPush)
    }

    pub fn start_polling(&mut self, ids: ProviderIds) -> Result<(), SessionError> {
        self.transition(PollState::Polling)?;
        self.provider_ids = Some(ids);
        Ok(())
    }

    /// Counts a status check about to be issued and returns its 1-based number.
    pub fn record_attempt(&mut self) -> Result<u32, SessionError> {
        if self.state != PollState::Polling {
            return Err(SessionError::NotPolling { state: self.state });
        }
        if self.attempts_exhausted() {
            return Err(SessionError::AttemptsExhausted {
                max_attempts: self.max_attempts,
            });
        }
        self.attempt += 1;
        Ok(self.attempt)
    }

    pub fn record_transient_error(&mut self, error: impl Into<String>) {
        if !self.is_terminal() {
            self.last_error = Some(error.into());
        }
    }

    /// Returns false when the session had already terminated.
    pub fn cancel(&mut self) -> bool {
        self.transition(PollState::Cancelled).is_ok()
    }
}

// ============================================================================
// Shared Handle
// ============================================================================

/// Session plus the sending half of its outcome stream.
pub struct SessionSlot {
    session: PollSession,
    events: Option<mpsc::UnboundedSender<PaymentEvent>>,
}

impl SessionSlot {
    pub fn session(&self) -> &PollSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PollSession {
        &mut self.session
    }

    /// Delivers an event unless the stream was already closed.
    pub fn emit(&mut self, event: PaymentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Drops the sender so the outcome stream ends.
    pub fn close(&mut self) {
        self.events = None;
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    reference: Arc<str>,
    slot: Arc<Mutex<SessionSlot>>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn new(session: PollSession, events: mpsc::UnboundedSender<PaymentEvent>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            session_id: session.session_id(),
            reference: Arc::from(session.reference()),
            slot: Arc::new(Mutex::new(SessionSlot {
                session,
                events: Some(events),
            })),
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Short critical sections only; never held across an await.
    pub fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> PollSession {
        self.lock().session.clone()
    }

    pub fn state(&self) -> PollState {
        self.lock().session.state()
    }

    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Moves the session to `Cancelled` and closes its outcome stream without
    /// a terminal value. Returns false if the session had already terminated.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let mut slot = self.lock();
            let cancelled = slot.session.cancel();
            if cancelled {
                slot.close();
            }
            cancelled
        };
        if cancelled {
            self.cancel_tx.send_replace(true);
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polling_session(max_attempts: u32) -> PollSession {
        let mut session = PollSession::new("Q-1", max_attempts, Duration::from_millis(5000));
        session.begin_push().expect("idle -> awaiting_push");
        session
            .start_polling(ProviderIds {
                request_id: "C1".to_string(),
                correlation_id: "M1".to_string(),
            })
            .expect("awaiting_push -> polling");
        session
    }

    #[test]
    fn test_state_transitions_valid() {
        assert!(PollState::Idle.can_transition_to(PollState::AwaitingPush));
        assert!(PollState::AwaitingPush.can_transition_to(PollState::Polling));
        assert!(PollState::AwaitingPush.can_transition_to(PollState::Failed));
        assert!(PollState::Polling.can_transition_to(PollState::TimedOut));
        assert!(PollState::Polling.can_transition_to(PollState::Cancelled));
    }

    #[test]
    fn test_state_transitions_invalid() {
        assert!(!PollState::Idle.can_transition_to(PollState::Polling));
        assert!(!PollState::AwaitingPush.can_transition_to(PollState::TimedOut));
        assert!(!PollState::Succeeded.can_transition_to(PollState::Cancelled));
        assert!(!PollState::Cancelled.can_transition_to(PollState::Polling));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PollState::Succeeded.is_terminal());
        assert!(PollState::Failed.is_terminal());
        assert!(PollState::TimedOut.is_terminal());
        assert!(PollState::Cancelled.is_terminal());
        assert!(!PollState::Polling.is_terminal());
    }

    #[test]
    fn new_session_starts_idle_with_fresh_id() {
        let a = PollSession::new("Q-1", 12, Duration::from_millis(5000));
        let b = PollSession::new("Q-1", 12, Duration::from_millis(5000));
        assert_eq!(a.state(), PollState::Idle);
        assert_eq!(a.attempt(), 0);
        assert_eq!(a.interval(), Duration::from_secs(5));
        assert!(a.terminated_at().is_none());
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn attempts_are_bounded_by_max() {
        let mut session = polling_session(3);
        assert_eq!(session.record_attempt(), Ok(1));
        assert_eq!(session.record_attempt(), Ok(2));
        assert_eq!(session.record_attempt(), Ok(3));
        assert!(session.attempts_exhausted());
        assert_eq!(
            session.record_attempt(),
            Err(SessionError::AttemptsExhausted { max_attempts: 3 })
        );
        assert_eq!(session.attempt(), 3);
    }

    #[test]
    fn attempts_require_polling_state() {
        let mut session = PollSession::new("Q-1", 12, Duration::from_millis(5000));
        assert_eq!(
            session.record_attempt(),
            Err(SessionError::NotPolling {
                state: PollState::Idle
            })
        );
    }

    #[test]
    fn terminal_session_is_immutable() {
        let mut session = polling_session(12);
        session.record_attempt().expect("first attempt");
        session.transition(PollState::Succeeded).expect("decisive");
        let terminated_at = session.terminated_at();
        assert!(terminated_at.is_some());

        assert!(!session.cancel());
        assert!(session.record_attempt().is_err());
        session.record_transient_error("late");
        assert!(session.last_error().is_none());
        assert_eq!(session.state(), PollState::Succeeded);
        assert_eq!(session.terminated_at(), terminated_at);
    }

    #[test]
    fn handle_cancel_closes_stream_and_signals() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = PollSession::new("Q-9", 12, Duration::from_millis(5000));
        session.begin_push().expect("awaiting_push");
        let handle = SessionHandle::new(session, tx);
        let signal = handle.cancel_signal();

        assert!(handle.cancel());
        assert!(*signal.borrow());
        assert_eq!(handle.state(), PollState::Cancelled);
        assert!(rx.try_recv().is_err());
        assert!(!handle.cancel());
    }
}
