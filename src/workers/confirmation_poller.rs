use crate::config::{parse_env, ConfigError};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{StatusResponse, StatusVerdict};
use crate::services::payment_events::{PaymentEvent, PaymentOutcome};
use crate::services::poll_session::{PollState, SessionError, SessionHandle, SessionSlot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Fixed wait before every status check.
    pub interval: Duration,
    /// Status checks allowed before the session times out.
    pub max_attempts: u32,
    /// Upper bound on a single provider call (push or status check).
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_attempts: 12,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl PollerConfig {
    /// Unset variables keep their defaults; unparseable ones are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            interval: parse_env::<u64>("PAYMENT_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            max_attempts: parse_env::<u32>("PAYMENT_POLL_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts),
            request_timeout: parse_env::<u64>("PAYMENT_STATUS_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }

    /// Overall wall-clock budget implied by the cadence and attempt bound.
    pub fn polling_budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Result of one status check before it is applied to the session.
#[derive(Debug)]
enum Observation {
    Status(StatusResponse),
    /// Transport failure, undecodable body or per-call timeout.
    Inconclusive(String),
}

/// Drives one session from `Polling` to a terminal state.
pub struct ConfirmationPoller {
    gateway: Arc<dyn PaymentGateway>,
    config: PollerConfig,
}

impl ConfirmationPoller {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: PollerConfig) -> Self {
        Self { gateway, config }
    }

    /// Runs the status-check loop and returns the state the session ended in.
    ///
    /// The session must already be `Polling` with provider ids attached.
    /// Checks are strictly sequential: the next wait only starts once the
    /// previous call has returned or timed out.
    pub async fn run(&self, handle: SessionHandle) -> PollState {
        let mut cancel_rx = handle.cancel_signal();

        let (ids, interval, max_attempts) = {
            let slot = handle.lock();
            let session = slot.session();
            match (session.state(), session.provider_ids()) {
                (PollState::Polling, Some(ids)) => {
                    (ids.clone(), session.interval(), session.max_attempts())
                }
                (state, _) => {
                    debug!(
                        session_id = %handle.session_id(),
                        state = %state,
                        "session is not pollable"
                    );
                    return state;
                }
            }
        };

        info!(
            reference = %handle.reference(),
            session_id = %handle.session_id(),
            interval_ms = interval.as_millis() as u64,
            max_attempts = max_attempts,
            "payment confirmation polling started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.changed() => {
                    info!(
                        reference = %handle.reference(),
                        session_id = %handle.session_id(),
                        "payment confirmation polling cancelled"
                    );
                    return PollState::Cancelled;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let attempt = handle.lock().session_mut().record_attempt();
            let attempt = match attempt {
                Ok(attempt) => attempt,
                Err(SessionError::AttemptsExhausted { .. }) => {
                    // Only reachable with a zero budget; later ticks time out in `apply`.
                    let mut slot = handle.lock();
                    if slot.session().is_terminal() {
                        return slot.session().state();
                    }
                    let attempts = slot.session().attempt();
                    return self.conclude(
                        &handle,
                        &mut slot,
                        PollState::TimedOut,
                        PaymentOutcome::TimedOut { attempts },
                    );
                }
                Err(e) => {
                    debug!(session_id = %handle.session_id(), error = %e, "polling stopped");
                    return handle.state();
                }
            };

            let observation = match tokio::time::timeout(
                self.config.request_timeout,
                self.gateway.check_status(&ids),
            )
            .await
            {
                Ok(Ok(status)) => Observation::Status(status),
                Ok(Err(e)) => Observation::Inconclusive(e.to_string()),
                Err(_) => Observation::Inconclusive(format!(
                    "status check timed out after {}s",
                    self.config.request_timeout.as_secs()
                )),
            };

            if let Some(terminal) = self.apply(&handle, attempt, observation) {
                return terminal;
            }
        }
    }

    /// Applies one observation under the session lock. Returns the terminal
    /// state once the session has ended, `None` to keep polling.
    fn apply(
        &self,
        handle: &SessionHandle,
        attempt: u32,
        observation: Observation,
    ) -> Option<PollState> {
        let mut slot = handle.lock();

        // Cancelled while the call was in flight: the result is dropped.
        if slot.session().is_terminal() {
            debug!(
                session_id = %handle.session_id(),
                attempt = attempt,
                "discarding status result for terminated session"
            );
            return Some(slot.session().state());
        }

        let verdict = match observation {
            Observation::Status(status) => status.verdict(),
            Observation::Inconclusive(message) => {
                warn!(
                    reference = %handle.reference(),
                    session_id = %handle.session_id(),
                    attempt = attempt,
                    error = %message,
                    "status check inconclusive"
                );
                slot.session_mut().record_transient_error(message);
                StatusVerdict::Pending
            }
        };

        // Decisive results win over exhaustion on the same tick.
        let (next, outcome) = match verdict {
            StatusVerdict::Paid { mpesa_code } => (
                PollState::Succeeded,
                PaymentOutcome::Succeeded {
                    mpesa_code,
                    attempts: attempt,
                },
            ),
            StatusVerdict::Declined { result_code } => (
                PollState::Failed,
                PaymentOutcome::Failed {
                    result_code,
                    attempts: attempt,
                },
            ),
            StatusVerdict::Pending if slot.session().attempts_exhausted() => (
                PollState::TimedOut,
                PaymentOutcome::TimedOut { attempts: attempt },
            ),
            StatusVerdict::Pending => {
                let max_attempts = slot.session().max_attempts();
                slot.emit(PaymentEvent::Processing {
                    session_id: handle.session_id(),
                    attempt,
                    max_attempts,
                });
                return None;
            }
        };

        Some(self.conclude(handle, &mut slot, next, outcome))
    }

    /// Moves the session to its terminal state, emits the single `Completed`
    /// event and closes the stream. Caller holds the session lock.
    fn conclude(
        &self,
        handle: &SessionHandle,
        slot: &mut SessionSlot,
        next: PollState,
        outcome: PaymentOutcome,
    ) -> PollState {
        if let Err(e) = slot.session_mut().transition(next) {
            error!(session_id = %handle.session_id(), error = %e, "terminal transition rejected");
            return slot.session().state();
        }

        let attempts = outcome.attempts();
        match &outcome {
            PaymentOutcome::Succeeded { mpesa_code, .. } => info!(
                reference = %handle.reference(),
                session_id = %handle.session_id(),
                attempts = attempts,
                mpesa_code = %mpesa_code,
                "payment confirmed"
            ),
            PaymentOutcome::Failed { result_code, .. } => info!(
                reference = %handle.reference(),
                session_id = %handle.session_id(),
                attempts = attempts,
                result_code = result_code,
                "payment declined by provider"
            ),
            PaymentOutcome::TimedOut { .. } => warn!(
                reference = %handle.reference(),
                session_id = %handle.session_id(),
                attempts = attempts,
                "payment confirmation timed out"
            ),
        }

        slot.emit(PaymentEvent::Completed {
            session_id: handle.session_id(),
            outcome,
        });
        slot.close();
        next
    }
}
