use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::logging::mask_phone_number;
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::utils::normalize_subscriber_number;
use crate::services::payment_events::PaymentEvent;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::poll_session::PollSession;

#[derive(Clone)]
pub struct PaymentsState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    /// Confirmation charge sent with every push.
    pub push_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

pub fn router(state: PaymentsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/payments/{reference}",
            post(initiate_payment)
                .get(get_payment_session)
                .delete(cancel_payment),
        )
        .with_state(state)
}

/// POST /api/payments/{reference}
///
/// Streams `processing` events followed by one `completed` event. The stream
/// ends without `completed` when the payment is cancelled or replaced.
/// Disconnecting cancels the session.
pub async fn initiate_payment(
    State(state): State<PaymentsState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let phone_number = normalize_subscriber_number(&request.phone_number)
        .map_err(|e| with_request_id(e.into(), &headers))?;
    info!(
        reference = %reference,
        phone = %mask_phone_number(&phone_number),
        "payment initiation requested"
    );

    let outcomes = state
        .orchestrator
        .initiate(&reference, &phone_number, state.push_amount)
        .await
        .map_err(|e| with_request_id(e.into(), &headers))?;

    let guard = AbandonGuard {
        orchestrator: state.orchestrator.clone(),
        reference: outcomes.reference().to_string(),
        session_id: outcomes.session_id(),
    };
    let events = outcomes.map(move |event| guard.forward(event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/payments/{reference}
pub async fn get_payment_session(
    State(state): State<PaymentsState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<PollSession>> {
    state
        .orchestrator
        .session(&reference)
        .await
        .map(Json)
        .ok_or_else(|| with_request_id(session_not_found(reference), &headers))
}

/// DELETE /api/payments/{reference}
pub async fn cancel_payment(
    State(state): State<PaymentsState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    if state.orchestrator.cancel(&reference).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(with_request_id(session_not_found(reference), &headers))
    }
}

/// GET /health
pub async fn health(State(state): State<PaymentsState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.orchestrator.active_sessions().await,
    })
}

/// Lives inside the SSE stream. Dropping the stream (client gone) cancels the
/// session it was opened for, unless it already ended or was replaced.
struct AbandonGuard {
    orchestrator: Arc<PaymentOrchestrator>,
    reference: String,
    session_id: Uuid,
}

impl AbandonGuard {
    fn forward(&self, event: PaymentEvent) -> Result<Event, Infallible> {
        to_sse_event(event)
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let orchestrator = self.orchestrator.clone();
        let reference = std::mem::take(&mut self.reference);
        let session_id = self.session_id;
        runtime.spawn(async move {
            if orchestrator.cancel_session(&reference, session_id).await {
                debug!(reference = %reference, session_id = %session_id, "client disconnected");
            }
        });
    }
}

fn to_sse_event(event: PaymentEvent) -> Result<Event, Infallible> {
    let name = event.name();
    Ok(Event::default()
        .event(name)
        .json_data(&event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())))
}

fn session_not_found(reference: String) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::SessionNotFound { reference }))
}

fn with_request_id(error: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}
