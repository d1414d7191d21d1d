pub mod payment_events;
pub mod payment_orchestrator;
pub mod poll_session;
