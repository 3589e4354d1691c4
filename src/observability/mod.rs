//! Observability: structured logging and cheap metric recording.

pub mod logging;
pub mod metrics;
