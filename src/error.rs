//! Error taxonomy for the proxy core.
//!
//! Every failure mode that can cross a module boundary is represented here.
//! Serving loops never panic on these: protocol violations fail the single
//! offending exchange, registration races surface as a user-visible response,
//! and application errors become well-formed 500 responses.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the channel transport, bridges, router and sockets.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The peer dropped its endpoint; the exchange cannot make progress.
    #[error("channel endpoint closed by peer")]
    ChannelClosed,

    /// A malformed or out-of-order control message arrived on an endpoint.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// No application instance is registered under the requested prefix and
    /// the bounded lookup retry was exhausted.
    #[error("no application registered for prefix '{0}'")]
    StaleRegistration(String),

    /// A serving-side channel await exceeded the idle timeout; the endpoint
    /// is reclaimed rather than leaked.
    #[error("exchange idle for {:?}, reclaiming endpoint", .0)]
    IdleTimeout(Duration),

    /// The hosted application contract failed while producing its response.
    #[error("application error: {0}")]
    App(String),

    /// A socket operation was attempted in a state that forbids it.
    #[error("invalid socket state: {0}")]
    InvalidSocketState(&'static str),

    /// The upstream network fetch for a static asset failed.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    /// Convenience constructor for protocol violations.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Convenience constructor for hosted-application failures.
    pub fn app(msg: impl Into<String>) -> Self {
        Self::App(msg.into())
    }
}
