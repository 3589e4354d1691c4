//! Sandproxy: an intercepting proxy for sandboxed application workers.
//!
//! Application instances run as worker tasks behind the contract in
//! [`app`], reachable only through asynchronous, ordered, exclusively-owned
//! message channels. This crate makes them look like ordinary HTTP and
//! WebSocket servers under a synthetic `/app_<id>/...` prefix:
//!
//! ```text
//! intercepted request
//!     → routing (registry lookup, prefix strip, cache decision)
//!     → http::client (scope + body chunks over a fresh endpoint)
//!     → http::serve (worker side: chunks → application contract)
//!     → http::postprocess (head injection, isolation headers)
//!     → response
//! ```
//!
//! WebSocket upgrades take the same registry path but keep one endpoint for
//! the connection's lifetime, wrapped in a [`websocket::VirtualSocket`]
//! state machine on each end.

pub mod app;
pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod websocket;

pub use app::{spawn_instance, AppContract, AppHandle, AppResponse, BodyStream, ControlMessage};
pub use channel::{endpoint_pair, ChannelMessage, Endpoint, SocketData};
pub use config::ProxyConfig;
pub use error::ProxyError;
pub use http::{fetch_app, HttpScope, ProxyServer};
pub use routing::{AppRegistry, Router, RouterSettings};
pub use websocket::{SocketEvent, SocketState, VirtualSocket};
