//! HTTP bridging subsystem.
//!
//! # Data Flow
//! ```text
//! intercepted request
//!     → server.rs (front server, upgrade detection)
//!     → routing (app traffic vs static)
//!     → codec.rs (request → scope)
//!     → client.rs (scope + chunks across the endpoint)
//!         … worker context …
//!     → serve.rs (chunks → app contract → chunks)
//!     → client.rs (events → response, body filter)
//!     → postprocess.rs (head injection, isolation headers)
//! ```

pub mod client;
pub mod codec;
pub mod postprocess;
pub mod serve;
pub mod server;

pub use client::fetch_app;
pub use codec::{HttpScope, ScopeKind};
pub use serve::serve_exchange;
pub use server::ProxyServer;
