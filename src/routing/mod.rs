//! Application registry and request routing.
//!
//! # Data Flow
//! ```text
//! intercepted request
//!     → matcher.rs (app traffic vs static asset)
//!     → [app] registry.rs lookup (bounded retry)
//!         → streaming bridge → post-processing
//!     → [static] cache policy → upstream fetch
//! ```
//!
//! # Design Decisions
//! - The registry is process-wide state owned by the router, mutated only
//!   via register/deregister, read via route — never by application code
//! - Lookup retries are bounded; exhaustion is a user-visible 404, not a hang

pub mod matcher;
pub mod registry;
pub mod router;

pub use matcher::{match_app_path, AppPath};
pub use registry::AppRegistry;
pub use router::{Router, RouterSettings};
