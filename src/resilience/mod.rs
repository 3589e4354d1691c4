//! Bounded-retry primitives.
//!
//! The only retry loop in this crate is the router's registration lookup;
//! its delays come from here. Every retry is bounded by a fixed attempt
//! count, never open-ended.

pub mod backoff;

pub use backoff::calculate_backoff;
