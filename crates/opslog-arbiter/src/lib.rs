//! opslog-arbiter — request arbitration for data-fetching callers.
//!
//! Wraps an async operation with one of two per-call strategies plus a
//! global concurrency ceiling:
//!
//! - **single-flight**: concurrent callers of the same key share one
//!   execution while it is younger than the freshness window;
//! - **debounce**: a burst of calls for a key runs only its trailing call.
//!
//! [`ResultCache`] keeps successful results for a TTL and [`FetchGate`]
//! places it in front of an [`Arbiter`].

pub mod arbiter;
pub mod cache;
mod debounce;
pub mod error;
pub mod gate;

pub use arbiter::{Arbiter, ArbiterConfig, CallMode, Outcome};
pub use cache::{cache_key, ResultCache};
pub use error::ArbiterError;
pub use gate::FetchGate;
