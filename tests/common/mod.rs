//! Shared test utilities for opslog integration harnesses.
//!
//! Import everything you need via `mod common; use common::*;` at the top of
//! each harness file. Clocks are fixed so file names and alert timestamps
//! are deterministic.

pub mod assertions;
pub mod builders;
pub mod fake_webhook;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fake_webhook::*;
pub use fixtures::*;
