//! Protocol engine
//!
//! Connection lifecycle and the per-test request/response loop with the
//! coordinator.

pub mod frame;
pub mod session;

pub use frame::DEFAULT_TRUNCATE_TO;
pub use session::{SessionSummary, SolutionTester};
