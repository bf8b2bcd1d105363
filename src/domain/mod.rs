//! Domain types shared by the runner and the protocol engine

pub mod constraints;
pub mod error;
pub mod verdict;

pub use constraints::{Constraints, TestRequest};
pub use error::{SessionError, UNKNOWN_TEST_EXIT_CODE};
pub use verdict::Violation;
