use thiserror::Error;

/// Process exit status used when the coordinator asks for a test we do not have
pub const UNKNOWN_TEST_EXIT_CODE: i32 = 3;

/// Protocol contract violations by the coordinator. All of them end the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("constraint values must be integers, offending keys: {}", keys.join(", "))]
    InvalidConstraintType { keys: Vec<String> },

    #[error("test descriptor does not contain constraints")]
    MissingConstraintsBlock,

    #[error("test descriptor does not contain a test name")]
    MissingTestName,

    #[error("no test with name \"{0}\"")]
    UnknownTestName(String),

    #[error("message body contains the frame delimiter")]
    EmbeddedDelimiter,
}

impl SessionError {
    /// Whether this error should terminate the worker with `UNKNOWN_TEST_EXIT_CODE`
    pub fn is_unknown_test(&self) -> bool {
        matches!(self, SessionError::UnknownTestName(_))
    }
}
