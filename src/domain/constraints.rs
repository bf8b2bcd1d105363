//! Constraint validation
//!
//! Checks the limits a coordinator attaches to each test and turns them into
//! concrete ceilings, substituting defaults for missing keys.

use serde_json::{Map, Value};
use tracing::warn;

use super::error::SessionError;

pub const RAM_LIMIT_KEY: &str = "peak_ram_used_mb";
pub const SWAP_LIMIT_KEY: &str = "peak_swap_used_mb";
pub const CPU_LIMIT_KEY: &str = "cpu_execution_time_s";
pub const WALL_LIMIT_KEY: &str = "execution_time_s";

/// Keys checked by `validate_constraints`, in reporting order
pub const CONSTRAINT_KEYS: [&str; 4] = [RAM_LIMIT_KEY, SWAP_LIMIT_KEY, CPU_LIMIT_KEY, WALL_LIMIT_KEY];

const DEFAULT_RAM_LIMIT_MB: i64 = 256;
const DEFAULT_SWAP_LIMIT_MB: i64 = 0;
const DEFAULT_CPU_LIMIT_SECS: i64 = 100;
const DEFAULT_WALL_LIMIT_SECS: i64 = 100;

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Resource ceilings for a single test.
///
/// Values are signed: a negative ceiling is accepted and is already exceeded
/// by any running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub ram_limit_bytes: i64,
    pub swap_limit_bytes: i64,
    pub cpu_limit_secs: i64,
    pub wall_limit_secs: i64,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            ram_limit_bytes: DEFAULT_RAM_LIMIT_MB * BYTES_PER_MB,
            swap_limit_bytes: DEFAULT_SWAP_LIMIT_MB * BYTES_PER_MB,
            cpu_limit_secs: DEFAULT_CPU_LIMIT_SECS,
            wall_limit_secs: DEFAULT_WALL_LIMIT_SECS,
        }
    }
}

impl Constraints {
    /// Derive ceilings from an already validated constraints block.
    /// Megabyte limits are converted to bytes.
    pub fn from_raw(constraints: &Map<String, Value>) -> Self {
        let limit = |key: &str, default: i64| {
            present(constraints, key)
                .and_then(as_limit)
                .unwrap_or(default)
        };

        Self {
            ram_limit_bytes: limit(RAM_LIMIT_KEY, DEFAULT_RAM_LIMIT_MB).saturating_mul(BYTES_PER_MB),
            swap_limit_bytes: limit(SWAP_LIMIT_KEY, DEFAULT_SWAP_LIMIT_MB)
                .saturating_mul(BYTES_PER_MB),
            cpu_limit_secs: limit(CPU_LIMIT_KEY, DEFAULT_CPU_LIMIT_SECS),
            wall_limit_secs: limit(WALL_LIMIT_KEY, DEFAULT_WALL_LIMIT_SECS),
        }
    }
}

/// A `null` value counts as absent
fn present<'a>(constraints: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    constraints.get(key).filter(|value| !value.is_null())
}

/// Integers above `i64::MAX` saturate
fn as_limit(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|_| i64::MAX))
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Every present constraint must be an integer; negative values are allowed.
/// All offending keys are collected into a single error.
pub fn validate_constraints(constraints: &Map<String, Value>) -> Result<(), SessionError> {
    let mut offending = Vec::new();

    for key in CONSTRAINT_KEYS {
        if let Some(value) = present(constraints, key) {
            if !is_integer(value) {
                warn!(
                    "\"{}\" value must be of type int, not {}",
                    key,
                    json_type_name(value)
                );
                offending.push(key.to_string());
            }
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        Err(SessionError::InvalidConstraintType { keys: offending })
    }
}

/// Locate and validate the constraints block of a test descriptor
pub fn check_constraints(descriptor: &Value) -> Result<&Map<String, Value>, SessionError> {
    let constraints = descriptor
        .get("constraints")
        .and_then(Value::as_object)
        .ok_or(SessionError::MissingConstraintsBlock)?;

    validate_constraints(constraints)?;
    Ok(constraints)
}

/// A validated test request received from the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub test_name: String,
    pub constraints: Constraints,
}

impl TestRequest {
    /// Constraints are checked before the test name, so a descriptor with both
    /// problems reports the constraint failure.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, SessionError> {
        let constraints = Constraints::from_raw(check_constraints(descriptor)?);

        let test_name = descriptor
            .get("test_name")
            .and_then(Value::as_str)
            .ok_or(SessionError::MissingTestName)?;

        Ok(Self {
            test_name: test_name.to_string(),
            constraints,
        })
    }
}
