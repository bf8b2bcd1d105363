use std::fmt;

/// Return code reported when the wall-clock deadline expires
pub const TIMEOUT_RETURN_CODE: i32 = 124;
/// Return code reported when the resource monitor killed the solution for RAM usage
pub const MEMORY_LIMIT_RETURN_CODE: i32 = 7;
/// Return code reported when the resource monitor killed the solution for CPU usage
pub const CPU_LIMIT_RETURN_CODE: i32 = -9;

/// Limit breach detected by the resource monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    MemoryLimitExceeded,
    CpuLimitExceeded,
}

impl Violation {
    pub fn return_code(self) -> i32 {
        match self {
            Violation::MemoryLimitExceeded => MEMORY_LIMIT_RETURN_CODE,
            Violation::CpuLimitExceeded => CPU_LIMIT_RETURN_CODE,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::MemoryLimitExceeded => "memory_limit_exceeded",
            Violation::CpuLimitExceeded => "cpu_limit_exceeded",
        };
        write!(f, "{}", s)
    }
}

/// Final return code: a monitor kill wins over the timeout, which wins over the exit code
pub fn resolve_return_code(exit_code: i32, timed_out: bool, violation: Option<Violation>) -> i32 {
    match violation {
        Some(violation) => violation.return_code(),
        None if timed_out => TIMEOUT_RETURN_CODE,
        None => exit_code,
    }
}
