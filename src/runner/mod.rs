//! Runner module - Execution abstraction layer
//!
//! This module runs the solution for one test and reports raw facts:
//! - `ProcessRunner`: spawns the solution under a wall-clock deadline
//! - `ResourceMonitor`: samples RAM/CPU in parallel and enforces ceilings
//!
//! The runner module does NOT:
//! - Compare outputs or decide pass/fail
//! - Talk to the coordinator
//! - Know where test inputs come from

pub mod monitor;
pub mod process;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::domain::Constraints;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Split a run command on whitespace (first word is the program)
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).with_args(words))
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }
}

/// Resource limits for one execution. Negative limits are exceeded at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Wall-clock deadline in seconds
    pub wall_limit_secs: i64,
    /// Resident memory ceiling in bytes (0 disables the check)
    pub ram_limit_bytes: i64,
    /// User CPU time ceiling in seconds
    pub cpu_limit_secs: i64,
}

impl RunLimits {
    /// Deadline for the wait; a negative limit expires immediately
    pub fn wall_limit(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.wall_limit_secs).unwrap_or(0))
    }
}

impl From<&Constraints> for RunLimits {
    fn from(constraints: &Constraints) -> Self {
        Self {
            wall_limit_secs: constraints.wall_limit_secs,
            ram_limit_bytes: constraints.ram_limit_bytes,
            cpu_limit_secs: constraints.cpu_limit_secs,
        }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::from(&Constraints::default())
    }
}

/// Raw facts about a finished execution, no verdict interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub return_code: i32,
    pub timed_out: bool,
}

impl RawResult {
    /// Stdout as trimmed text. Invalid UTF-8 yields empty text and the decode error.
    pub fn decoded_stdout(&self) -> (String, Option<String>) {
        match std::str::from_utf8(&self.stdout) {
            Ok(text) => (text.trim().to_string(), None),
            Err(e) => (String::new(), Some(e.to_string())),
        }
    }

    /// Stderr as text, replacing invalid sequences instead of failing
    pub fn decoded_stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Everything known about a run once both the process and its monitor finished
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub raw: RawResult,
    pub usage: MonitorReport,
    pub wall_time: Duration,
}

/// Runner trait for executing the solution
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command, feeding `input_lines` joined by newlines as stdin
    async fn run(
        &self,
        cmd: &CommandSpec,
        input_lines: &[String],
        limits: &RunLimits,
    ) -> Result<RunOutcome>;
}

// Re-exports
pub use monitor::MonitorReport;
pub use process::ProcessRunner;
