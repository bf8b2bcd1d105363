//! Result reporter
//!
//! Builds the per-test record sent back to the coordinator.

use nix::sys::resource::{getrusage, UsageWho};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::runner::RunOutcome;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SWAPS_PER_MB: f64 = 1024.0;

/// Outcome of one test, in the coordinator's wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_name: String,
    pub output: String,
    pub error: String,
    pub output_conversion_error: Option<String>,
    pub returncode: i32,
    pub peak_ram_used_mb: f64,
    pub peak_swap_used_mb: f64,
    pub cpu_execution_time_s: f64,
    pub execution_time_s: f64,
}

impl TestReport {
    pub fn build(test_name: &str, outcome: &RunOutcome, peak_swap_used_mb: f64) -> Self {
        let (output, output_conversion_error) = outcome.raw.decoded_stdout();

        Self {
            test_name: test_name.to_string(),
            output,
            error: outcome.raw.decoded_stderr(),
            output_conversion_error,
            returncode: outcome.raw.return_code,
            peak_ram_used_mb: outcome.usage.peak_ram_bytes as f64 / BYTES_PER_MB,
            peak_swap_used_mb,
            cpu_execution_time_s: outcome.usage.peak_cpu_secs,
            execution_time_s: outcome.wall_time.as_secs_f64(),
        }
    }
}

/// Swap usage of all reaped children, from the kernel's aggregate accounting
/// rather than from the resource monitor's samples.
pub fn children_swap_mb() -> f64 {
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => usage.full_swaps() as f64 / SWAPS_PER_MB,
        Err(e) => {
            warn!("getrusage(RUSAGE_CHILDREN) failed: {}", e);
            0.0
        }
    }
}
