mod config;
mod domain;
mod fixtures;
mod protocol;
mod reporter;
mod runner;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::ClientConfig;
use crate::domain::{SessionError, UNKNOWN_TEST_EXIT_CODE};
use crate::protocol::{SessionSummary, SolutionTester};
use crate::runner::ProcessRunner;

/// Exit status for fatal errors other than an unknown test name
const FATAL_EXIT_CODE: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("solution_tester=info".parse()?),
        )
        .init();

    let config = ClientConfig::from_env()?;
    info!("Client config: {:?}", config);

    let tests = fixtures::load_tests(&config.tests_root)
        .with_context(|| format!("Failed to load tests from {:?}", config.tests_root))?;
    info!("Loaded {} tests from {:?}", tests.len(), config.tests_root);

    let mut tester = SolutionTester::new(config, tests, ProcessRunner::default());
    let result = tester.test_solution().await;

    match &result {
        Ok(summary) => info!(
            "Session finished: tests_run={}, reason={:?}",
            summary.tests_run, summary.reason
        ),
        Err(e) => error!("Stopping worker: {:#}", e),
    }

    match exit_status(&result) {
        0 => Ok(()),
        status => std::process::exit(status),
    }
}

/// Map a finished session to the worker's exit status
fn exit_status(result: &Result<SessionSummary>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e)
            if e
                .downcast_ref::<SessionError>()
                .is_some_and(SessionError::is_unknown_test) =>
        {
            UNKNOWN_TEST_EXIT_CODE
        }
        Err(_) => FATAL_EXIT_CODE,
    }
}
