//! Client configuration
//!
//! Loaded from environment variables by the bootstrap and handed to the
//! protocol engine explicitly.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::DEFAULT_TRUNCATE_TO;
use crate::runner::CommandSpec;

pub const ENV_HOST: &str = "PROBLEM_NAME";
pub const ENV_PORT: &str = "TASK_CONTAINER_PORT";
pub const ENV_SOLUTION_ID: &str = "SOLUTION_ID";
pub const ENV_RUN_COMMAND: &str = "RUN_COMMAND";
pub const ENV_CONNECTION_TRIES: &str = "CONNECTION_TRIES_NUMBER";
pub const ENV_CONNECTION_DELAY: &str = "CONNECTION_TRIES_DELAY_S";
pub const ENV_TRUNCATE_TO: &str = "NUM_TO_TRUNCATE";
pub const ENV_TESTS_ROOT: &str = "TESTS_ROOT";

const REQUIRED_VARS: [&str; 4] = [ENV_HOST, ENV_PORT, ENV_SOLUTION_ID, ENV_RUN_COMMAND];

const DEFAULT_CONNECTION_TRIES: u32 = 5;
const DEFAULT_CONNECTION_DELAY_SECS: u64 = 5;
const DEFAULT_TESTS_ROOT: &str = "/tmp/sources";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator host name or address
    pub host: String,
    /// Coordinator port
    pub port: u16,
    /// Sent as the first message after connecting
    pub solution_id: String,
    /// Command launching the solution
    pub command: CommandSpec,
    /// Connect attempts before giving up
    pub connection_tries: u32,
    /// Fixed pause between connect attempts
    pub connection_delay: Duration,
    /// Length string fields are cut to in outgoing-message logs
    pub truncate_to: usize,
    /// Directory holding the `tests/` fixture folder
    pub tests_root: PathBuf,
}

impl ClientConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    /// Every missing or empty required variable is reported in one error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut errors = Vec::new();
        for key in REQUIRED_VARS {
            match lookup(key) {
                None => errors.push(format!("Environment variable \"{}\" is not set", key)),
                Some(value) if value.trim().is_empty() => {
                    errors.push(format!("Environment variable \"{}\" is empty", key))
                }
                Some(_) => {}
            }
        }
        if !errors.is_empty() {
            bail!("Setup errors:\n{}", errors.join("\n"));
        }

        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{} is not set", key));
        let run_command = required(ENV_RUN_COMMAND)?;

        Ok(Self {
            host: required(ENV_HOST)?.trim().to_string(),
            port: parse_var(ENV_PORT, &required(ENV_PORT)?)?,
            solution_id: required(ENV_SOLUTION_ID)?,
            command: CommandSpec::parse(&run_command)
                .with_context(|| format!("{} has no program", ENV_RUN_COMMAND))?,
            connection_tries: optional_var(&lookup, ENV_CONNECTION_TRIES, DEFAULT_CONNECTION_TRIES)?,
            connection_delay: Duration::from_secs(optional_var(
                &lookup,
                ENV_CONNECTION_DELAY,
                DEFAULT_CONNECTION_DELAY_SECS,
            )?),
            truncate_to: optional_var(&lookup, ENV_TRUNCATE_TO, DEFAULT_TRUNCATE_TO)?,
            tests_root: lookup(ENV_TESTS_ROOT)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TESTS_ROOT.to_string())
                .into(),
        })
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}

fn optional_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => parse_var(key, &value),
        _ => Ok(default),
    }
}
