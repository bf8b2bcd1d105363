//! Test fixture loading
//!
//! Test inputs live in `<root>/tests/`, one file per test. The file name is the
//! test name and each line of the file is one input line.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

const TESTS_FOLDER: &str = "tests";

/// Test name -> input lines, sorted by name
pub type TestSuite = BTreeMap<String, Vec<String>>;

/// Load every test under `<root>/tests/`
pub fn load_tests(root: &Path) -> Result<TestSuite> {
    read_folder(&root.join(TESTS_FOLDER))
}

fn read_folder(folder: &Path) -> Result<TestSuite> {
    let entries =
        fs::read_dir(folder).with_context(|| format!("Failed to list tests in {:?}", folder))?;

    let mut suite = TestSuite::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list tests in {:?}", folder))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        if !path.is_file() {
            debug!("Skipping non-file entry {:?}", path);
            continue;
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read test {:?}", path))?;
        suite.insert(name, content.lines().map(str::to_string).collect());
    }

    Ok(suite)
}
