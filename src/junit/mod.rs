//! Failure capture for compiled test suites.
//!
//! Every compiled test is run through `JUnitCore`; the failures it prints are
//! parsed into [`StackTrace`] values. Comparing the failures against the
//! original and the patched variant of a benchmark tells whether a suite
//! reproduces the fixed bug.

pub mod stack_trace;

pub use stack_trace::{StackTrace, StackTraceLine};

use crate::compilation::CompilationResult;
use crate::config::Config;
use crate::model::{read_json, write_json};
use crate::process::{run_with_timeout, OutputMode};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

pub const FAILURES_FILE: &str = "failures.json";
pub const PATCHED_FAILURES_FILE: &str = "failures-patched.json";

const JUNIT_RUNNER: &str = "org.junit.runner.JUnitCore";

/// Which build of a benchmark the tests ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Patched,
}

impl Variant {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Original => FAILURES_FILE,
            Self::Patched => PATCHED_FAILURES_FILE,
        }
    }
}

/// Extract the failure traces from `JUnitCore` console output.
///
/// Failures are listed after `There was 1 failure:` / `There were N failures:`
/// as numbered headers (`1) testName(pkg.Klass)`) each followed by a trace.
pub fn parse_junit_output(output: &str) -> Vec<StackTrace> {
    let mut traces = Vec::new();
    let mut in_failures = false;
    let mut current: Option<String> = None;

    for line in output.lines() {
        if line.starts_with("There was ") || line.starts_with("There were ") {
            in_failures = true;
            continue;
        }
        if !in_failures {
            continue;
        }
        if line.starts_with("FAILURES!!!") || line.starts_with("OK (") {
            break;
        }
        if is_failure_header(line) {
            traces.extend(current.take().and_then(|text| StackTrace::parse(&text)));
            current = Some(String::new());
            continue;
        }
        if let Some(text) = current.as_mut() {
            text.push_str(line);
            text.push('\n');
        }
    }
    traces.extend(current.and_then(|text| StackTrace::parse(&text)));
    traces
}

fn is_failure_header(line: &str) -> bool {
    match line.split_once(") ") {
        Some((number, _)) => !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Failures present in one variant but not the other include an assertion error.
pub fn reproduces_failure(original: &BTreeSet<StackTrace>, patched: &BTreeSet<StackTrace>) -> bool {
    original
        .symmetric_difference(patched)
        .any(StackTrace::is_assertion_error)
}

/// Failure set stored in `dir`; a missing or unreadable file is an empty set.
pub fn read_failures(dir: &Path, variant: Variant) -> BTreeSet<StackTrace> {
    let path = dir.join(variant.file_name());
    if !path.exists() {
        return BTreeSet::new();
    }
    match read_json(&path) {
        Ok(failures) => failures,
        Err(e) => {
            tracing::warn!("Ignoring unreadable failures file: {:#}", e);
            BTreeSet::new()
        }
    }
}

pub struct FailureCollector {
    java: String,
    timeout: Duration,
    grace: Duration,
}

impl FailureCollector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            java: config.jvm.java.clone(),
            timeout: config.timeouts.junit_timeout(),
            grace: config.timeouts.grace(),
        }
    }

    /// Run every compiled test and gather the distinct failures.
    pub async fn collect(&self, compilation: &CompilationResult) -> Result<BTreeSet<StackTrace>> {
        let class_path = std::env::join_paths(&compilation.full_class_path)
            .context("Class path contains an invalid entry")?;

        let mut failures = BTreeSet::new();
        for test in compilation.compiled_tests() {
            let mut command = Command::new(&self.java);
            command.arg("-cp").arg(&class_path).arg(JUNIT_RUNNER).arg(test);

            let result =
                run_with_timeout(command, self.timeout, self.grace, OutputMode::Capture).await;
            if result.timed_out() {
                tracing::warn!("{} timed out under JUnit", test);
            }
            let traces = parse_junit_output(&result.output);
            tracing::debug!("{}: {} failures", test, traces.len());
            failures.extend(traces);
        }
        Ok(failures)
    }

    /// Collect failures and store them as the given variant's file in `dir`.
    pub async fn collect_into(
        &self,
        compilation: &CompilationResult,
        dir: &Path,
        variant: Variant,
    ) -> Result<BTreeSet<StackTrace>> {
        let failures = self.collect(compilation).await?;
        write_json(&dir.join(variant.file_name()), &failures)?;
        Ok(failures)
    }
}
