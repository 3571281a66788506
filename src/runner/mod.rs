//! Orchestrator side: hands every benchmark of every run to the connected tool.

use crate::model::{write_json, Benchmark, TestSuite};
use crate::protocol::{BenchmarkRequest, GenerationResult, ProtocolError, ServerConnection};
use anyhow::Result;
use serde::Serialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub const BENCHMARK_FILE: &str = "benchmark.json";
pub const TEST_SUITE_FILE: &str = "testSuite.json";

/// Run indices to execute: `k` (= `0..k`), `a..b` or `a..=b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRange(Range<u32>);

impl RunRange {
    pub fn indices(&self) -> Range<u32> {
        self.0.clone()
    }
}

impl FromStr for RunRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid run index '{}': {}", v, e))
        };
        let range = if let Some((start, end)) = s.split_once("..=") {
            parse(start)?..parse(end)? + 1
        } else if let Some((start, end)) = s.split_once("..") {
            parse(start)?..parse(end)?
        } else {
            0..parse(s)?
        };
        if range.is_empty() {
            return Err(format!("run range '{}' is empty", s));
        }
        Ok(Self(range))
    }
}

/// Directory name of one run: `<name>-<index>`, or just the index.
pub fn run_label(run_name: Option<&str>, index: u32) -> String {
    match run_name {
        Some(name) => format!("{}-{}", name, index),
        None => index.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} completed, {} skipped, {} failed",
            self.completed, self.skipped, self.failed
        )
    }
}

pub struct Runner {
    pub benchmarks: Vec<Benchmark>,
    pub time_limit: Duration,
    pub output_directory: PathBuf,
    pub runs: RunRange,
    pub run_name: Option<String>,
    /// Prefix substitution applied to persisted artifacts
    pub remap: Option<(PathBuf, PathBuf)>,
}

impl Runner {
    /// Drive a whole session over an accepted connection.
    ///
    /// Protocol failures abort the session; everything else only skips the
    /// affected benchmark.
    pub async fn run<S>(&self, connection: &mut ServerConnection<S>) -> Result<RunSummary, ProtocolError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let tool_name = connection.init().await?;
        tracing::info!("Initialized tool {}", tool_name);
        let base_dir = self.output_directory.join(&tool_name);

        let mut summary = RunSummary::default();
        for index in self.runs.indices() {
            let run_dir = base_dir.join(run_label(self.run_name.as_deref(), index));
            tracing::info!("Starting run {}", run_dir.display());

            for benchmark in &self.benchmarks {
                let output = run_dir.join(&benchmark.build_id);
                if output.exists() {
                    tracing::info!("Skipping {}: {} already exists", benchmark.build_id, output.display());
                    summary.skipped += 1;
                    continue;
                }

                tracing::info!("Running on benchmark {}", benchmark.build_id);
                let result = connection
                    .request(BenchmarkRequest {
                        benchmark: benchmark.clone(),
                        time_limit: self.time_limit,
                        output_directory: output.clone(),
                    })
                    .await?;

                match result {
                    GenerationResult::Unsuccessful { reason, .. } => {
                        tracing::error!("Unsuccessful run on benchmark {}: {}", benchmark.build_id, reason);
                        summary.failed += 1;
                    }
                    GenerationResult::Successful {
                        test_suite,
                        generation_time,
                    } => {
                        if !output.exists() {
                            tracing::error!(
                                "Tool produced no output directory for {}: {}",
                                benchmark.build_id,
                                output.display()
                            );
                            summary.failed += 1;
                            continue;
                        }
                        match self.persist(&output, benchmark, &test_suite) {
                            Ok(()) => {
                                tracing::info!(
                                    "{}: {} tests generated in {} ms",
                                    benchmark.build_id,
                                    test_suite.tests.len(),
                                    generation_time.as_millis()
                                );
                                summary.completed += 1;
                            }
                            Err(e) => {
                                tracing::error!("Failed to persist results for {}: {:#}", benchmark.build_id, e);
                                summary.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        connection.stop().await?;
        tracing::info!("Runner finished: {}", summary);
        Ok(summary)
    }

    fn persist(&self, output: &Path, benchmark: &Benchmark, test_suite: &TestSuite) -> Result<()> {
        let (benchmark, test_suite) = match &self.remap {
            Some((from, to)) => (benchmark.remap(from, to), test_suite.remap(from, to)),
            None => (benchmark.clone(), test_suite.clone()),
        };
        write_json(&output.join(BENCHMARK_FILE), &benchmark)?;
        write_json(&output.join(TEST_SUITE_FILE), &test_suite)?;
        make_world_accessible(output);
        Ok(())
    }
}

/// Recursively open up permissions so other pipeline stages can reuse the artifacts.
pub fn make_world_accessible(root: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let permissions = std::fs::Permissions::from_mode(0o777);
            if let Err(e) = std::fs::set_permissions(entry.path(), permissions) {
                tracing::warn!("Failed to set permissions on {}: {}", entry.path().display(), e);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = root;
}
