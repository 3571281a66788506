//! Line, instruction and branch coverage of the target class via JaCoCo.
//!
//! Each compiled test runs in its own JVM with the JaCoCo agent attached and
//! writes `<test>.exec` into the suite's source directory. The execution files
//! are then merged into a single `coverage.xml` restricted to the target class
//! and parsed into per-method coverage.

pub mod partition;
pub mod report;

use crate::compilation::CompilationResult;
use crate::config::Config;
use crate::model::{Benchmark, ClassCoverageInfo, ClassId, TestSuite, TestSuiteCoverage};
use crate::process::{run_with_timeout, OutputMode};
use anyhow::{Context, Result};
use report::Report;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

pub const REPORT_FILE: &str = "coverage.xml";

const JUNIT_RUNNER: &str = "org.junit.runner.JUnitCore";

pub struct JacocoCoverageProvider {
    java: String,
    jvm_args: Vec<String>,
    agent_jar: PathBuf,
    cli_jar: PathBuf,
    test_timeout: Duration,
    report_timeout: Duration,
    grace: Duration,
}

impl JacocoCoverageProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            java: config.jvm.java.clone(),
            jvm_args: config.jvm.jvm_args.clone(),
            agent_jar: config.lib_jar("jacocoagent.jar")?,
            cli_jar: config.lib_jar("jacococli.jar")?,
            test_timeout: config.timeouts.test_run_timeout(),
            report_timeout: config.timeouts.coverage_report_timeout(),
            grace: config.timeouts.grace(),
        })
    }

    /// Coverage of `benchmark.klass` by the compiled tests of a suite.
    ///
    /// Never fails: a report that could not be produced or parsed yields an
    /// empty [`ClassCoverageInfo`] for the target class.
    pub async fn compute_coverage(
        &self,
        benchmark: &Benchmark,
        test_suite: &TestSuite,
        compilation: &CompilationResult,
    ) -> TestSuiteCoverage {
        let class = match self.class_coverage(benchmark, test_suite, compilation).await {
            Ok(class) => class,
            Err(e) => {
                tracing::error!("Coverage of {} failed: {:#}", benchmark.build_id, e);
                ClassCoverageInfo::empty(ClassId::new(&benchmark.klass))
            }
        };

        TestSuiteCoverage {
            compilation_rate: compilation.compilation_rate,
            coverage: vec![class],
        }
    }

    async fn class_coverage(
        &self,
        benchmark: &Benchmark,
        test_suite: &TestSuite,
        compilation: &CompilationResult,
    ) -> Result<ClassCoverageInfo> {
        let class_path = std::env::join_paths(&compilation.full_class_path)
            .context("Class path contains an invalid entry")?;

        let mut exec_files = Vec::new();
        for test in compilation.compiled_tests() {
            let exec_file = test_suite.test_src_path.join(format!("{}.exec", test));
            // The agent appends to an existing file
            let _ = tokio::fs::remove_file(&exec_file).await;

            let command = self.test_command(&class_path, &exec_file, test);
            let result =
                run_with_timeout(command, self.test_timeout, self.grace, OutputMode::Capture).await;
            tracing::debug!("{} under coverage: {}", test, result.outcome);

            if exec_file.exists() {
                exec_files.push(exec_file);
            } else {
                tracing::warn!("{} produced no execution data", test);
            }
        }

        let report_path = test_suite.test_src_path.join(REPORT_FILE);
        let _ = tokio::fs::remove_file(&report_path).await;

        let command = self.report_command(benchmark, &exec_files, &report_path);
        let result =
            run_with_timeout(command, self.report_timeout, self.grace, OutputMode::Capture).await;
        if !result.success() {
            tracing::warn!(
                "Coverage report for {} {}:\n{}",
                benchmark.build_id,
                result.outcome,
                result.output
            );
        }

        Ok(read_class_coverage(&report_path, benchmark).await)
    }

    fn test_command(&self, class_path: &OsStr, exec_file: &Path, test: &str) -> Command {
        let mut command = Command::new(&self.java);
        command
            .args(&self.jvm_args)
            .arg("-cp")
            .arg(class_path)
            .arg(format!(
                "-javaagent:{}=destfile={}",
                self.agent_jar.display(),
                exec_file.display()
            ))
            .arg(JUNIT_RUNNER)
            .arg(test);
        command
    }

    fn report_command(&self, benchmark: &Benchmark, exec_files: &[PathBuf], xml: &Path) -> Command {
        let mut command = Command::new(&self.java);
        command
            .args(&self.jvm_args)
            .arg("-jar")
            .arg(&self.cli_jar)
            .arg("report")
            .args(exec_files)
            .arg("--classfiles")
            .arg(benchmark.class_file())
            .arg("--sourcefiles")
            .arg(&benchmark.src)
            .arg("--xml")
            .arg(xml);
        command
    }
}

/// Parse the target class out of a JaCoCo XML report.
///
/// A missing, unreadable or malformed report, or one without the target
/// class, yields an empty [`ClassCoverageInfo`].
pub async fn read_class_coverage(report_path: &Path, benchmark: &Benchmark) -> ClassCoverageInfo {
    let class_id = ClassId::new(&benchmark.klass);

    let xml = match tokio::fs::read_to_string(report_path).await {
        Ok(xml) => xml,
        Err(e) => {
            tracing::warn!(
                "No coverage report for {} at {}: {}",
                benchmark.build_id,
                report_path.display(),
                e
            );
            return ClassCoverageInfo::empty(class_id);
        }
    };

    let report = match Report::parse(&xml) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("Malformed coverage report {}: {}", report_path.display(), e);
            return ClassCoverageInfo::empty(class_id);
        }
    };

    match report.class(&benchmark.internal_name()) {
        Some((class, source)) => partition::class_coverage(class_id, class, source),
        None => {
            tracing::warn!(
                "Coverage report {} does not contain {}",
                report_path.display(),
                benchmark.klass
            );
            ClassCoverageInfo::empty(class_id)
        }
    }
}
