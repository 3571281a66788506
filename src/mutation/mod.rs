//! Mutation score of a compiled test suite via PIT.
//!
//! PIT mutates only the target class and runs only the tests that compiled.
//! Its CSV report has one row per mutant; the score is killed rows over all rows.

use crate::compilation::CompilationResult;
use crate::config::{AnalysisConfig, Config};
use crate::model::{Benchmark, Fraction, TestSuite};
use crate::process::{run_with_timeout, OutputMode};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;

pub const MUTATIONS_FILE: &str = "mutations.csv";
pub const LOG_FILE: &str = "pitest.log";

const PIT_ENTRY_POINT: &str = "org.pitest.mutationtest.commandline.MutationCoverageReport";

/// Final state of one mutant as reported by PIT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutantStatus {
    /// A test failed - mutant was detected
    Killed,
    /// All covering tests passed
    Survived,
    /// No test reached the mutated code
    NoCoverage,
    TimedOut,
    MemoryError,
    RunError,
    NonViable,
    NotStarted,
    Started,
}

impl MutantStatus {
    pub fn is_killed(self) -> bool {
        self == Self::Killed
    }
}

impl std::fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Killed => write!(f, "KILLED"),
            Self::Survived => write!(f, "SURVIVED"),
            Self::NoCoverage => write!(f, "NO_COVERAGE"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::MemoryError => write!(f, "MEMORY_ERROR"),
            Self::RunError => write!(f, "RUN_ERROR"),
            Self::NonViable => write!(f, "NON_VIABLE"),
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::Started => write!(f, "STARTED"),
        }
    }
}

impl FromStr for MutantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "KILLED" => Ok(Self::Killed),
            "SURVIVED" => Ok(Self::Survived),
            "NO_COVERAGE" => Ok(Self::NoCoverage),
            "TIMED_OUT" => Ok(Self::TimedOut),
            "MEMORY_ERROR" => Ok(Self::MemoryError),
            "RUN_ERROR" => Ok(Self::RunError),
            "NON_VIABLE" => Ok(Self::NonViable),
            "NOT_STARTED" => Ok(Self::NotStarted),
            "STARTED" => Ok(Self::Started),
            other => Err(format!("unknown mutant status: {}", other)),
        }
    }
}

/// One row of `mutations.csv`:
/// `file,class,mutator,method,line,status,killingTest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantRecord {
    pub mutated_class: String,
    pub mutator: String,
    pub method: String,
    pub line: Option<u32>,
    pub status: Option<MutantStatus>,
    raw: String,
}

/// Split one CSV row, honouring double-quoted fields and `""` escapes.
fn split_row(row: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = row.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

impl MutantRecord {
    /// The status is read from its column; when stray separators shift the
    /// columns, the first field naming a known status is used instead.
    pub fn parse(row: &str) -> Self {
        let columns = split_row(row);
        let column = |i: usize| columns.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
        let status = columns
            .get(5)
            .and_then(|c| c.parse().ok())
            .or_else(|| columns.iter().find_map(|c| c.parse().ok()));
        Self {
            mutated_class: column(1),
            mutator: column(2),
            method: column(3),
            line: columns.get(4).and_then(|c| c.trim().parse().ok()),
            status,
            raw: row.to_string(),
        }
    }

    /// Rows without a recognisable status column count as killed when they
    /// mention `KILLED` anywhere.
    pub fn is_killed(&self) -> bool {
        match self.status {
            Some(status) => status.is_killed(),
            None => self.raw.contains("KILLED"),
        }
    }
}

/// Parse every non-blank row of a PIT CSV report.
pub fn parse_mutations(contents: &str) -> Vec<MutantRecord> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(MutantRecord::parse)
        .collect()
}

/// Killed mutants over all mutants.
pub fn mutation_score(records: &[MutantRecord]) -> Fraction {
    let killed = records.iter().filter(|r| r.is_killed()).count();
    Fraction::new(killed as u64, records.len() as u64)
}

pub struct MutationScoreProvider {
    java: String,
    pitest_jar: PathBuf,
    analysis: AnalysisConfig,
    timeout: Duration,
    grace: Duration,
}

impl MutationScoreProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            java: config.jvm.java.clone(),
            pitest_jar: config.lib_jar("pitest.jar")?,
            analysis: config.analysis.clone(),
            timeout: config.timeouts.mutation_timeout(),
            grace: config.timeouts.grace(),
        })
    }

    /// Never fails: a crashed or timed-out run leaves no report and scores `0/0`.
    pub async fn compute_mutation_score(
        &self,
        benchmark: &Benchmark,
        test_suite: &TestSuite,
        compilation: &CompilationResult,
    ) -> Fraction {
        if compilation.compilable_tests.is_empty() {
            tracing::debug!("{}: no compiled tests, skipping mutation analysis", benchmark.build_id);
            return Fraction::ZERO;
        }

        let report_dir = &test_suite.test_src_path;
        let mutations_file = report_dir.join(MUTATIONS_FILE);
        let _ = tokio::fs::remove_file(&mutations_file).await;

        tracing::debug!("Running mutation analysis for {}", benchmark.build_id);
        let command = self.command(benchmark, report_dir, compilation);
        let result = run_with_timeout(
            command,
            self.timeout,
            self.grace,
            OutputMode::File(report_dir.join(LOG_FILE)),
        )
        .await;
        if !result.success() {
            tracing::warn!("Mutation analysis of {} {}", benchmark.build_id, result.outcome);
        }

        read_mutation_score(&mutations_file).await
    }

    fn command(&self, benchmark: &Benchmark, report_dir: &Path, compilation: &CompilationResult) -> Command {
        let class_path: Vec<String> = compilation
            .full_class_path
            .iter()
            .filter(|entry| !self.analysis.is_mutation_excluded(entry))
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect();
        let tests: Vec<&str> = compilation.compiled_tests().collect();

        let mut command = Command::new(&self.java);
        command
            .arg("-cp")
            .arg(&self.pitest_jar)
            .arg(PIT_ENTRY_POINT)
            .args(["--includeLaunchClasspath", "false"])
            .arg("--classPath")
            .arg(class_path.join(","))
            .arg("--reportDir")
            .arg(report_dir)
            .arg("--targetClasses")
            .arg(&benchmark.klass)
            .arg("--targetTests")
            .arg(tests.join(","))
            .arg("--sourceDirs")
            .arg(&benchmark.src)
            .args(["--outputFormats", "CSV"])
            .args(["--timestampedReports", "false"]);
        command
    }
}

/// Score from a `mutations.csv`; `0/0` when the file is missing.
pub async fn read_mutation_score(path: &Path) -> Fraction {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let records = parse_mutations(&contents);
            let score = mutation_score(&records);
            tracing::debug!("{}: {} mutants killed", path.display(), score);
            score
        }
        Err(e) => {
            tracing::warn!("No mutation report at {}: {}", path.display(), e);
            Fraction::ZERO
        }
    }
}
