//! Batch evaluation of runner output.
//!
//! Every `<tool>/<runLabel>/<buildId>/` directory holding a benchmark and the
//! suite generated for it becomes one task: compile, measure coverage and
//! mutation score, optionally check failure reproduction, and look up static
//! metrics. Tasks run on a bounded worker pool; a single writer appends each
//! finished row to the CSV as soon as it arrives.

pub mod metrics;
pub mod report;

pub use metrics::MetricsCatalog;
pub use report::{AnalysisRow, AnalysisSummary};

use crate::compilation::{CompilationResult, TestSuiteCompiler};
use crate::compiler::{Compiler, JavacCompiler};
use crate::config::Config;
use crate::coverage::JacocoCoverageProvider;
use crate::dependency::DependencyResolver;
use crate::junit::{reproduces_failure, FailureCollector, Variant};
use crate::model::{read_json, write_json, Benchmark, Fraction, TestSuite};
use crate::mutation::MutationScoreProvider;
use crate::runner::{BENCHMARK_FILE, TEST_SUITE_FILE};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use walkdir::WalkDir;

pub const COMPILATION_RESULT_FILE: &str = "compilationResult.json";
pub const COVERAGE_FILE: &str = "coverage.json";

/// One benchmark directory produced by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTask {
    pub tool: String,
    pub run_name: String,
    pub iteration: Option<u32>,
    pub build_id: String,
    pub dir: PathBuf,
}

/// Split `<runName>-<iteration>` at the last dash.
///
/// A bare number is an iteration without a name; a label without a numeric
/// suffix is a name without an iteration.
pub fn split_run_label(label: &str) -> (String, Option<u32>) {
    if let Ok(iteration) = label.parse() {
        return (String::new(), Some(iteration));
    }
    match label.rsplit_once('-') {
        Some((name, suffix)) => match suffix.parse() {
            Ok(iteration) => (name.to_string(), Some(iteration)),
            Err(_) => (label.to_string(), None),
        },
        None => (label.to_string(), None),
    }
}

/// Find every task directory below `results_dir`, sorted by path.
pub fn discover_tasks(results_dir: &Path) -> Vec<AnalysisTask> {
    let mut tasks = Vec::new();

    for entry in WalkDir::new(results_dir)
        .min_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let dir = entry.path();
        if !dir.join(BENCHMARK_FILE).is_file() || !dir.join(TEST_SUITE_FILE).is_file() {
            continue;
        }

        let Ok(relative) = dir.strip_prefix(results_dir) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let [.., tool, label, build_id] = parts.as_slice() else {
            continue;
        };

        let (run_name, iteration) = split_run_label(label);
        tasks.push(AnalysisTask {
            tool: tool.clone(),
            run_name,
            iteration,
            build_id: build_id.clone(),
            dir: dir.to_path_buf(),
        });
    }

    tasks.sort_by(|a, b| a.dir.cmp(&b.dir));
    tasks
}

/// Inputs beyond the configuration file.
#[derive(Debug, Default)]
pub struct AnalysisOptions {
    /// Applied to benchmark paths (benchmarks built in another container)
    pub benchmark_remap: Option<(PathBuf, PathBuf)>,
    /// Applied to test suite paths (results produced in another container)
    pub results_remap: Option<(PathBuf, PathBuf)>,
    /// Patched benchmark variants by build id; enables failure reproduction
    pub patched: HashMap<String, Benchmark>,
    pub metrics: MetricsCatalog,
}

pub struct Analyzer<C = JavacCompiler> {
    compiler: TestSuiteCompiler<C>,
    coverage: JacocoCoverageProvider,
    mutation: MutationScoreProvider,
    failures: FailureCollector,
    options: AnalysisOptions,
}

impl Analyzer<JavacCompiler> {
    pub fn from_config(config: &Config, options: AnalysisOptions) -> Result<Self> {
        let resolver = Arc::new(DependencyResolver::new(&config.dependencies, &config.timeouts)?);
        let compiler = TestSuiteCompiler::new(JavacCompiler::from_config(config), resolver)?;
        Self::with_compiler(compiler, config, options)
    }
}

impl<C: Compiler> Analyzer<C> {
    pub fn with_compiler(
        compiler: TestSuiteCompiler<C>,
        config: &Config,
        options: AnalysisOptions,
    ) -> Result<Self> {
        Ok(Self {
            compiler,
            coverage: JacocoCoverageProvider::from_config(config)?,
            mutation: MutationScoreProvider::from_config(config)?,
            failures: FailureCollector::from_config(config),
            options,
        })
    }

    /// Load a task's benchmark and suite with the configured remaps applied.
    pub fn load(&self, dir: &Path) -> Result<(Benchmark, TestSuite)> {
        let mut benchmark: Benchmark = read_json(&dir.join(BENCHMARK_FILE))?;
        let mut test_suite: TestSuite = read_json(&dir.join(TEST_SUITE_FILE))?;
        if let Some((from, to)) = &self.options.benchmark_remap {
            benchmark = benchmark.remap(from, to);
        }
        if let Some((from, to)) = &self.options.results_remap {
            test_suite = test_suite.remap(from, to);
        }
        Ok((benchmark, test_suite))
    }

    pub async fn analyze(&self, task: &AnalysisTask) -> Result<AnalysisRow> {
        let (benchmark, test_suite) = self.load(&task.dir)?;

        let compilation = self.compiler.compile(&benchmark, &test_suite).await?;
        write_json(&task.dir.join(COMPILATION_RESULT_FILE), &compilation)?;

        let coverage = self
            .coverage
            .compute_coverage(&benchmark, &test_suite, &compilation)
            .await;
        write_json(&task.dir.join(COVERAGE_FILE), &coverage)?;

        let mutation_score = self
            .mutation
            .compute_mutation_score(&benchmark, &test_suite, &compilation)
            .await;

        let reproduction = match self.options.patched.get(&benchmark.build_id) {
            Some(patched) => match self.reproduction(patched, &test_suite, &compilation).await {
                Ok(reproduced) => Some(reproduced),
                Err(e) => {
                    tracing::warn!("Failure reproduction for {} failed: {:#}", task.build_id, e);
                    None
                }
            },
            None => None,
        };

        let class = coverage.class(&benchmark.klass);
        Ok(AnalysisRow {
            tool: task.tool.clone(),
            run_name: task.run_name.clone(),
            iteration: task.iteration,
            build_id: benchmark.build_id.clone(),
            klass: benchmark.klass.clone(),
            compilation_rate: compilation.compilation_rate,
            lines: class.map(|c| c.lines().fraction()).unwrap_or(Fraction::ZERO),
            branches: class.map(|c| c.branches().fraction()).unwrap_or(Fraction::ZERO),
            mutation_score,
            reproduction,
            complexity: self.options.metrics.complexity(&benchmark.build_id),
        })
    }

    /// Run the suite against the original and the patched build and compare failures.
    async fn reproduction(
        &self,
        patched: &Benchmark,
        test_suite: &TestSuite,
        compilation: &CompilationResult,
    ) -> Result<bool> {
        let dir = &test_suite.test_src_path;
        let original = self
            .failures
            .collect_into(compilation, dir, Variant::Original)
            .await?;

        let patched_compilation = self.compiler.compile(patched, test_suite).await?;
        let fixed = self
            .failures
            .collect_into(&patched_compilation, dir, Variant::Patched)
            .await?;

        Ok(reproduces_failure(&original, &fixed))
    }
}

/// Analyze every task on `workers` concurrent workers, streaming rows to `csv_path`.
///
/// The summary is written next to the CSV as `<csv>.summary.json`.
pub async fn run_analysis<C: Compiler + 'static>(
    analyzer: Arc<Analyzer<C>>,
    tasks: Vec<AnalysisTask>,
    workers: usize,
    csv_path: &Path,
) -> Result<AnalysisSummary> {
    tracing::info!("Analyzing {} benchmark results with {} workers", tasks.len(), workers);

    let (task_tx, task_rx) = mpsc::channel::<AnalysisTask>(100);
    let task_rx = Arc::new(TokioMutex::new(task_rx));
    let (row_tx, row_rx) = mpsc::channel::<AnalysisRow>(100);

    let writer = tokio::spawn(write_rows(csv_path.to_path_buf(), row_rx));

    let mut worker_handles = Vec::new();
    for id in 0..workers.max(1) {
        let worker_rx = Arc::clone(&task_rx);
        let analyzer = Arc::clone(&analyzer);
        let rows = row_tx.clone();
        worker_handles.push(tokio::spawn(async move {
            analysis_worker(id, analyzer, worker_rx, rows).await
        }));
    }
    drop(row_tx);

    for task in tasks {
        if task_tx.send(task).await.is_err() {
            break;
        }
    }
    drop(task_tx);

    for handle in worker_handles {
        if let Err(e) = handle.await {
            tracing::warn!("Analysis worker failed: {}", e);
        }
    }

    let rows = writer.await.context("CSV writer panicked")??;
    let summary = AnalysisSummary::from_rows(&rows);
    summary.log();

    let mut summary_path = csv_path.as_os_str().to_owned();
    summary_path.push(".summary.json");
    write_json(Path::new(&summary_path), &summary)?;

    Ok(summary)
}

async fn analysis_worker<C: Compiler>(
    id: usize,
    analyzer: Arc<Analyzer<C>>,
    receiver: Arc<TokioMutex<mpsc::Receiver<AnalysisTask>>>,
    rows: mpsc::Sender<AnalysisRow>,
) {
    tracing::debug!("Analysis worker {} started", id);

    loop {
        let task = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            break;
        };

        tracing::info!(
            "Processing {}/{}/{} (worker {})",
            task.tool,
            task.run_name,
            task.build_id,
            id
        );
        match analyzer.analyze(&task).await {
            Ok(row) => {
                if rows.send(row).await.is_err() {
                    tracing::warn!("CSV writer is gone, worker {} stopping", id);
                    break;
                }
            }
            Err(e) => tracing::error!("Analysis of {} failed: {:#}", task.dir.display(), e),
        }
    }

    tracing::debug!("Analysis worker {} finished - no more tasks", id);
}

/// Append rows to the CSV as they arrive, flushing after each one.
async fn write_rows(
    csv_path: PathBuf,
    mut rows: mpsc::Receiver<AnalysisRow>,
) -> Result<Vec<AnalysisRow>> {
    if let Some(parent) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let mut file = tokio::fs::File::create(&csv_path)
        .await
        .with_context(|| format!("Failed to create {:?}", csv_path))?;
    file.write_all(report::csv_line(&report::CSV_HEADER).as_bytes())
        .await?;
    file.flush().await?;

    let mut written = Vec::new();
    while let Some(row) = rows.recv().await {
        file.write_all(report::csv_line(&row.csv_fields()).as_bytes())
            .await
            .with_context(|| format!("Failed to write to {:?}", csv_path))?;
        file.flush().await?;
        written.push(row);
    }
    Ok(written)
}
