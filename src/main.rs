mod analysis;
mod compilation;
mod compiler;
mod config;
mod coverage;
mod dependency;
mod junit;
mod model;
mod mutation;
mod process;
mod protocol;
mod runner;
mod tool;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::analysis::{discover_tasks, run_analysis, AnalysisOptions, Analyzer, MetricsCatalog};
use crate::compilation::TestSuiteCompiler;
use crate::compiler::JavacCompiler;
use crate::config::Config;
use crate::coverage::JacocoCoverageProvider;
use crate::dependency::DependencyResolver;
use crate::model::{load_benchmarks, read_json, write_json, Benchmark, TestSuite};
use crate::protocol::{ClientConnection, ToolServer};
use crate::runner::{RunRange, Runner};
use crate::tool::{CommandTool, ManualTool, StubTool, ToolController};

#[derive(Parser)]
#[command(name = "tga")]
#[command(version)]
#[command(about = "Benchmark runner and evaluation pipeline for test generation tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve benchmarks to a connected tool and store what it generates
    Runner {
        /// Port to accept the tool connection on
        #[arg(short, long)]
        port: Option<u16>,

        /// Benchmark catalog (JSON array of benchmarks)
        #[arg(short, long)]
        benchmarks: PathBuf,

        /// Time limit per benchmark in seconds
        #[arg(short, long)]
        timeout: u64,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Runs to perform: `k`, `a..b` or `a..=b`
        #[arg(short, long, default_value = "1")]
        runs: RunRange,

        /// Name prefixed to each run directory
        #[arg(long)]
        run_name: Option<String>,
    },

    /// Connect a test generation tool to a runner
    Tool {
        /// Tool to drive: `stub`, `manual` or a `[[tools]]` entry
        #[arg(short, long)]
        tool: String,

        /// Runner host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Runner port
        #[arg(short, long)]
        port: Option<u16>,

        /// Give up after this many failed connection attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Evaluate every result under a results directory
    Analyze {
        /// Results directory written by the runner
        #[arg(short, long)]
        results: PathBuf,

        /// CSV file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Concurrent evaluations (1-10)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Rewrite benchmark paths starting with FROM to start with TO
        #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
        benchmark_remap: Option<Vec<PathBuf>>,

        /// Rewrite test suite paths starting with FROM to start with TO
        #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
        results_remap: Option<Vec<PathBuf>>,

        /// Catalog of patched benchmarks, enables failure reproduction
        #[arg(long)]
        patched: Option<PathBuf>,

        /// Static metrics (`buildId -> {complexity}`)
        #[arg(long)]
        metrics: Option<PathBuf>,
    },

    /// Compute coverage of a single generated test suite
    Coverage {
        /// Benchmark file
        #[arg(short, long)]
        benchmark: PathBuf,

        /// Test suite file
        #[arg(short, long)]
        test_suite: PathBuf,

        /// Where to write the coverage JSON
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn remap_pair(paths: Option<Vec<PathBuf>>) -> Option<(PathBuf, PathBuf)> {
    match paths?.as_slice() {
        [from, to] => Some((from.clone(), to.clone())),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli.config.clone().or_else(Config::default_config_path);
    tracing::debug!(
        "Config path: {}",
        config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, using defaults)".to_string())
    );

    match cli.command {
        Commands::Runner {
            port,
            benchmarks,
            timeout,
            output,
            runs,
            run_name,
        } => {
            let benchmarks = load_benchmarks(&benchmarks)?;
            tracing::info!("Loaded {} benchmarks", benchmarks.len());

            let runner = Runner {
                benchmarks,
                time_limit: Duration::from_secs(timeout),
                output_directory: output,
                runs,
                run_name,
                remap: config.runner.remap(),
            };

            let port = port.unwrap_or(config.runner.port);
            let server = ToolServer::bind(&config.runner.host, port)
                .await
                .with_context(|| format!("Failed to bind {}:{}", config.runner.host, port))?;
            tracing::info!("Waiting for a tool on {}", server.local_addr()?);

            let mut connection = server.accept().await?;
            let summary = runner.run(&mut connection).await?;
            tracing::info!("Runner finished: {}", summary);
        }

        Commands::Tool {
            tool,
            host,
            port,
            max_attempts,
        } => {
            let port = port.unwrap_or(config.runner.port);
            let connection =
                ClientConnection::connect_with_retry(&host, port, Duration::from_secs(1), max_attempts)
                    .await
                    .with_context(|| format!("Failed to connect to runner at {}:{}", host, port))?;

            let handled = match tool.as_str() {
                "stub" => ToolController::new(connection, StubTool::new()).run().await?,
                "manual" => ToolController::new(connection, ManualTool::new()).run().await?,
                name => {
                    let tool_config = config
                        .find_tool(name)
                        .with_context(|| format!("Unknown tool '{}'", name))?
                        .clone();
                    let tool = CommandTool::new(tool_config, config.timeouts.grace());
                    ToolController::new(connection, tool).run().await?
                }
            };
            tracing::info!("Tool {} handled {} benchmarks", tool, handled);
        }

        Commands::Analyze {
            results,
            output,
            workers,
            benchmark_remap,
            results_remap,
            patched,
            metrics,
        } => {
            let benchmark_remap = remap_pair(benchmark_remap);
            let patched: HashMap<String, Benchmark> = match patched {
                Some(path) => load_benchmarks(&path)?
                    .into_iter()
                    .map(|b| match &benchmark_remap {
                        Some((from, to)) => b.remap(from, to),
                        None => b,
                    })
                    .map(|b| (b.build_id.clone(), b))
                    .collect(),
                None => HashMap::new(),
            };

            let options = AnalysisOptions {
                benchmark_remap,
                results_remap: remap_pair(results_remap),
                patched,
                metrics: MetricsCatalog::load(metrics.as_deref())?,
            };
            let analyzer = Arc::new(Analyzer::from_config(&config, options)?);

            let tasks = discover_tasks(&results);
            if tasks.is_empty() {
                tracing::warn!("No benchmark results found under {}", results.display());
            }
            let workers = workers
                .map(|w| w.clamp(1, 10))
                .unwrap_or_else(|| config.analysis.worker_count());

            run_analysis(analyzer, tasks, workers, &output).await?;
            tracing::info!("Results written to {}", output.display());
        }

        Commands::Coverage {
            benchmark,
            test_suite,
            output,
        } => {
            let benchmark: Benchmark = read_json(&benchmark)?;
            let test_suite: TestSuite = read_json(&test_suite)?;

            let resolver = Arc::new(DependencyResolver::new(&config.dependencies, &config.timeouts)?);
            let compiler = TestSuiteCompiler::new(JavacCompiler::from_config(&config), resolver)?;
            let compilation = compiler.compile(&benchmark, &test_suite).await?;

            let coverage = JacocoCoverageProvider::from_config(&config)?
                .compute_coverage(&benchmark, &test_suite, &compilation)
                .await;
            if let Some(class) = coverage.class(&benchmark.klass) {
                tracing::info!(
                    "{}: lines {}, branches {}",
                    benchmark.klass,
                    class.lines().fraction(),
                    class.branches().fraction()
                );
            }
            write_json(&output, &coverage)?;
        }

        Commands::Config {
            command: ConfigCommands::Init { force },
        } => {
            let path = cli
                .config
                .clone()
                .or_else(Config::default_config_path)
                .context("No config path available")?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
            }
            let path = Config::default().save(Some(&path))?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}
