use super::{java_classes, TestGenerationTool};
use crate::config::ToolConfig;
use crate::model::TestSuite;
use crate::process::{run_with_timeout, OutputMode, ProcessOutcome};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// An external generator launched from a configured command template.
pub struct CommandTool {
    config: ToolConfig,
    grace: Duration,
    root: PathBuf,
    class_path: Vec<PathBuf>,
    output_directory: Option<PathBuf>,
}

impl CommandTool {
    pub fn new(config: ToolConfig, grace: Duration) -> Self {
        Self {
            config,
            grace,
            root: PathBuf::new(),
            class_path: Vec::new(),
            output_directory: None,
        }
    }

    /// Substitute the template placeholders.
    fn render(&self, target: &str, time_limit: Duration, output_directory: &Path) -> Result<String> {
        let class_path = std::env::join_paths(&self.class_path)
            .context("Class path contains an invalid entry")?;
        Ok(self
            .config
            .command
            .replace("{target}", target)
            .replace("{classpath}", &class_path.to_string_lossy())
            .replace("{timeLimit}", &time_limit.as_secs().to_string())
            .replace("{output}", &output_directory.to_string_lossy())
            .replace("{tests}", &output_directory.join("tests").to_string_lossy())
            .replace("{root}", &self.root.to_string_lossy()))
    }

    fn suite(&self, output_directory: &Path) -> TestSuite {
        let tests_dir = output_directory.join("tests");
        let mut suite = TestSuite::empty(tests_dir.clone());
        suite.dependencies = self.config.dependencies.clone();

        for (name, relative) in java_classes(&tests_dir) {
            let relative = relative.to_string_lossy().replace('\\', "/");
            if glob_match::glob_match(&self.config.test_pattern, &relative) {
                suite.tests.push(name);
            } else {
                suite.test_src_dependencies.push(name);
            }
        }
        suite
    }
}

impl TestGenerationTool for CommandTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn init(&mut self, root: &Path, class_path: &[PathBuf]) -> Result<()> {
        self.root = root.to_path_buf();
        self.class_path = class_path.to_vec();
        Ok(())
    }

    async fn run(&mut self, target: &str, time_limit: Duration, output_directory: &Path) -> Result<()> {
        self.output_directory = Some(output_directory.to_path_buf());
        tokio::fs::create_dir_all(output_directory.join("tests"))
            .await
            .with_context(|| format!("Failed to create {}", output_directory.display()))?;

        let script = self.render(target, time_limit, output_directory)?;
        let mut command = Command::new("sh");
        command.arg("-c").arg(&script).current_dir(output_directory);

        // The tool gets half its budget again before its process group is killed
        let result = run_with_timeout(
            command,
            time_limit + time_limit / 2,
            self.grace,
            OutputMode::File(output_directory.join("tool.log")),
        )
        .await;

        tracing::info!(
            "{} finished for {} in {} ms: {}",
            self.config.name,
            target,
            result.duration_ms,
            result.outcome
        );
        match result.outcome {
            ProcessOutcome::Exited { success: true, .. } | ProcessOutcome::TimedOut => Ok(()),
            ProcessOutcome::Exited { .. } => {
                anyhow::bail!("{} {}", self.config.name, result.outcome)
            }
            ProcessOutcome::SpawnFailed(e) => anyhow::bail!("Failed to start {}: {}", self.config.name, e),
        }
    }

    async fn report(&mut self) -> TestSuite {
        match &self.output_directory {
            Some(output_directory) => self.suite(output_directory),
            None => TestSuite::empty(PathBuf::new()),
        }
    }
}
