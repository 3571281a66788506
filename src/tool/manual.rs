use super::{java_classes, TestGenerationTool};
use crate::model::{Dependency, TestSuite};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reports a benchmark's own hand-written tests as if a tool had generated them.
#[derive(Debug, Default)]
pub struct ManualTool {
    tests_root: Option<PathBuf>,
    output_directory: Option<PathBuf>,
}

impl ManualTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the hand-written tests into `<output>/tests` and describe them.
    async fn collect(&self, output_directory: &Path) -> Result<TestSuite> {
        let tests_dir = output_directory.join("tests");
        tokio::fs::create_dir_all(&tests_dir)
            .await
            .with_context(|| format!("Failed to create {}", tests_dir.display()))?;

        if let Some(source) = self.tests_root.clone().filter(|p| p.is_dir()) {
            let destination = tests_dir.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let options = fs_extra::dir::CopyOptions {
                    overwrite: true,
                    skip_exist: false,
                    buffer_size: 64 * 1024,
                    copy_inside: true,
                    content_only: true,
                    depth: 0,
                };
                fs_extra::dir::copy(&source, &destination, &options)
                    .map_err(|e| anyhow::anyhow!("Failed to copy manual tests: {}", e))?;
                Ok(())
            })
            .await??;
        }

        let tests = java_classes(&tests_dir)
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        Ok(TestSuite {
            test_src_path: tests_dir,
            tests,
            test_src_dependencies: Vec::new(),
            dependencies: Dependency::junit_defaults(),
        })
    }
}

impl TestGenerationTool for ManualTool {
    fn name(&self) -> &str {
        "manual"
    }

    async fn init(&mut self, root: &Path, _class_path: &[PathBuf]) -> Result<()> {
        let tests_root = root.join("src").join("test").join("java");
        if tests_root.is_dir() {
            tracing::debug!("Manual tests located at {}", tests_root.display());
            self.tests_root = Some(tests_root);
        } else {
            tracing::warn!("No hand-written tests under {}", root.display());
            self.tests_root = None;
        }
        Ok(())
    }

    async fn run(&mut self, _target: &str, _time_limit: Duration, output_directory: &Path) -> Result<()> {
        self.output_directory = Some(output_directory.to_path_buf());
        Ok(())
    }

    async fn report(&mut self) -> TestSuite {
        let Some(output_directory) = self.output_directory.clone() else {
            return TestSuite::empty(PathBuf::new());
        };
        match self.collect(&output_directory).await {
            Ok(suite) => suite,
            Err(e) => {
                tracing::error!("Failed to collect manual tests: {:#}", e);
                TestSuite::empty(output_directory.join("tests"))
            }
        }
    }
}
