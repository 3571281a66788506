use super::TestGenerationTool;
use crate::model::TestSuite;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Generates nothing; useful to exercise the pipeline end to end.
#[derive(Debug, Default)]
pub struct StubTool {
    tests_dir: PathBuf,
}

impl StubTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestGenerationTool for StubTool {
    fn name(&self) -> &str {
        "stub"
    }

    async fn init(&mut self, root: &Path, class_path: &[PathBuf]) -> Result<()> {
        tracing::debug!(
            "Initialized stub with {}, class path {:?}",
            root.display(),
            class_path
        );
        Ok(())
    }

    async fn run(&mut self, target: &str, time_limit: Duration, output_directory: &Path) -> Result<()> {
        tracing::debug!(
            "Stub run for {} (time limit {:?}) into {}",
            target,
            time_limit,
            output_directory.display()
        );
        self.tests_dir = output_directory.join("tests");
        tokio::fs::create_dir_all(&self.tests_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.tests_dir.display()))
    }

    async fn report(&mut self) -> TestSuite {
        TestSuite::empty(self.tests_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stub_creates_tests_dir_and_reports_empty_suite() {
        let temp_dir = TempDir::new().unwrap();
        let mut tool = StubTool::new();

        tool.init(temp_dir.path(), &[]).await.unwrap();
        tool.run("com.example.Foo", Duration::from_secs(1), temp_dir.path())
            .await
            .unwrap();
        let suite = tool.report().await;

        assert!(temp_dir.path().join("tests").is_dir());
        assert_eq!(suite.test_src_path, temp_dir.path().join("tests"));
        assert!(suite.tests.is_empty());
        assert!(suite.dependencies.is_empty());
    }
}
