//! Java source compilation.

use crate::config::Config;
use crate::process::{run_with_timeout, OutputMode, ProcessOutcome};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("compilation failed:\n{output}")]
    Failed { output: String },

    #[error("compilation timed out")]
    TimedOut,

    #[error("compiler unavailable: {0}")]
    Toolchain(String),
}

/// Compiles a batch of sources into an output directory.
///
/// Repeated calls against the same `output_dir` accumulate classes, so callers
/// can compile unit by unit and let later units see earlier output.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        class_path: &[PathBuf],
        sources: &[PathBuf],
        output_dir: &Path,
    ) -> impl Future<Output = Result<Vec<PathBuf>, CompilationError>> + Send;
}

/// `javac` run as a subprocess.
#[derive(Debug, Clone)]
pub struct JavacCompiler {
    javac: String,
    args: Vec<String>,
    timeout: Duration,
    grace: Duration,
}

impl JavacCompiler {
    pub fn new(javac: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            javac: javac.into(),
            args,
            timeout,
            grace: Duration::from_millis(500),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            javac: config.jvm.javac.clone(),
            args: config.jvm.compiler_args.clone(),
            timeout: config.timeouts.compile_timeout(),
            grace: config.timeouts.grace(),
        }
    }
}

impl Compiler for JavacCompiler {
    async fn compile(
        &self,
        class_path: &[PathBuf],
        sources: &[PathBuf],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, CompilationError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            CompilationError::Toolchain(format!("cannot create {}: {}", output_dir.display(), e))
        })?;
        let class_path = std::env::join_paths(class_path)
            .map_err(|e| CompilationError::Toolchain(format!("invalid class path: {}", e)))?;

        let mut command = Command::new(&self.javac);
        command
            .arg("-cp")
            .arg(class_path)
            .arg("-d")
            .arg(output_dir)
            .args(&self.args)
            .args(sources);

        let result = run_with_timeout(command, self.timeout, self.grace, OutputMode::Capture).await;
        match result.outcome {
            ProcessOutcome::Exited { success: true, .. } => Ok(class_files(output_dir)),
            ProcessOutcome::Exited { .. } => {
                tracing::error!(
                    "Compilation failed. Sources:\n{}",
                    sources
                        .iter()
                        .map(|s| s.display().to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                );
                tracing::error!("{}", result.output);
                Err(CompilationError::Failed {
                    output: result.output,
                })
            }
            ProcessOutcome::TimedOut => Err(CompilationError::TimedOut),
            ProcessOutcome::SpawnFailed(e) => Err(CompilationError::Toolchain(e)),
        }
    }
}

/// Every `.class` file below `dir`.
pub fn class_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "class"))
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_sources_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        // A toolchain that does not exist proves nothing was spawned
        let compiler = JavacCompiler::new("/no/such/javac", Vec::new(), Duration::from_secs(5));

        let result = compiler
            .compile(&[], &[], &temp_dir.path().join("out"))
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let compiler = JavacCompiler::new("/no/such/javac", Vec::new(), Duration::from_secs(5));

        let result = compiler
            .compile(
                &[],
                &[temp_dir.path().join("Foo.java")],
                &temp_dir.path().join("out"),
            )
            .await;
        assert!(matches!(result, Err(CompilationError::Toolchain(_))));
    }

    #[tokio::test]
    async fn test_failing_toolchain_reports_output() {
        let temp_dir = TempDir::new().unwrap();
        // `false` ignores its arguments and exits 1
        let compiler = JavacCompiler::new("false", Vec::new(), Duration::from_secs(5));

        let result = compiler
            .compile(
                &[],
                &[temp_dir.path().join("Foo.java")],
                &temp_dir.path().join("out"),
            )
            .await;
        assert!(matches!(result, Err(CompilationError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_successful_toolchain_lists_class_files() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        std::fs::create_dir_all(out.join("com/example")).unwrap();
        std::fs::write(out.join("com/example/Foo.class"), "").unwrap();
        std::fs::write(out.join("com/example/notes.txt"), "").unwrap();

        let compiler = JavacCompiler::new("true", Vec::new(), Duration::from_secs(5));
        let result = compiler
            .compile(&[], &[temp_dir.path().join("Foo.java")], &out)
            .await
            .unwrap();
        assert_eq!(result, vec![out.join("com/example/Foo.class")]);
    }
}
