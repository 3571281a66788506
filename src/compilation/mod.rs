//! Test-by-test compilation of generated suites.

use crate::compiler::{Compiler, JavacCompiler};
use crate::dependency::DependencyResolver;
use crate::model::{expand_class_path, Benchmark, Fraction, TestSuite};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResult {
    pub compiled_dir: PathBuf,
    /// Test name to source path, for every test that compiled.
    pub compilable_tests: BTreeMap<String, PathBuf>,
    pub full_class_path: Vec<PathBuf>,
    pub compilation_rate: Fraction,
}

impl CompilationResult {
    pub fn compiled_tests(&self) -> impl Iterator<Item = &str> {
        self.compilable_tests.keys().map(String::as_str)
    }
}

/// Compiles each test of a suite on its own so one broken test can't sink the rest.
pub struct TestSuiteCompiler<C = JavacCompiler> {
    compiler: C,
    resolver: Arc<DependencyResolver>,
    temp_root: TempDir,
    counter: AtomicUsize,
}

impl<C: Compiler> TestSuiteCompiler<C> {
    pub fn new(compiler: C, resolver: Arc<DependencyResolver>) -> Result<Self> {
        let temp_root = TempDir::with_prefix("tga-runner-")
            .context("Failed to create compilation temp directory")?;
        Ok(Self {
            compiler,
            resolver,
            temp_root,
            counter: AtomicUsize::new(0),
        })
    }

    /// Root under which every per-task output directory is created.
    pub fn temp_root(&self) -> &Path {
        self.temp_root.path()
    }

    /// A fresh output directory that no other task will use.
    fn fresh_dir(&self) -> Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let dir = self.temp_root.path().join(format!("compiled-{}", n));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    pub async fn compile(
        &self,
        benchmark: &Benchmark,
        test_suite: &TestSuite,
    ) -> Result<CompilationResult> {
        let compiled_dir = self.fresh_dir()?;
        tracing::debug!("Compiling tests for {} into {}", benchmark.build_id, compiled_dir.display());

        let helpers: Vec<PathBuf> = test_suite
            .test_src_dependencies
            .iter()
            .map(|name| test_suite.source_file(name))
            .collect();

        let mut class_path = vec![benchmark.bin.clone()];
        class_path.extend(expand_class_path(&benchmark.class_path));
        class_path.push(compiled_dir.clone());
        class_path.extend(self.resolver.resolve_all(&test_suite.dependencies).await);

        let mut compilable_tests = BTreeMap::new();
        for name in &test_suite.tests {
            let source = test_suite.source_file(name);
            tracing::debug!("Attempting to compile test {}", name);

            let mut sources = vec![source.clone()];
            sources.extend(helpers.iter().cloned());

            match self
                .compiler
                .compile(&class_path, &sources, &compiled_dir)
                .await
            {
                Ok(classes) => {
                    tracing::debug!("Compiled {} ({} classes in output)", name, classes.len());
                    compilable_tests.insert(name.clone(), source);
                }
                Err(e) => tracing::warn!("Test {} does not compile: {}", name, e),
            }
        }

        let compilation_rate =
            Fraction::new(compilable_tests.len() as u64, test_suite.tests.len() as u64);
        tracing::info!(
            "{}: {} of {} tests compiled, compilation rate {:.2}%",
            benchmark.build_id,
            compilable_tests.len(),
            test_suite.tests.len(),
            compilation_rate.percent()
        );

        Ok(CompilationResult {
            compiled_dir,
            compilable_tests,
            full_class_path: class_path,
            compilation_rate,
        })
    }
}
