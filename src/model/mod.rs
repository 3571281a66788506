//! Value types shared by every stage of the pipeline.
//!
//! All of these are plain data: created once per evaluation step, never
//! mutated afterwards, and persisted as JSON between processes and runs.

pub mod coverage;
pub mod fraction;

pub use coverage::{
    BranchId, ClassCoverageInfo, ClassId, CoverageInfo, Id, InstructionId, LineId,
    MethodCoverageInfo, MethodId, TestSuiteCoverage,
};
pub use fraction::Fraction;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One unit under evaluation: a target class plus its build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benchmark {
    pub name: String,
    pub root: PathBuf,
    #[serde(alias = "build_id")]
    pub build_id: String,
    pub src: PathBuf,
    pub bin: PathBuf,
    pub class_path: Vec<PathBuf>,
    /// Fully-qualified name of the class under test, dot-delimited.
    pub klass: String,
}

impl Benchmark {
    /// Rewrite every embedded path that starts with `from` to start with `to` instead.
    pub fn remap(&self, from: &Path, to: &Path) -> Self {
        Self {
            name: self.name.clone(),
            root: remap_path(&self.root, from, to),
            build_id: self.build_id.clone(),
            src: remap_path(&self.src, from, to),
            bin: remap_path(&self.bin, from, to),
            class_path: self
                .class_path
                .iter()
                .map(|p| remap_path(p, from, to))
                .collect(),
            klass: self.klass.clone(),
        }
    }

    /// Package part of the target class (`com.example` for `com.example.Foo`).
    pub fn package(&self) -> &str {
        self.klass.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }

    /// Simple name of the target class (`Foo` for `com.example.Foo`).
    pub fn simple_name(&self) -> &str {
        self.klass
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.klass)
    }

    /// Slash-delimited internal name, as used in class files and coverage reports.
    pub fn internal_name(&self) -> String {
        self.klass.replace('.', "/")
    }

    /// Path of the compiled target class under `bin`.
    pub fn class_file(&self) -> PathBuf {
        self.bin.join(format!("{}.class", self.internal_name()))
    }
}

/// An external library coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl Dependency {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Dependencies every JUnit-based generated suite needs on its classpath.
    pub fn junit_defaults() -> Vec<Self> {
        vec![
            Self::new("junit", "junit", "4.13.2"),
            Self::new("org.junit.jupiter", "junit-jupiter-api", "5.12.0"),
            Self::new("org.junit.vintage", "junit-vintage-engine", "5.12.0"),
        ]
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// A generated test suite as reported by a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    /// Root directory of the generated test sources.
    pub test_src_path: PathBuf,
    /// Qualified names of the test classes.
    pub tests: Vec<String>,
    /// Qualified names of helper classes compiled alongside every test.
    #[serde(default)]
    pub test_src_dependencies: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl TestSuite {
    /// A suite with no tests rooted at `test_src_path`.
    pub fn empty(test_src_path: impl Into<PathBuf>) -> Self {
        Self {
            test_src_path: test_src_path.into(),
            tests: Vec::new(),
            test_src_dependencies: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn remap(&self, from: &Path, to: &Path) -> Self {
        Self {
            test_src_path: remap_path(&self.test_src_path, from, to),
            ..self.clone()
        }
    }

    /// Source file of a qualified class name under `test_src_path`.
    pub fn source_file(&self, qualified_name: &str) -> PathBuf {
        self.test_src_path
            .join(format!("{}.java", qualified_name.replace('.', "/")))
    }
}

/// Substitute the `from` prefix of `path` with `to`; other paths are returned unchanged.
pub fn remap_path(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
        Ok(rest) => to.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Load a benchmark catalog (a JSON array of benchmarks).
pub fn load_benchmarks(path: &Path) -> Result<Vec<Benchmark>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read benchmark catalog {:?}", path))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse benchmark catalog {:?}", path))
}

/// Read a JSON-serialized value from disk.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
}

/// Write a value as pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let contents = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    std::fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))
}

/// Expand wildcard class-path entries (`lib/*`, `lib/*.jar`) into concrete files.
///
/// Entries without wildcards are kept as-is, even when they do not exist yet
/// (output directories are often created after the class path is built).
pub fn expand_class_path(entries: &[PathBuf]) -> Vec<PathBuf> {
    let mut expanded = Vec::with_capacity(entries.len());
    for entry in entries {
        let pattern = entry.to_string_lossy();
        if !pattern.contains('*') {
            expanded.push(entry.clone());
            continue;
        }
        // Java treats a trailing `*` as "every jar in the directory"
        let pattern = if pattern.ends_with("/*") {
            format!("{}.jar", pattern)
        } else {
            pattern.to_string()
        };
        match glob::glob(&pattern) {
            Ok(paths) => {
                let mut matched: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
                matched.sort();
                expanded.extend(matched);
            }
            Err(e) => {
                tracing::warn!("Invalid class path pattern {}: {}", pattern, e);
            }
        }
    }
    expanded
}
