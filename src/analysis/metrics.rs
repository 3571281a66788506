//! Static code metrics computed outside the pipeline, keyed by build id.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    /// Cyclomatic complexity of the target class
    pub complexity: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCatalog {
    entries: HashMap<String, BenchmarkMetrics>,
}

impl MetricsCatalog {
    /// Load `metrics.json`; `None` or a missing file gives an empty catalog.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!("Metrics file {} not found, complexity will be empty", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metrics from {:?}", path))?;
        let entries = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse metrics from {:?}", path))?;
        Ok(Self { entries })
    }

    pub fn complexity(&self, build_id: &str) -> Option<u64> {
        self.entries.get(build_id).map(|m| m.complexity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
