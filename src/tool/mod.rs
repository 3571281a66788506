//! Test generation tools and the controller that drives them.

pub mod command;
pub mod controller;
pub mod manual;
pub mod stub;

pub use command::CommandTool;
pub use controller::ToolController;
pub use manual::ManualTool;
pub use stub::StubTool;

use crate::model::TestSuite;
use anyhow::Result;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contract every test generation tool adapter satisfies.
///
/// `run` is driven on a thread of its own and may be cancelled (its future
/// dropped) when it overstays its budget; `report` is still called afterwards
/// and should return whatever exists.
pub trait TestGenerationTool: Send {
    fn name(&self) -> &str;

    fn init(
        &mut self,
        root: &Path,
        class_path: &[PathBuf],
    ) -> impl Future<Output = Result<()>> + Send;

    fn run(
        &mut self,
        target: &str,
        time_limit: Duration,
        output_directory: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    fn report(&mut self) -> impl Future<Output = TestSuite> + Send;
}

/// Qualified class names of every `.java` file below `root`, sorted.
pub fn java_classes(root: &Path) -> Vec<(String, PathBuf)> {
    let mut classes: Vec<(String, PathBuf)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "java"))
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?.to_path_buf();
            let name = relative
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(".");
            Some((name, relative))
        })
        .collect();
    classes.sort();
    classes
}
