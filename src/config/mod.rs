use crate::model::Dependency;
use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the pipeline installation directory.
pub const HOME_ENV: &str = "TGA_PIPELINE_HOME";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline installation directory; `TGA_PIPELINE_HOME` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// JVM toolchain settings
    #[serde(default)]
    pub jvm: JvmConfig,

    /// Upper bounds for every external process
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Runner (server side) settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Analysis aggregator settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Dependency resolution settings
    #[serde(default)]
    pub dependencies: DependencyConfig,

    /// Command-line test generation tools
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JvmConfig {
    /// `java` executable
    #[serde(default = "default_java")]
    pub java: String,

    /// `javac` executable
    #[serde(default = "default_javac")]
    pub javac: String,

    /// Extra JVM flags passed when running tool jars (e.g. `--add-opens`)
    #[serde(default)]
    pub jvm_args: Vec<String>,

    /// Extra compiler flags
    #[serde(default = "default_compiler_args")]
    pub compiler_args: Vec<String>,
}

/// Timeouts in seconds unless stated otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_compile_timeout")]
    pub compile: u64,

    /// Single instrumented test execution
    #[serde(default = "default_test_run_timeout")]
    pub test_run: u64,

    #[serde(default = "default_coverage_report_timeout")]
    pub coverage_report: u64,

    #[serde(default = "default_mutation_timeout")]
    pub mutation: u64,

    #[serde(default = "default_junit_timeout")]
    pub junit: u64,

    /// Whole request when downloading an artifact
    #[serde(default = "default_download_timeout")]
    pub download: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect: u64,

    /// Time between SIGTERM and SIGKILL, in milliseconds
    #[serde(default = "default_kill_grace_millis")]
    pub kill_grace_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix to replace in persisted artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remap_from: Option<PathBuf>,

    /// Replacement for `remap_from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remap_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Number of concurrent evaluation workers (clamped to 1..=10)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Class-path entries hidden from the mutation engine
    #[serde(default = "default_mutation_exclusions")]
    pub mutation_classpath_exclusions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Remote Maven repository
    #[serde(default = "default_repository_url")]
    pub repository_url: String,

    /// Local Maven repository (defaults to `~/.m2/repository`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repository: Option<PathBuf>,

    /// Where downloaded artifacts are stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum transitive resolution depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Coordinates resolved to fixed paths without any lookup
    #[serde(default)]
    pub preload: Vec<PreloadEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadEntry {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub paths: Vec<PathBuf>,
}

impl PreloadEntry {
    pub fn dependency(&self) -> Dependency {
        Dependency::new(&self.group_id, &self.artifact_id, &self.version)
    }
}

/// A test generation tool driven through a command template.
///
/// The template may reference `{target}`, `{classpath}`, `{timeLimit}`,
/// `{output}` and `{root}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Tool name, also used as the results directory name
    pub name: String,

    /// Command line template, run through `sh -c`
    pub command: String,

    /// Glob (relative to the tests directory) selecting test classes;
    /// other generated sources are treated as helpers
    #[serde(default = "default_test_pattern")]
    pub test_pattern: String,

    /// Libraries the generated tests need
    #[serde(default = "Dependency::junit_defaults")]
    pub dependencies: Vec<Dependency>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_java() -> String {
    "java".to_string()
}

fn default_javac() -> String {
    "javac".to_string()
}

fn default_compiler_args() -> Vec<String> {
    vec!["-Xlint:none".to_string()]
}

fn default_compile_timeout() -> u64 {
    120
}

fn default_test_run_timeout() -> u64 {
    10
}

fn default_coverage_report_timeout() -> u64 {
    60
}

fn default_mutation_timeout() -> u64 {
    100
}

fn default_junit_timeout() -> u64 {
    100
}

fn default_download_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_kill_grace_millis() -> u64 {
    500
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_workers() -> usize {
    4
}

fn default_mutation_exclusions() -> Vec<String> {
    vec![
        "**/junit-platform*".to_string(),
        "**/junit-jupiter*".to_string(),
    ]
}

fn default_repository_url() -> String {
    "https://repo.maven.apache.org/maven2".to_string()
}

fn default_max_depth() -> usize {
    6
}

fn default_test_pattern() -> String {
    "**/*Test.java".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for JvmConfig {
    fn default() -> Self {
        Self {
            java: default_java(),
            javac: default_javac(),
            jvm_args: Vec::new(),
            compiler_args: default_compiler_args(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            compile: default_compile_timeout(),
            test_run: default_test_run_timeout(),
            coverage_report: default_coverage_report_timeout(),
            mutation: default_mutation_timeout(),
            junit: default_junit_timeout(),
            download: default_download_timeout(),
            connect: default_connect_timeout(),
            kill_grace_millis: default_kill_grace_millis(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            remap_from: None,
            remap_to: None,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            mutation_classpath_exclusions: default_mutation_exclusions(),
        }
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            repository_url: default_repository_url(),
            local_repository: None,
            cache_dir: None,
            max_depth: default_max_depth(),
            preload: Vec::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile)
    }

    pub fn test_run_timeout(&self) -> Duration {
        Duration::from_secs(self.test_run)
    }

    pub fn coverage_report_timeout(&self) -> Duration {
        Duration::from_secs(self.coverage_report)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation)
    }

    pub fn junit_timeout(&self) -> Duration {
        Duration::from_secs(self.junit)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }
}

impl RunnerConfig {
    /// The configured prefix substitution, if both ends are set.
    pub fn remap(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.remap_from, &self.remap_to) {
            (Some(from), Some(to)) => Some((from.clone(), to.clone())),
            _ => None,
        }
    }
}

impl AnalysisConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, 10)
    }

    /// Whether a class-path entry must be hidden from the mutation engine.
    pub fn is_mutation_excluded(&self, entry: &Path) -> bool {
        let entry = entry.to_string_lossy();
        let entry = entry.trim_start_matches('/');
        self.mutation_classpath_exclusions
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, entry))
    }
}

impl DependencyConfig {
    pub fn local_repository(&self) -> PathBuf {
        self.local_repository.clone().unwrap_or_else(|| {
            BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".m2").join("repository"))
                .unwrap_or_else(|| PathBuf::from(".m2/repository"))
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.cache_dir().join("maven"))
                .unwrap_or_else(|| PathBuf::from(".tga-cache/maven"))
        })
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tga-pipeline", "tga-pipeline")
}

impl Config {
    /// Load configuration from file, or use defaults if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(Self::default_config_path);

        let config = if let Some(ref path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config from {:?}", path))?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(Self::default_config_path)
            .context("No config path available")?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(config_path)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Installation directory, from `TGA_PIPELINE_HOME` or the config file.
    pub fn home(&self) -> Result<PathBuf> {
        self.resolve_home(std::env::var_os(HOME_ENV).map(PathBuf::from))
    }

    fn resolve_home(&self, from_env: Option<PathBuf>) -> Result<PathBuf> {
        from_env
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| self.home.clone())
            .with_context(|| {
                format!(
                    "Pipeline home is not set: export {} or set `home` in the config file",
                    HOME_ENV
                )
            })
    }

    /// Path of an auxiliary jar under `<home>/lib`.
    pub fn lib_jar(&self, name: &str) -> Result<PathBuf> {
        Ok(self.home()?.join("lib").join(name))
    }

    pub fn find_tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Default value tests
    // =========================================================================

    #[test]
    fn test_default_timeouts() {
        let config = TimeoutConfig::default();
        assert_eq!(config.compile_timeout(), Duration::from_secs(120));
        assert_eq!(config.test_run_timeout(), Duration::from_secs(10));
        assert_eq!(config.coverage_report_timeout(), Duration::from_secs(60));
        assert_eq!(config.mutation_timeout(), Duration::from_secs(100));
        assert_eq!(config.junit_timeout(), Duration::from_secs(100));
        assert_eq!(config.download_timeout(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_default_runner_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.port, 10000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.remap().is_none());
    }

    #[test]
    fn test_default_jvm_config() {
        let config = JvmConfig::default();
        assert_eq!(config.java, "java");
        assert_eq!(config.javac, "javac");
        assert_eq!(config.compiler_args, vec!["-Xlint:none"]);
    }

    #[test]
    fn test_worker_count_is_clamped() {
        let mut config = AnalysisConfig::default();
        assert_eq!(config.worker_count(), 4);
        config.workers = 0;
        assert_eq!(config.worker_count(), 1);
        config.workers = 64;
        assert_eq!(config.worker_count(), 10);
    }

    #[test]
    fn test_mutation_exclusions() {
        let config = AnalysisConfig::default();
        assert!(config.is_mutation_excluded(Path::new(
            "/m2/org/junit/platform/junit-platform-engine-1.12.0.jar"
        )));
        assert!(config.is_mutation_excluded(Path::new(
            "/m2/org/junit/jupiter/junit-jupiter-api-5.12.0.jar"
        )));
        assert!(!config.is_mutation_excluded(Path::new("/m2/junit/junit/junit-4.13.2.jar")));
    }

    // =========================================================================
    // Home resolution tests
    // =========================================================================

    #[test]
    fn test_home_env_takes_precedence() {
        let config = Config {
            home: Some(PathBuf::from("/from/file")),
            ..Config::default()
        };
        let home = config
            .resolve_home(Some(PathBuf::from("/from/env")))
            .unwrap();
        assert_eq!(home, PathBuf::from("/from/env"));
    }

    #[test]
    fn test_home_falls_back_to_file() {
        let config = Config {
            home: Some(PathBuf::from("/from/file")),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_home(None).unwrap(),
            PathBuf::from("/from/file")
        );
        assert_eq!(
            config.resolve_home(Some(PathBuf::new())).unwrap(),
            PathBuf::from("/from/file")
        );
    }

    #[test]
    fn test_missing_home_is_an_error() {
        let err = Config::default().resolve_home(None).unwrap_err();
        assert!(err.to_string().contains(HOME_ENV));
    }

    // =========================================================================
    // Config parsing tests
    // =========================================================================

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.runner.port, 10000);
        assert_eq!(config.dependencies.max_depth, 6);
        assert!(config.tools.is_empty());
        assert!(config.home.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
home = "/opt/tga"

[timeouts]
compile = 30

[analysis]
workers = 8

[runner]
remap_from = "/var/benchmarks"
remap_to = "/home/user/benchmarks"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.home, Some(PathBuf::from("/opt/tga")));
        assert_eq!(config.timeouts.compile, 30);
        // Defaults should still apply
        assert_eq!(config.timeouts.test_run, 10);
        assert_eq!(config.analysis.worker_count(), 8);
        assert_eq!(
            config.runner.remap(),
            Some((
                PathBuf::from("/var/benchmarks"),
                PathBuf::from("/home/user/benchmarks")
            ))
        );
    }

    #[test]
    fn test_parse_tools() {
        let toml = r#"
[[tools]]
name = "randoop"
command = "randoop.sh --class {target} --cp {classpath} --time {timeLimit} --out {output}"

[[tools]]
name = "custom"
command = "gen {target}"
test_pattern = "**/*_ESTest.java"
dependencies = [{ groupId = "junit", artifactId = "junit", version = "4.13.2" }]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tools.len(), 2);

        let randoop = config.find_tool("randoop").unwrap();
        assert_eq!(randoop.test_pattern, "**/*Test.java");
        assert_eq!(randoop.dependencies, Dependency::junit_defaults());

        let custom = config.find_tool("custom").unwrap();
        assert_eq!(custom.test_pattern, "**/*_ESTest.java");
        assert_eq!(custom.dependencies.len(), 1);

        assert!(config.find_tool("missing").is_none());
    }

    #[test]
    fn test_parse_preload() {
        let toml = r#"
[dependencies]
repository_url = "https://mirror.example.com/maven2"

[[dependencies.preload]]
groupId = "junit"
artifactId = "junit"
version = "4.13.2"
paths = ["/opt/tga/lib/junit-4.13.2.jar", "/opt/tga/lib/hamcrest-core-1.3.jar"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.dependencies.repository_url,
            "https://mirror.example.com/maven2"
        );
        assert_eq!(config.dependencies.preload.len(), 1);
        let entry = &config.dependencies.preload[0];
        assert_eq!(entry.dependency(), Dependency::new("junit", "junit", "4.13.2"));
        assert_eq!(entry.paths.len(), 2);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config {
            home: Some(PathBuf::from("/opt/tga")),
            ..Config::default()
        };
        config.tools.push(ToolConfig {
            name: "gen".to_string(),
            command: "gen {target}".to_string(),
            test_pattern: default_test_pattern(),
            dependencies: Dependency::junit_defaults(),
        });

        let written = config.save(Some(&path)).unwrap();
        assert_eq!(written, path);

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.home, config.home);
        assert_eq!(loaded.tools.len(), 1);
        assert_eq!(loaded.tools[0].dependencies.len(), 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(Some(&temp_dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.timeouts.coverage_report, 60);
    }

    #[test]
    fn test_lib_jar_path() {
        let config = Config {
            home: Some(PathBuf::from("/opt/tga")),
            ..Config::default()
        };
        // Only meaningful when the environment doesn't override home
        if std::env::var_os(HOME_ENV).is_none() {
            assert_eq!(
                config.lib_jar("pitest.jar").unwrap(),
                PathBuf::from("/opt/tga/lib/pitest.jar")
            );
        }
    }
}
