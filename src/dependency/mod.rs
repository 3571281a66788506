//! Maven coordinate resolution.
//!
//! Coordinates are resolved to jar paths at most once per process. Each
//! coordinate has its own cell: concurrent evaluation tasks asking for the
//! same coordinate wait on that cell, while other coordinates resolve in
//! parallel. Every download is bounded by the configured timeouts.

mod pom;

use crate::config::{DependencyConfig, TimeoutConfig};
use crate::model::Dependency;
use pom::Pom;
use reqwest::Client;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, OnceCell};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("artifact not found: {coordinate}")]
    NotFound { coordinate: String },

    #[error("invalid POM for {coordinate}: {message}")]
    Pom { coordinate: String, message: String },
}

/// Resolves dependencies to jars: local repository first, then the download
/// cache, then the remote repository.
pub struct DependencyResolver {
    client: Client,
    repository_url: String,
    local_repository: PathBuf,
    cache_dir: PathBuf,
    max_depth: usize,
    cache: TokioMutex<HashMap<Dependency, Arc<OnceCell<Vec<PathBuf>>>>>,
}

impl DependencyResolver {
    pub fn new(config: &DependencyConfig, timeouts: &TimeoutConfig) -> Result<Self, ResolveError> {
        let cache = config
            .preload
            .iter()
            .map(|entry| (entry.dependency(), Arc::new(OnceCell::from(entry.paths.clone()))))
            .collect();

        let client = Client::builder()
            .connect_timeout(timeouts.connect_timeout())
            .timeout(timeouts.download_timeout())
            .build()?;

        Ok(Self {
            client,
            repository_url: config.repository_url.trim_end_matches('/').to_string(),
            local_repository: config.local_repository(),
            cache_dir: config.cache_dir(),
            max_depth: config.max_depth,
            cache: TokioMutex::new(cache),
        })
    }

    /// Seed the cache with already-known paths for a coordinate.
    pub async fn preload(&self, dependency: Dependency, paths: Vec<PathBuf>) {
        self.cache
            .lock()
            .await
            .insert(dependency, Arc::new(OnceCell::from(paths)));
    }

    /// Jars of `dependency` and its transitive runtime dependencies.
    ///
    /// A failed resolution leaves the coordinate unresolved so a later call retries.
    pub async fn resolve(&self, dependency: &Dependency) -> Result<Vec<PathBuf>, ResolveError> {
        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(dependency.clone()).or_default())
        };

        cell.get_or_try_init(|| async {
            tracing::info!("Resolving dependency {}", dependency);
            let paths = self.resolve_tree(dependency).await?;
            tracing::debug!("Resolved {} to {} jar(s)", dependency, paths.len());
            Ok::<_, ResolveError>(paths)
        })
        .await
        .cloned()
    }

    /// Resolve every dependency, logging (and skipping) the ones that fail.
    pub async fn resolve_all(&self, dependencies: &[Dependency]) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for dependency in dependencies {
            match self.resolve(dependency).await {
                Ok(resolved) => {
                    for path in resolved {
                        if seen.insert(path.clone()) {
                            paths.push(path);
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to resolve {}: {}", dependency, e),
            }
        }
        paths
    }

    async fn resolve_tree(&self, root: &Dependency) -> Result<Vec<PathBuf>, ResolveError> {
        let mut jars = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(root.clone(), 0usize)]);

        while let Some((dependency, depth)) = queue.pop_front() {
            let key = (dependency.group_id.clone(), dependency.artifact_id.clone());
            if !visited.insert(key) {
                continue;
            }
            let is_root = depth == 0;

            let pom = match self.fetch_pom(&dependency).await {
                Ok(pom) => pom,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping transitive dependency {}: {}", dependency, e);
                    continue;
                }
            };

            if pom.as_ref().map(|p| p.is_jar()).unwrap_or(true) {
                match self.fetch(&dependency, "jar").await {
                    Ok(Some(jar)) => jars.push(jar),
                    Ok(None) if is_root => {
                        return Err(ResolveError::NotFound {
                            coordinate: dependency.to_string(),
                        })
                    }
                    Err(e) if is_root => return Err(e),
                    Ok(None) => tracing::warn!("No jar found for {}", dependency),
                    Err(e) => tracing::warn!("Failed to fetch jar for {}: {}", dependency, e),
                }
            }

            if depth >= self.max_depth {
                continue;
            }
            if let Some(mut pom) = pom {
                self.inherit_parent(&mut pom, &dependency).await;
                for child in pom.runtime_dependencies(&dependency) {
                    queue.push_back((child, depth + 1));
                }
            }
        }

        Ok(jars)
    }

    /// Follow `<parent>` one level for properties and managed versions.
    async fn inherit_parent(&self, pom: &mut Pom, dependency: &Dependency) {
        let Some(parent) = pom.parent_coordinate() else {
            return;
        };
        match self.fetch_pom(&parent).await {
            Ok(Some(parent_pom)) => pom.inherit(&parent_pom, &parent),
            Ok(None) => tracing::debug!("Parent {} of {} not found", parent, dependency),
            Err(e) => tracing::debug!("Failed to read parent {} of {}: {}", parent, dependency, e),
        }
    }

    async fn fetch_pom(&self, dependency: &Dependency) -> Result<Option<Pom>, ResolveError> {
        let Some(path) = self.fetch(dependency, "pom").await? else {
            return Ok(None);
        };
        let contents = tokio::fs::read_to_string(&path).await?;
        Pom::parse(&contents)
            .map(Some)
            .map_err(|message| ResolveError::Pom {
                coordinate: dependency.to_string(),
                message,
            })
    }

    /// Locate (or download) one artifact file. `None` when the repository has no such file.
    async fn fetch(
        &self,
        dependency: &Dependency,
        extension: &str,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let relative = artifact_path(dependency, extension);

        let local = self.local_repository.join(&relative);
        if local.exists() {
            return Ok(Some(local));
        }
        let cached = self.cache_dir.join(&relative);
        if cached.exists() {
            return Ok(Some(cached));
        }

        let url = format!(
            "{}/{}",
            self.repository_url,
            relative.to_string_lossy().replace('\\', "/")
        );
        tracing::debug!("Downloading {}", url);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let bytes = response.bytes().await?;

        write_atomically(&cached, &bytes).await?;
        Ok(Some(cached))
    }
}

/// Repository-relative path of an artifact file.
pub fn artifact_path(dependency: &Dependency, extension: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for part in dependency.group_id.split('.') {
        path.push(part);
    }
    path.push(&dependency.artifact_id);
    path.push(&dependency.version);
    path.push(format!(
        "{}-{}.{}",
        dependency.artifact_id, dependency.version, extension
    ));
    path
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = path.with_extension("part");
    tokio::fs::write(&partial, bytes).await?;
    tokio::fs::rename(&partial, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreloadEntry;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn install(repo: &Path, dependency: &Dependency, pom: &str, with_jar: bool) {
        let pom_path = repo.join(artifact_path(dependency, "pom"));
        std::fs::create_dir_all(pom_path.parent().unwrap()).unwrap();
        std::fs::write(&pom_path, pom).unwrap();
        if with_jar {
            std::fs::write(repo.join(artifact_path(dependency, "jar")), "jar").unwrap();
        }
    }

    fn resolver_for(temp_dir: &TempDir, repository_url: &str) -> DependencyResolver {
        let config = DependencyConfig {
            repository_url: repository_url.to_string(),
            local_repository: Some(temp_dir.path().join("m2")),
            cache_dir: Some(temp_dir.path().join("cache")),
            ..DependencyConfig::default()
        };
        let timeouts = TimeoutConfig {
            download: 1,
            connect: 1,
            ..TimeoutConfig::default()
        };
        DependencyResolver::new(&config, &timeouts).unwrap()
    }

    fn resolver(temp_dir: &TempDir) -> DependencyResolver {
        // Nothing listens here; tests must be served from the local repository
        resolver_for(temp_dir, "http://127.0.0.1:1/maven2")
    }

    const LIB_POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <groupId>org.example</groupId>
  <artifactId>lib</artifactId>
  <version>1.0</version>
  <properties>
    <util.version>2.1</util.version>
  </properties>
  <dependencies>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>util</artifactId>
      <version>${util.version}</version>
    </dependency>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>testing</artifactId>
      <version>1.0</version>
      <scope>test</scope>
    </dependency>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>extra</artifactId>
      <version>1.0</version>
      <optional>true</optional>
    </dependency>
  </dependencies>
</project>"#;

    const LEAF_POM: &str = r#"<project>
  <groupId>org.example</groupId>
  <artifactId>util</artifactId>
  <version>2.1</version>
</project>"#;

    #[test]
    fn test_artifact_path_layout() {
        let dependency = Dependency::new("org.junit.jupiter", "junit-jupiter-api", "5.12.0");
        assert_eq!(
            artifact_path(&dependency, "jar"),
            PathBuf::from("org/junit/jupiter/junit-jupiter-api/5.12.0/junit-jupiter-api-5.12.0.jar")
        );
    }

    #[tokio::test]
    async fn test_resolves_transitive_runtime_dependencies() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("m2");
        let lib = Dependency::new("org.example", "lib", "1.0");
        let util = Dependency::new("org.example", "util", "2.1");
        install(&repo, &lib, LIB_POM, true);
        install(&repo, &util, LEAF_POM, true);

        let paths = resolver(&temp_dir).resolve(&lib).await.unwrap();

        assert_eq!(
            paths,
            vec![
                repo.join(artifact_path(&lib, "jar")),
                repo.join(artifact_path(&util, "jar"))
            ]
        );
    }

    #[tokio::test]
    async fn test_parent_manages_transitive_versions() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("m2");
        let parent = Dependency::new("org.example", "parent", "5");
        let lib = Dependency::new("org.example", "lib", "1.0");
        let util = Dependency::new("org.example", "util", "2.1");
        install(
            &repo,
            &parent,
            r#"<project>
  <packaging>pom</packaging>
  <dependencyManagement>
    <dependencies>
      <dependency><groupId>org.example</groupId><artifactId>util</artifactId><version>2.1</version></dependency>
    </dependencies>
  </dependencyManagement>
</project>"#,
            false,
        );
        install(
            &repo,
            &lib,
            r#"<project>
  <parent><groupId>org.example</groupId><artifactId>parent</artifactId><version>5</version></parent>
  <artifactId>lib</artifactId>
  <dependencies>
    <dependency><groupId>org.example</groupId><artifactId>util</artifactId></dependency>
  </dependencies>
</project>"#,
            true,
        );
        install(&repo, &util, LEAF_POM, true);

        let paths = resolver(&temp_dir).resolve(&lib).await.unwrap();

        assert_eq!(
            paths,
            vec![
                repo.join(artifact_path(&lib, "jar")),
                repo.join(artifact_path(&util, "jar"))
            ]
        );
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("m2");
        let util = Dependency::new("org.example", "util", "2.1");
        install(&repo, &util, LEAF_POM, true);

        let resolver = resolver(&temp_dir);
        let first = resolver.resolve(&util).await.unwrap();

        // A second lookup must not touch the repository again
        std::fs::remove_dir_all(&repo).unwrap();
        let second = resolver.resolve(&util).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_of_same_coordinate() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("m2");
        let util = Dependency::new("org.example", "util", "2.1");
        install(&repo, &util, LEAF_POM, true);

        let resolver = std::sync::Arc::new(resolver(&temp_dir));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let util = util.clone();
                tokio::spawn(async move { resolver.resolve(&util).await.unwrap() })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 1);
        }
        assert_eq!(resolver.cache.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_preloaded_coordinates_skip_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let junit = Dependency::new("junit", "junit", "4.13.2");
        let config = DependencyConfig {
            repository_url: "http://127.0.0.1:1/maven2".to_string(),
            local_repository: Some(temp_dir.path().join("m2")),
            cache_dir: Some(temp_dir.path().join("cache")),
            preload: vec![PreloadEntry {
                group_id: "junit".to_string(),
                artifact_id: "junit".to_string(),
                version: "4.13.2".to_string(),
                paths: vec![PathBuf::from("/opt/lib/junit.jar")],
            }],
            ..DependencyConfig::default()
        };
        let resolver = DependencyResolver::new(&config, &TimeoutConfig::default()).unwrap();

        let paths = resolver.resolve(&junit).await.unwrap();
        assert_eq!(paths, vec![PathBuf::from("/opt/lib/junit.jar")]);

        let extra = Dependency::new("org.example", "x", "1");
        resolver
            .preload(extra.clone(), vec![PathBuf::from("/opt/lib/x.jar")])
            .await;
        assert_eq!(
            resolver.resolve(&extra).await.unwrap(),
            vec![PathBuf::from("/opt/lib/x.jar")]
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = Dependency::new("org.example", "missing", "1.0");
        let result = resolver(&temp_dir).resolve(&missing).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stalled_repository_is_bounded_and_does_not_block_others() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("m2");
        let util = Dependency::new("org.example", "util", "2.1");
        install(&repo, &util, LEAF_POM, true);

        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let resolver = Arc::new(resolver_for(&temp_dir, &format!("http://{}/maven2", address)));
        let stalled = {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = resolver
                    .resolve(&Dependency::new("org.example", "remote", "1.0"))
                    .await;
                (result, started.elapsed())
            })
        };

        // Give the remote lookup time to start its request
        tokio::time::sleep(Duration::from_millis(100)).await;
        let local = tokio::time::timeout(Duration::from_millis(500), resolver.resolve(&util))
            .await
            .expect("local resolution waited on the stalled download")
            .unwrap();
        assert_eq!(local, vec![repo.join(artifact_path(&util, "jar"))]);

        let (result, elapsed) = stalled.await.unwrap();
        assert!(matches!(result, Err(ResolveError::Http(_))));
        assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_resolve_all_skips_failures_and_deduplicates() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("m2");
        let lib = Dependency::new("org.example", "lib", "1.0");
        let util = Dependency::new("org.example", "util", "2.1");
        install(&repo, &lib, LIB_POM, true);
        install(&repo, &util, LEAF_POM, true);

        let paths = resolver(&temp_dir)
            .resolve_all(&[
                lib.clone(),
                Dependency::new("org.example", "missing", "1.0"),
                util.clone(),
            ])
            .await;

        assert_eq!(paths.len(), 2);
    }
}
