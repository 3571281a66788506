use crate::model::Dependency;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The subset of a Maven POM needed to follow runtime dependencies.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Pom {
    group_id: Option<String>,
    version: Option<String>,
    packaging: Option<String>,
    parent: Option<Parent>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    dependencies: Option<DependencyList>,
    dependency_management: Option<DependencyManagement>,
    /// Managed versions taken from the parent POM, keyed by `(groupId, artifactId)`.
    #[serde(skip)]
    inherited: BTreeMap<(String, String), String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Parent {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DependencyManagement {
    dependencies: Option<DependencyList>,
}

#[derive(Debug, Default, Deserialize)]
struct DependencyList {
    #[serde(default)]
    dependency: Vec<PomDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PomDependency {
    group_id: String,
    artifact_id: String,
    version: Option<String>,
    scope: Option<String>,
    optional: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

const SKIPPED_SCOPES: &[&str] = &["test", "provided", "system", "import"];

impl Pom {
    pub(super) fn parse(contents: &str) -> Result<Self, String> {
        quick_xml::de::from_str(contents).map_err(|e| e.to_string())
    }

    /// Whether the artifact ships a jar next to its POM.
    pub(super) fn is_jar(&self) -> bool {
        matches!(
            self.packaging.as_deref().map(str::trim),
            None | Some("jar") | Some("bundle") | Some("")
        )
    }

    /// Coordinate of the `<parent>` POM, when it names one fully.
    pub(super) fn parent_coordinate(&self) -> Option<Dependency> {
        let parent = self.parent.as_ref()?;
        Some(Dependency::new(
            parent.group_id.as_deref()?.trim(),
            parent.artifact_id.as_deref()?.trim(),
            parent.version.as_deref()?.trim(),
        ))
    }

    /// Take over the parent's properties and managed versions. Own entries win.
    pub(super) fn inherit(&mut self, parent: &Pom, parent_coordinate: &Dependency) {
        for (name, value) in &parent.properties {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        for dep in parent.managed_dependencies() {
            let group_id = parent.interpolate(dep.group_id.trim(), parent_coordinate);
            let Some(version) = dep
                .version
                .as_deref()
                .map(|v| parent.interpolate(v.trim(), parent_coordinate))
            else {
                continue;
            };
            if is_concrete(&version) && is_concrete(&group_id) {
                self.inherited
                    .entry((group_id, dep.artifact_id.trim().to_string()))
                    .or_insert(version);
            }
        }
    }

    fn managed_dependencies(&self) -> &[PomDependency] {
        self.dependency_management
            .as_ref()
            .and_then(|m| m.dependencies.as_ref())
            .map(|list| list.dependency.as_slice())
            .unwrap_or_default()
    }

    /// Version from this POM's `dependencyManagement`, then from the parent's.
    fn managed_version(
        &self,
        group_id: &str,
        artifact_id: &str,
        owner: &Dependency,
    ) -> Option<String> {
        self.managed_dependencies()
            .iter()
            .find(|m| {
                m.artifact_id.trim() == artifact_id
                    && self.interpolate(m.group_id.trim(), owner) == group_id
            })
            .and_then(|m| m.version.as_deref())
            .map(|v| self.interpolate(v.trim(), owner))
            .or_else(|| {
                self.inherited
                    .get(&(group_id.to_string(), artifact_id.to_string()))
                    .cloned()
            })
    }

    /// Non-optional compile/runtime dependencies with concrete versions.
    pub(super) fn runtime_dependencies(&self, owner: &Dependency) -> Vec<Dependency> {
        let Some(list) = &self.dependencies else {
            return Vec::new();
        };

        let mut result = Vec::new();
        for dep in &list.dependency {
            let scope = dep.scope.as_deref().map(str::trim).unwrap_or("compile");
            if SKIPPED_SCOPES.contains(&scope) {
                continue;
            }
            if dep.optional.as_deref().map(str::trim) == Some("true") {
                continue;
            }
            if dep.kind.as_deref().is_some_and(|k| k.trim() != "jar") {
                continue;
            }

            let group_id = self.interpolate(dep.group_id.trim(), owner);
            let version = match dep.version.as_deref() {
                Some(v) => Some(self.interpolate(v.trim(), owner)),
                None => self.managed_version(&group_id, dep.artifact_id.trim(), owner),
            };
            match version {
                Some(version) if is_concrete(&version) && is_concrete(&group_id) => {
                    result.push(Dependency::new(group_id, dep.artifact_id.trim(), version));
                }
                _ => tracing::debug!(
                    "Skipping {}:{} of {}: no concrete version",
                    dep.group_id,
                    dep.artifact_id,
                    owner
                ),
            }
        }
        result
    }

    fn project_version(&self, owner: &Dependency) -> String {
        self.version
            .clone()
            .or_else(|| self.parent.as_ref().and_then(|p| p.version.clone()))
            .unwrap_or_else(|| owner.version.clone())
    }

    fn project_group(&self, owner: &Dependency) -> String {
        self.group_id
            .clone()
            .or_else(|| self.parent.as_ref().and_then(|p| p.group_id.clone()))
            .unwrap_or_else(|| owner.group_id.clone())
    }

    fn lookup(&self, name: &str, owner: &Dependency) -> Option<String> {
        match name {
            "project.version" | "pom.version" | "version" => Some(self.project_version(owner)),
            "project.groupId" | "pom.groupId" | "groupId" => Some(self.project_group(owner)),
            "project.parent.version" => self.parent.as_ref().and_then(|p| p.version.clone()),
            _ => self.properties.get(name).map(|v| v.trim().to_string()),
        }
    }

    /// Expand `${...}` references; unknown ones are left in place.
    fn interpolate(&self, value: &str, owner: &Dependency) -> String {
        let mut current = value.to_string();
        // Properties may refer to other properties
        for _ in 0..8 {
            let Some(start) = current.find("${") else {
                break;
            };
            let Some(len) = current[start..].find('}') else {
                break;
            };
            let name = &current[start + 2..start + len];
            let Some(replacement) = self.lookup(name, owner) else {
                break;
            };
            current = format!(
                "{}{}{}",
                &current[..start],
                replacement,
                &current[start + len + 1..]
            );
        }
        current
    }
}

/// Rejects unresolved placeholders and version ranges.
fn is_concrete(value: &str) -> bool {
    !value.is_empty() && !value.contains("${") && !value.starts_with('[') && !value.starts_with('(')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Dependency {
        Dependency::new("org.example", "lib", "3.0")
    }

    #[test]
    fn test_filters_scopes_and_optional() {
        let pom = Pom::parse(
            r#"<project>
  <dependencies>
    <dependency><groupId>a</groupId><artifactId>compile</artifactId><version>1</version></dependency>
    <dependency><groupId>a</groupId><artifactId>runtime</artifactId><version>1</version><scope>runtime</scope></dependency>
    <dependency><groupId>a</groupId><artifactId>test</artifactId><version>1</version><scope>test</scope></dependency>
    <dependency><groupId>a</groupId><artifactId>provided</artifactId><version>1</version><scope>provided</scope></dependency>
    <dependency><groupId>a</groupId><artifactId>optional</artifactId><version>1</version><optional>true</optional></dependency>
    <dependency><groupId>a</groupId><artifactId>bom</artifactId><version>1</version><type>pom</type></dependency>
  </dependencies>
</project>"#,
        )
        .unwrap();

        let names: Vec<String> = pom
            .runtime_dependencies(&owner())
            .into_iter()
            .map(|d| d.artifact_id)
            .collect();
        assert_eq!(names, vec!["compile", "runtime"]);
    }

    #[test]
    fn test_interpolates_project_and_properties() {
        let pom = Pom::parse(
            r#"<project>
  <parent><groupId>org.parent</groupId><version>9</version></parent>
  <properties>
    <core.version>${base.version}.1</core.version>
    <base.version>2</base.version>
  </properties>
  <dependencies>
    <dependency><groupId>${project.groupId}</groupId><artifactId>sibling</artifactId><version>${project.version}</version></dependency>
    <dependency><groupId>org.core</groupId><artifactId>core</artifactId><version>${core.version}</version></dependency>
  </dependencies>
</project>"#,
        )
        .unwrap();

        let deps = pom.runtime_dependencies(&owner());
        assert_eq!(deps[0], Dependency::new("org.parent", "sibling", "9"));
        assert_eq!(deps[1], Dependency::new("org.core", "core", "2.1"));
    }

    #[test]
    fn test_skips_unversioned_and_ranges() {
        let pom = Pom::parse(
            r#"<project>
  <dependencies>
    <dependency><groupId>a</groupId><artifactId>managed</artifactId></dependency>
    <dependency><groupId>a</groupId><artifactId>range</artifactId><version>[1.0,2.0)</version></dependency>
    <dependency><groupId>a</groupId><artifactId>unknown</artifactId><version>${nope}</version></dependency>
  </dependencies>
</project>"#,
        )
        .unwrap();
        assert!(pom.runtime_dependencies(&owner()).is_empty());
    }

    const PARENT_POM: &str = r#"<project>
  <groupId>org.parent</groupId>
  <artifactId>parent</artifactId>
  <version>7</version>
  <properties>
    <json.version>1.4</json.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency><groupId>org.json</groupId><artifactId>json</artifactId><version>${json.version}</version></dependency>
      <dependency><groupId>${project.groupId}</groupId><artifactId>common</artifactId><version>${project.version}</version></dependency>
      <dependency><groupId>org.log</groupId><artifactId>log</artifactId><version>1.0</version></dependency>
    </dependencies>
  </dependencyManagement>
</project>"#;

    #[test]
    fn test_versions_managed_by_the_parent() {
        let mut pom = Pom::parse(
            r#"<project>
  <parent><groupId>org.parent</groupId><artifactId>parent</artifactId><version>7</version></parent>
  <dependencyManagement>
    <dependencies>
      <dependency><groupId>org.log</groupId><artifactId>log</artifactId><version>2.0</version></dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency><groupId>org.json</groupId><artifactId>json</artifactId></dependency>
    <dependency><groupId>org.parent</groupId><artifactId>common</artifactId></dependency>
    <dependency><groupId>org.log</groupId><artifactId>log</artifactId></dependency>
    <dependency><groupId>org.other</groupId><artifactId>unmanaged</artifactId></dependency>
  </dependencies>
</project>"#,
        )
        .unwrap();

        // Nothing is known before the parent is read
        assert_eq!(pom.runtime_dependencies(&owner()).len(), 1);

        let parent_coordinate = pom.parent_coordinate().unwrap();
        assert_eq!(parent_coordinate, Dependency::new("org.parent", "parent", "7"));
        let parent = Pom::parse(PARENT_POM).unwrap();
        pom.inherit(&parent, &parent_coordinate);

        assert_eq!(
            pom.runtime_dependencies(&owner()),
            vec![
                Dependency::new("org.json", "json", "1.4"),
                Dependency::new("org.parent", "common", "7"),
                Dependency::new("org.log", "log", "2.0"),
            ]
        );
    }

    #[test]
    fn test_parent_without_artifact_has_no_coordinate() {
        let pom =
            Pom::parse("<project><parent><groupId>g</groupId><version>1</version></parent></project>")
                .unwrap();
        assert!(pom.parent_coordinate().is_none());
    }

    #[test]
    fn test_packaging() {
        let pom = Pom::parse("<project><packaging>pom</packaging></project>").unwrap();
        assert!(!pom.is_jar());
        let pom = Pom::parse("<project><artifactId>x</artifactId></project>").unwrap();
        assert!(pom.is_jar());
    }

    #[test]
    fn test_invalid_pom() {
        assert!(Pom::parse("<project><dependencies>").is_err());
    }
}
