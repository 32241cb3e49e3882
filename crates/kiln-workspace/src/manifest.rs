//! Package manifest metadata

use kiln_core::{KilnError, ProjectType, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metadata read from the project's dependency manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub path: PathBuf,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub scripts: BTreeMap<String, String>,
    pub dependencies: Vec<String>,
    pub dev_dependencies: Vec<String>,
}

impl Manifest {
    /// Load the manifest at `root`, or `None` when there is none.
    ///
    /// A manifest that exists but does not parse is an error.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        match ProjectType::detect(root) {
            ProjectType::Rust => Self::from_cargo(&root.join("Cargo.toml")).map(Some),
            ProjectType::Node => Self::from_package_json(&root.join("package.json")).map(Some),
            ProjectType::Python => {
                let path = root.join("pyproject.toml");
                if path.exists() {
                    Self::from_pyproject(&path).map(Some)
                } else {
                    Self::from_requirements(&root.join("requirements.txt")).map(Some)
                }
            }
            ProjectType::Go => Self::from_go_mod(&root.join("go.mod")).map(Some),
            ProjectType::Unknown => Ok(None),
        }
    }

    fn from_package_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&content)?;

        let str_field = |key: &str| json.get(key).and_then(|v| v.as_str()).map(String::from);
        let keys = |key: &str| -> Vec<String> {
            json.get(key)
                .and_then(|v| v.as_object())
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default()
        };

        let scripts = json
            .get("scripts")
            .and_then(|v| v.as_object())
            .map(|o| {
                o.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            name: str_field("name"),
            description: str_field("description"),
            version: str_field("version"),
            scripts,
            dependencies: keys("dependencies"),
            dev_dependencies: keys("devDependencies"),
        })
    }

    fn from_cargo(path: &Path) -> Result<Self> {
        let value = read_toml(path)?;
        let package = value.get("package");
        let str_field = |key: &str| {
            package
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        let keys = |key: &str| -> Vec<String> {
            value
                .get(key)
                .or_else(|| value.get("workspace").and_then(|w| w.get(key)))
                .and_then(|v| v.as_table())
                .map(|t| t.keys().cloned().collect())
                .unwrap_or_default()
        };

        let mut scripts = BTreeMap::new();
        for (name, cmd) in [
            ("build", "cargo build"),
            ("test", "cargo test"),
            ("lint", "cargo clippy"),
        ] {
            scripts.insert(name.to_string(), cmd.to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: str_field("name"),
            description: str_field("description"),
            version: str_field("version"),
            scripts,
            dependencies: keys("dependencies"),
            dev_dependencies: keys("dev-dependencies"),
        })
    }

    fn from_pyproject(path: &Path) -> Result<Self> {
        let value = read_toml(path)?;
        let project = value.get("project");
        let str_field = |key: &str| {
            project
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        let dependencies = project
            .and_then(|p| p.get("dependencies"))
            .and_then(|v| v.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| d.as_str())
                    .map(requirement_name)
                    .collect()
            })
            .unwrap_or_default();
        let scripts = project
            .and_then(|p| p.get("scripts"))
            .and_then(|v| v.as_table())
            .map(|t| {
                t.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            name: str_field("name"),
            description: str_field("description"),
            version: str_field("version"),
            scripts,
            dependencies,
            dev_dependencies: Vec::new(),
        })
    }

    fn from_requirements(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let dependencies = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
            .map(requirement_name)
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            dependencies,
            ..Self::default()
        })
    }

    fn from_go_mod(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut name = None;
        let mut dependencies = Vec::new();
        let mut in_require = false;

        for line in content.lines().map(str::trim) {
            if let Some(module) = line.strip_prefix("module ") {
                name = Some(module.trim().to_string());
            } else if line.starts_with("require (") {
                in_require = true;
            } else if in_require && line == ")" {
                in_require = false;
            } else if in_require {
                if let Some(dep) = line.split_whitespace().next() {
                    dependencies.push(dep.to_string());
                }
            } else if let Some(rest) = line.strip_prefix("require ") {
                if let Some(dep) = rest.split_whitespace().next() {
                    dependencies.push(dep.to_string());
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            dependencies,
            ..Self::default()
        })
    }

    /// Runtime and dev dependency names, runtime first
    pub fn all_dependencies(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .chain(self.dev_dependencies.iter())
            .cloned()
            .collect()
    }
}

fn read_toml(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| KilnError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// `requests>=2.0 ; python_version > "3"` -> `requests`
fn requirement_name(requirement: &str) -> String {
    requirement.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .next()
        .unwrap_or(requirement)
        .to_string()
}
