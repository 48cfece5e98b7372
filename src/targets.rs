//! Targets file - named targets and the compiler that turns them into requests
//!
//! ```yaml
//! targets:
//!   - name: lint
//!     run: go vet ./...
//!     image: golang:1.22
//!   - name: test
//!     run: go test ./...
//!     env:
//!       CGO_ENABLED: "0"
//! ```

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::ExecSpec;
use crate::context::Context;
use crate::core::{BuildRequest, GraphCompiler, TargetDescriptor};
use crate::error::CompileError;

pub const FILE_NAME: &str = "fanbuild.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsFile {
    pub targets: Vec<TargetDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDef {
    pub name: String,
    pub run: String,
    pub image: Option<String>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Options applied to every target's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageOptions {
    /// Always pull the image instead of using a cached copy.
    pub force_pull: bool,
}

impl TargetsFile {
    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: TargetsFile = serde_yaml::from_str(content)?;

        if file.targets.is_empty() {
            anyhow::bail!("no targets defined");
        }
        let mut seen = HashSet::new();
        for def in &file.targets {
            if def.name.trim().is_empty() {
                anyhow::bail!("target with empty name");
            }
            if !seen.insert(def.name.as_str()) {
                anyhow::bail!("target {:?} defined more than once", def.name);
            }
        }
        Ok(file)
    }

    /// Target names in file order.
    pub fn names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }

    /// One descriptor per target, in file order, sharing one compiler.
    pub fn descriptors(&self, options: ImageOptions) -> Vec<TargetDescriptor> {
        let compiler = Arc::new(FileCompiler::new(self, options));
        self.targets
            .iter()
            .map(|def| TargetDescriptor::new(def.name.clone(), compiler.clone()))
            .collect()
    }
}

/// Find the targets file: `explicit` if given, else `./fanbuild.yml`, else
/// `<config dir>/fanbuild/fanbuild.yml`.
pub fn discover(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            anyhow::bail!("targets file {} not found", path.display());
        }
        return Ok(path.to_path_buf());
    }

    let mut candidates = vec![PathBuf::from(FILE_NAME)];
    if let Some(config) = dirs::config_dir() {
        candidates.push(config.join("fanbuild").join(FILE_NAME));
    }

    for candidate in &candidates {
        if candidate.is_file() {
            log::debug!("using targets file {}", candidate.display());
            return Ok(candidate.clone());
        }
    }

    let tried: Vec<_> = candidates.iter().map(|p| p.display().to_string()).collect();
    anyhow::bail!("no targets file found (tried {})", tried.join(", "))
}

/// Compiles targets of a [`TargetsFile`] into [`ExecSpec`] requests.
pub struct FileCompiler {
    defs: HashMap<String, TargetDef>,
    options: ImageOptions,
}

impl FileCompiler {
    pub fn new(file: &TargetsFile, options: ImageOptions) -> Self {
        let defs = file
            .targets
            .iter()
            .map(|def| (def.name.clone(), def.clone()))
            .collect();
        Self { defs, options }
    }
}

#[async_trait]
impl GraphCompiler for FileCompiler {
    async fn compile(&self, _ctx: &Context, target: &str) -> Result<BuildRequest, CompileError> {
        let def = self
            .defs
            .get(target)
            .ok_or_else(|| CompileError::UnknownTarget(target.to_string()))?;

        let invalid = |reason: String| CompileError::Invalid {
            target: target.to_string(),
            reason,
        };
        if def.run.trim().is_empty() {
            return Err(invalid("empty run command".to_string()));
        }
        if let Some(dir) = &def.workdir {
            if Path::new(dir).components().any(|c| c == std::path::Component::ParentDir) {
                return Err(invalid(format!("workdir {:?} leaves the workspace", dir)));
            }
        }

        let spec = ExecSpec {
            run: def.run.clone(),
            image: def.image.clone(),
            workdir: def.workdir.clone(),
            env: def.env.clone(),
            force_pull: self.options.force_pull,
        };
        let spec = serde_json::to_value(spec).map_err(|e| invalid(e.to_string()))?;

        Ok(BuildRequest {
            target: target.to_string(),
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
targets:
  - name: lint
    run: go vet ./...
    image: golang:1.22
  - name: test
    run: go test ./...
    env:
      CGO_ENABLED: "0"
  - name: tidy
    run: "  "
"#;

    #[test]
    fn test_parse_keeps_file_order() {
        let file = TargetsFile::parse(SAMPLE).unwrap();
        assert_eq!(file.names(), vec!["lint", "test", "tidy"]);
        assert_eq!(file.targets[1].env["CGO_ENABLED"], "0");
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let dup = "targets:\n  - {name: a, run: x}\n  - {name: a, run: y}\n";
        let err = TargetsFile::parse(dup).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        assert!(TargetsFile::parse("targets: []\n").is_err());
        assert!(TargetsFile::parse("targets:\n  - {name: a}\n").is_err());
    }

    #[tokio::test]
    async fn test_compiler_builds_exec_spec() {
        let file = TargetsFile::parse(SAMPLE).unwrap();
        let compiler = FileCompiler::new(&file, ImageOptions { force_pull: true });
        let ctx = Context::background();

        let request = compiler.compile(&ctx, "lint").await.unwrap();
        let spec: ExecSpec = serde_json::from_value(request.spec).unwrap();
        assert_eq!(spec.run, "go vet ./...");
        assert_eq!(spec.image.as_deref(), Some("golang:1.22"));
        assert!(spec.force_pull);

        assert!(matches!(
            compiler.compile(&ctx, "tidy").await,
            Err(CompileError::Invalid { .. })
        ));
        assert_eq!(
            compiler.compile(&ctx, "fmt").await.unwrap_err(),
            CompileError::UnknownTarget("fmt".into())
        );
    }

    #[tokio::test]
    async fn test_workdir_must_stay_inside() {
        let file = TargetsFile::parse("targets:\n  - {name: a, run: ls, workdir: ../etc}\n").unwrap();
        let compiler = FileCompiler::new(&file, ImageOptions::default());
        let err = compiler.compile(&Context::background(), "a").await.unwrap_err();
        assert_eq!(err.as_label(), "compile_invalid");
    }

    #[test]
    fn test_descriptors_follow_file_order() {
        let file = TargetsFile::parse(SAMPLE).unwrap();
        let names: Vec<_> = file
            .descriptors(ImageOptions::default())
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["lint", "test", "tidy"]);
    }

    #[test]
    fn test_discover_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci.yml");
        assert!(discover(Some(&path)).is_err());

        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(discover(Some(&path)).unwrap(), path);
    }
}
