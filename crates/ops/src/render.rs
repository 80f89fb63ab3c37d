//! Manifest rendering through the `kustomize build` step.

use std::path::{Component, Path, PathBuf};

use tokio::process::Command;
use tokio::time::Instant;

use crate::process::run_captured;
use crate::{Renderer, StepError};

pub struct KustomizeRenderer {
    bin: PathBuf,
}

impl KustomizeRenderer {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Default for KustomizeRenderer {
    fn default() -> Self { Self::new("kustomize") }
}

#[async_trait::async_trait]
impl Renderer for KustomizeRenderer {
    async fn render(&self, work_dir: &Path, path: &Path, deadline: Instant) -> Result<Vec<u8>, StepError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("build").arg(path).current_dir(work_dir);
        let out = run_captured(cmd, "kustomize build", deadline).await?;
        Ok(out.stdout)
    }
}

/// Resolve `spec.path` to a path relative to the bundle root.
///
/// A leading `/` means the bundle root; `.` and empty resolve to `.`.
/// `..` may not climb above the root.
pub fn resolve_build_path(spec_path: &str) -> Result<PathBuf, String> {
    let mut out = PathBuf::new();
    for c in Path::new(spec_path.trim()).components() {
        match c {
            Component::Normal(p) => out.push(p),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(format!("path {:?} escapes the artifact root", spec_path));
                }
            }
            Component::Prefix(_) => return Err(format!("path {:?} is not a relative path", spec_path)),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Ok(out)
}
