//! One sync attempt: resolve artifact, open workspace, fetch, render, apply.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kube::ResourceExt;
use kustd_apply::ManifestSummary;
use kustd_core::{Artifact, GitRepository, Kustomization, SyncError, SyncOutcome};
use kustd_ops::{resolve_build_path, Applier, Fetcher, Renderer, WorkspaceManager};
use metrics::histogram;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Artifact of `source`, or `ArtifactMissing` when none with an address is published.
pub fn resolve_artifact(source: &GitRepository) -> Result<&Artifact, SyncError> {
    source.ready_artifact().ok_or_else(|| SyncError::ArtifactMissing { source_name: source.name_any() })
}

/// File name of the rendered manifest inside the workspace.
pub fn manifest_file_name(ks: &Kustomization) -> PathBuf {
    PathBuf::from(format!("{}.yaml", ks.name_any()))
}

#[derive(Clone)]
pub struct SyncPipeline {
    workspaces: WorkspaceManager,
    fetcher: Arc<dyn Fetcher>,
    renderer: Arc<dyn Renderer>,
    applier: Arc<dyn Applier>,
}

impl SyncPipeline {
    pub fn new(
        workspaces: WorkspaceManager,
        fetcher: Arc<dyn Fetcher>,
        renderer: Arc<dyn Renderer>,
        applier: Arc<dyn Applier>,
    ) -> Self {
        Self { workspaces, fetcher, renderer, applier }
    }

    /// Run one attempt; every external step is bounded by `deadline`.
    pub async fn sync(&self, ks: &Kustomization, source: &GitRepository, deadline: Instant) -> SyncOutcome {
        self.run(ks, source, deadline).await.into()
    }

    async fn run(&self, ks: &Kustomization, source: &GitRepository, deadline: Instant) -> Result<String, SyncError> {
        let artifact = resolve_artifact(source)?;
        let name = ks.name_any();

        let ws = self
            .workspaces
            .acquire(&name)
            .map_err(|e| SyncError::Storage(format!("tmp dir error: {}", e)))?;
        let root = ws.path();

        self.fetcher.fetch(&artifact.url, root, deadline).await.map_err(|e| {
            warn!(stage = "fetch", url = %artifact.url, error = %e, "artifact fetch failed");
            SyncError::Fetch(e.to_string())
        })?;
        debug!(url = %artifact.url, revision = %artifact.revision, "artifact fetched");

        let manifest_name = manifest_file_name(ks);
        self.render(root, &ks.spec.path, &manifest_name, deadline).await?;

        let prune = Some(ks.spec.prune.as_str()).filter(|p| !p.trim().is_empty());
        let output = self.applier.apply(root, &manifest_name, prune, deadline).await.map_err(|e| {
            warn!(stage = "apply", error = %e, "apply failed");
            SyncError::Apply(e.to_string())
        })?;
        info!(revision = %artifact.revision, prune = ?prune, output = %output, "manifest applied");

        if let Err(e) = ws.close() {
            warn!(error = %e, "workspace cleanup failed");
        }
        Ok(artifact.revision.clone())
    }

    /// Build `spec_path` and write the manifest to `root/manifest_name`.
    async fn render(&self, root: &Path, spec_path: &str, manifest_name: &Path, deadline: Instant) -> Result<(), SyncError> {
        let build_path = resolve_build_path(spec_path).map_err(SyncError::Render)?;
        let manifest = self.renderer.render(root, &build_path, deadline).await.map_err(|e| {
            warn!(stage = "render", path = %build_path.display(), error = %e, "kustomize build failed");
            SyncError::Render(e.to_string())
        })?;
        match ManifestSummary::parse(&manifest) {
            Some(summary) => {
                histogram!("kustd_manifest_objects", summary.objects as f64);
                debug!(%summary, "manifest rendered");
            }
            None => debug!(bytes = manifest.len(), "manifest rendered (not summarized)"),
        }
        let target = root.join(manifest_name);
        tokio::fs::write(&target, &manifest)
            .await
            .map_err(|e| SyncError::Storage(format!("writing {}: {}", target.display(), e)))
    }
}
