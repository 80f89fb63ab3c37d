#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::{write::GzEncoder, Compression};
use kustd_controller::{ControllerConfig, Reconciler, SyncPipeline};
use kustd_core::{
    Artifact, GitRepository, GitRepositorySpec, GitRepositoryStatus, Kustomization, KustomizationSpec, ObjectKey,
    SourceReference,
};
use kustd_kubehub::{ClusterError, ClusterState};
use kustd_ops::{unpack_stripped, Applier, Fetcher, Renderer, StepError, WorkspaceManager};
use tokio::time::Instant;

pub const NS: &str = "apps";
pub const ARTIFACT_URL: &str = "https://x/artifact.tar.gz";

pub fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, body.as_bytes()).expect("append");
    }
    builder.into_inner().expect("tar").finish().expect("gz")
}

pub fn podinfo_bundle() -> Vec<u8> {
    tarball(&[
        ("podinfo-6f1a/kustomization.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: podinfo\n"),
        ("podinfo-6f1a/deploy/kustomization.yaml", "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: podinfo\n"),
    ])
}

pub fn kustomization(name: &str, path: &str, prune: &str) -> Kustomization {
    let mut ks = Kustomization::new(
        name,
        KustomizationSpec {
            source_ref: SourceReference { name: "podinfo".into() },
            path: path.into(),
            prune: prune.into(),
            interval: "5m".into(),
        },
    );
    ks.metadata.namespace = Some(NS.into());
    ks.metadata.generation = Some(1);
    ks.metadata.resource_version = Some("1".into());
    ks
}

pub fn source(url: Option<&str>) -> GitRepository {
    let mut repo = GitRepository::new("podinfo", GitRepositorySpec { url: "https://github.com/x/podinfo".into(), interval: None });
    repo.metadata.namespace = Some(NS.into());
    repo.status = Some(GitRepositoryStatus {
        artifact: url.map(|u| Artifact { url: u.into(), revision: "main/6f1a".into(), ..Default::default() }),
        ..Default::default()
    });
    repo
}

pub fn deadline() -> Instant { Instant::now() + Duration::from_secs(10) }

/// Unpacks an in-memory bundle the way the HTTP fetcher would.
pub struct BundleFetcher {
    pub bundle: Vec<u8>,
    pub fail: Option<String>,
    pub urls: Mutex<Vec<String>>,
}

impl BundleFetcher {
    pub fn new(bundle: Vec<u8>) -> Self { Self { bundle, fail: None, urls: Mutex::new(Vec::new()) } }

    pub fn failing(msg: &str) -> Self { Self { bundle: Vec::new(), fail: Some(msg.into()), urls: Mutex::new(Vec::new()) } }
}

#[async_trait::async_trait]
impl Fetcher for BundleFetcher {
    async fn fetch(&self, url: &str, dest: &Path, deadline: Instant) -> Result<(), StepError> {
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(msg) = &self.fail {
            return Err(StepError::Http(msg.clone()));
        }
        unpack_stripped(&self.bundle[..], dest, deadline.into_std()).map(|_| ())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RenderMode {
    /// Emit `<path>/kustomization.yaml` as the rendered manifest.
    Echo,
    Fail,
    /// Block until the deadline passes.
    Hang,
}

pub struct FakeRenderer {
    pub mode: RenderMode,
    pub calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeRenderer {
    pub fn new(mode: RenderMode) -> Self { Self { mode, calls: Mutex::new(Vec::new()) } }
}

#[async_trait::async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, work_dir: &Path, path: &Path, deadline: Instant) -> Result<Vec<u8>, StepError> {
        self.calls.lock().unwrap().push((work_dir.to_path_buf(), path.to_path_buf()));
        match self.mode {
            RenderMode::Echo => std::fs::read(work_dir.join(path).join("kustomization.yaml")).map_err(|e| StepError::Failed {
                program: "kustomize build".into(),
                status: "exit status: 1".into(),
                output: format!("Error: unable to find kustomization.yaml: {}", e),
            }),
            RenderMode::Fail => Err(StepError::Failed {
                program: "kustomize build".into(),
                status: "exit status: 1".into(),
                output: "Error: accumulating resources: missing.yaml: no such file".into(),
            }),
            RenderMode::Hang => {
                let _ = tokio::time::timeout_at(deadline, std::future::pending::<()>()).await;
                Err(StepError::DeadlineExceeded)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCall {
    pub manifest: PathBuf,
    pub prune: Option<String>,
    pub content: String,
}

pub struct RecordingApplier {
    pub fail: bool,
    pub calls: Mutex<Vec<ApplyCall>>,
}

impl RecordingApplier {
    pub fn new() -> Self { Self { fail: false, calls: Mutex::new(Vec::new()) } }

    pub fn failing() -> Self { Self { fail: true, calls: Mutex::new(Vec::new()) } }

    pub fn calls(&self) -> Vec<ApplyCall> { self.calls.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl Applier for RecordingApplier {
    async fn apply(&self, work_dir: &Path, manifest: &Path, prune: Option<&str>, _deadline: Instant) -> Result<String, StepError> {
        let content = std::fs::read_to_string(work_dir.join(manifest)).unwrap_or_default();
        self.calls.lock().unwrap().push(ApplyCall { manifest: manifest.to_path_buf(), prune: prune.map(String::from), content });
        if self.fail {
            return Err(StepError::Failed {
                program: "kubectl apply".into(),
                status: "exit status: 1".into(),
                output: "error: unable to recognize \"podinfo.yaml\": no matches for kind".into(),
            });
        }
        Ok("configmap/podinfo configured".into())
    }
}

pub struct Steps {
    pub fetcher: Arc<BundleFetcher>,
    pub renderer: Arc<FakeRenderer>,
    pub applier: Arc<RecordingApplier>,
}

impl Steps {
    pub fn happy() -> Self {
        Self {
            fetcher: Arc::new(BundleFetcher::new(podinfo_bundle())),
            renderer: Arc::new(FakeRenderer::new(RenderMode::Echo)),
            applier: Arc::new(RecordingApplier::new()),
        }
    }

    pub fn pipeline(&self, root: &Path) -> SyncPipeline {
        SyncPipeline::new(WorkspaceManager::new(root), self.fetcher.clone(), self.renderer.clone(), self.applier.clone())
    }
}

/// In-memory cluster with optimistic status writes.
#[derive(Default)]
pub struct FakeCluster {
    pub kustomizations: Mutex<HashMap<ObjectKey, Kustomization>>,
    pub sources: Mutex<HashMap<ObjectKey, GitRepository>>,
    pub status_writes: Mutex<Vec<Kustomization>>,
    pub fail_status_write: Mutex<bool>,
}

impl FakeCluster {
    pub fn with(ks: Kustomization, source: Option<GitRepository>) -> Arc<Self> {
        let c = Self::default();
        let key = ObjectKey::of(&ks).expect("key");
        c.kustomizations.lock().unwrap().insert(key, ks);
        if let Some(s) = source {
            c.sources.lock().unwrap().insert(ObjectKey::of(&s).expect("key"), s);
        }
        Arc::new(c)
    }

    pub fn writes(&self) -> Vec<Kustomization> { self.status_writes.lock().unwrap().clone() }

    pub fn stored(&self, key: &ObjectKey) -> Option<Kustomization> { self.kustomizations.lock().unwrap().get(key).cloned() }
}

#[async_trait::async_trait]
impl ClusterState for FakeCluster {
    async fn get_kustomization(&self, key: &ObjectKey) -> Result<Option<Kustomization>, ClusterError> {
        Ok(self.kustomizations.lock().unwrap().get(key).cloned())
    }

    async fn get_source(&self, namespace: &str, name: &str) -> Result<GitRepository, ClusterError> {
        let key = ObjectKey::new(namespace, name);
        self.sources
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(ClusterError::NotFound { kind: "GitRepository", key })
    }

    async fn update_status(&self, obj: &Kustomization) -> Result<(), ClusterError> {
        let key = ObjectKey::of(obj).ok_or(ClusterError::MissingKey)?;
        self.status_writes.lock().unwrap().push(obj.clone());
        if *self.fail_status_write.lock().unwrap() {
            return Err(ClusterError::Conflict(key));
        }
        let mut store = self.kustomizations.lock().unwrap();
        let Some(current) = store.get_mut(&key) else {
            return Err(ClusterError::NotFound { kind: "Kustomization", key });
        };
        if current.metadata.resource_version != obj.metadata.resource_version {
            return Err(ClusterError::Conflict(key));
        }
        current.status = obj.status.clone();
        let rv: u64 = current.metadata.resource_version.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
        current.metadata.resource_version = Some((rv + 1).to_string());
        Ok(())
    }
}

pub fn config() -> ControllerConfig {
    ControllerConfig {
        sync_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_secs(7),
        default_interval: Duration::from_secs(120),
        ..Default::default()
    }
}

pub fn reconciler(cluster: Arc<FakeCluster>, steps: &Steps, root: &Path) -> Reconciler {
    Reconciler::new(cluster, steps.pipeline(root), &config())
}
