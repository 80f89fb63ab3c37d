//! kustd kubehub: cluster access for the reconciler and list+watch wiring.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client,
};
use kustd_core::{GitRepository, Kustomization, ObjectKey, SYNC_AT_ANNOTATION};
use tracing::debug;

pub mod watch;

pub use watch::{start_watcher, ChangeFilter, WatchEvent};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig or in-cluster env")
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },
    #[error("conflicting update of {0}")]
    Conflict(ObjectKey),
    #[error("object has no name or namespace")]
    MissingKey,
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool { matches!(self, ClusterError::Conflict(_)) }
}

fn is_status(e: &kube::Error, code: u16) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == code)
}

/// Reads and writes the reconciler needs from the cluster.
#[async_trait::async_trait]
pub trait ClusterState: Send + Sync {
    /// `Ok(None)` when the object no longer exists.
    async fn get_kustomization(&self, key: &ObjectKey) -> Result<Option<Kustomization>, ClusterError>;

    async fn get_source(&self, namespace: &str, name: &str) -> Result<GitRepository, ClusterError>;

    /// Replace the status subresource. The object's `resourceVersion` guards
    /// the write; a stale version yields `ClusterError::Conflict`.
    async fn update_status(&self, obj: &Kustomization) -> Result<(), ClusterError>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl ClusterState for KubeCluster {
    async fn get_kustomization(&self, key: &ObjectKey) -> Result<Option<Kustomization>, ClusterError> {
        let api: Api<Kustomization> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn get_source(&self, namespace: &str, name: &str) -> Result<GitRepository, ClusterError> {
        let api: Api<GitRepository> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(repo) => Ok(repo),
            Err(e) if is_status(&e, 404) => Err(ClusterError::NotFound { kind: "GitRepository", key: ObjectKey::new(namespace, name) }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(&self, obj: &Kustomization) -> Result<(), ClusterError> {
        let key = ObjectKey::of(obj).ok_or(ClusterError::MissingKey)?;
        let api: Api<Kustomization> = Api::namespaced(self.client.clone(), &key.namespace);
        let data = serde_json::to_vec(obj)?;
        match api.replace_status(&key.name, &PostParams::default(), data).await {
            Ok(updated) => {
                debug!(kustomization = %key, rv = ?updated.metadata.resource_version, "status replaced");
                Ok(())
            }
            Err(e) if is_status(&e, 409) => Err(ClusterError::Conflict(key)),
            Err(e) if is_status(&e, 404) => Err(ClusterError::NotFound { kind: "Kustomization", key }),
            Err(e) => Err(e.into()),
        }
    }
}

/// List Kustomizations in `namespace`, or across all namespaces.
pub async fn list_kustomizations(client: Client, namespace: Option<&str>) -> Result<Vec<Kustomization>> {
    let api: Api<Kustomization> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let mut items = api.list(&ListParams::default()).await.context("listing kustomizations")?.items;
    items.sort_by_key(|k| ObjectKey::of(k));
    Ok(items)
}

/// Request an immediate sync by setting the sync-at annotation to `token`.
pub async fn request_sync(client: Client, key: &ObjectKey, token: &str) -> Result<()> {
    let api: Api<Kustomization> = Api::namespaced(client, &key.namespace);
    let patch = serde_json::json!({
        "metadata": { "annotations": { SYNC_AT_ANNOTATION: token } }
    });
    api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .with_context(|| format!("annotating kustomization {}", key))?;
    Ok(())
}
