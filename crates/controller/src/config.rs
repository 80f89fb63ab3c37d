use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings of the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Watch scope; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Number of reconcile workers.
    pub concurrency: usize,
    /// Deadline shared by all external steps of one attempt.
    pub sync_timeout: Duration,
    /// Requeue delay after a loop-level error (missing source, status write).
    pub retry_interval: Duration,
    /// Used when `spec.interval` cannot be parsed.
    pub default_interval: Duration,
    /// Parent directory of per-attempt workspaces.
    pub workspace_root: PathBuf,
    pub kustomize_bin: PathBuf,
    pub kubectl_bin: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 4,
            sync_timeout: Duration::from_secs(15),
            retry_interval: Duration::from_secs(10),
            default_interval: Duration::from_secs(300),
            workspace_root: std::env::temp_dir(),
            kustomize_bin: PathBuf::from("kustomize"),
            kubectl_bin: PathBuf::from("kubectl"),
        }
    }
}
