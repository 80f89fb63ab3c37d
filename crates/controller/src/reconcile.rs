//! Per-key reconcile: load, sync under a deadline, persist status, requeue.

use std::sync::Arc;
use std::time::Duration;

use kustd_core::{parse_interval, status, Kustomization, ObjectKey};
use kustd_kubehub::{ClusterError, ClusterState};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::sync::SyncPipeline;

/// What the queue should do with a key after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the given delay.
    Requeue(Duration),
    /// Object is gone; nothing more to do until it reappears.
    Forget,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("loading kustomization {key}: {source}")]
    LoadFailed {
        key: ObjectKey,
        #[source]
        source: ClusterError,
    },
    #[error("source {source_key} for {key} not available: {source}")]
    DependencyNotFound {
        key: ObjectKey,
        source_key: ObjectKey,
        #[source]
        source: ClusterError,
    },
    #[error("unable to update status of {key}: {source}")]
    StatusWriteFailed {
        key: ObjectKey,
        #[source]
        source: ClusterError,
    },
}

impl ReconcileError {
    pub fn key(&self) -> &ObjectKey {
        match self {
            ReconcileError::LoadFailed { key, .. }
            | ReconcileError::DependencyNotFound { key, .. }
            | ReconcileError::StatusWriteFailed { key, .. } => key,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ReconcileError::LoadFailed { .. } => "load_failed",
            ReconcileError::DependencyNotFound { .. } => "dependency_not_found",
            ReconcileError::StatusWriteFailed { .. } => "status_write_failed",
        }
    }
}

pub struct Reconciler {
    cluster: Arc<dyn ClusterState>,
    pipeline: SyncPipeline,
    sync_timeout: Duration,
    retry_interval: Duration,
    default_interval: Duration,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterState>, pipeline: SyncPipeline, config: &ControllerConfig) -> Self {
        Self {
            cluster,
            pipeline,
            sync_timeout: config.sync_timeout,
            retry_interval: config.retry_interval,
            default_interval: config.default_interval,
        }
    }

    /// Declared interval, or the configured default when it does not parse.
    pub fn interval_of(&self, ks: &Kustomization) -> Duration {
        match parse_interval(&ks.spec.interval) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, default = ?self.default_interval, "invalid spec.interval; using default");
                self.default_interval
            }
        }
    }

    /// Delay before retrying a key whose reconcile returned an error.
    pub fn error_policy(&self, err: &ReconcileError) -> Duration {
        counter!("kustd_reconcile_errors_total", 1u64, "kind" => err.label());
        self.retry_interval
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let ks = match self.cluster.get_kustomization(key).await {
            Ok(Some(ks)) => ks,
            Ok(None) => {
                debug!(kustomization = %key, "kustomization gone; nothing to reconcile");
                return Ok(Action::Forget);
            }
            Err(source) => return Err(ReconcileError::LoadFailed { key: key.clone(), source }),
        };

        let source_key = ObjectKey::new(key.namespace.clone(), ks.spec.source_ref.name.clone());
        let source = match self.cluster.get_source(&source_key.namespace, &source_key.name).await {
            Ok(s) => s,
            Err(source) => {
                error!(kustomization = %key, gitrepository = %source_key, error = %source, "GitRepository not found");
                return Err(ReconcileError::DependencyNotFound { key: key.clone(), source_key, source });
            }
        };

        let interval = self.interval_of(&ks);
        let attempt = Uuid::new_v4();
        let span = info_span!("sync", kustomization = %key, %attempt);

        // the attempt works on its own copy; only the computed status flows back
        let working = ks.clone();
        let deadline = Instant::now() + self.sync_timeout;
        let t0 = std::time::Instant::now();
        let outcome = self.pipeline.sync(&working, &source, deadline).instrument(span).await;
        histogram!("kustd_sync_duration_ms", t0.elapsed().as_secs_f64() * 1000.0);

        match &outcome {
            kustd_core::SyncOutcome::Succeeded { .. } => counter!("kustd_reconcile_total", 1u64, "result" => "success"),
            kustd_core::SyncOutcome::Failed(e) => {
                counter!("kustd_reconcile_total", 1u64, "result" => "failure");
                counter!("kustd_sync_failures_total", 1u64, "reason" => e.reason());
                error!(kustomization = %key, %attempt, error = %e, "Kustomization sync failed");
            }
        }

        let mut synced = working;
        synced.status = Some(status::status_for(&outcome, ks.metadata.generation, ks.status.as_ref(), chrono::Utc::now()));
        if let Err(source) = self.cluster.update_status(&synced).await {
            counter!("kustd_status_write_errors_total", 1u64);
            error!(kustomization = %key, error = %source, conflict = source.is_conflict(), "unable to update Kustomization status");
            return Err(ReconcileError::StatusWriteFailed { key: key.clone(), source });
        }

        info!(
            kustomization = %key,
            msg = %status::ready_message(synced.status.as_ref()),
            next_in = ?interval,
            "Kustomization sync finished"
        );
        Ok(Action::Requeue(interval))
    }
}
