//! kustd controller: drives Kustomizations toward their source artifacts.
//!
//! Watch events and interval timers feed one de-duplicating [`WorkQueue`];
//! a bounded pool of workers runs [`Reconciler::reconcile`] per key, so a
//! given Kustomization is never synced by two workers at once.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use kube::Api;
use kustd_apply::KubectlApplier;
use kustd_core::{Kustomization, ObjectKey};
use kustd_kubehub::{start_watcher, KubeCluster, WatchEvent};
use kustd_ops::{HttpFetcher, KustomizeRenderer, WorkspaceManager};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod config;
pub mod queue;
pub mod reconcile;
pub mod sync;

pub use config::ControllerConfig;
pub use queue::WorkQueue;
pub use reconcile::{Action, ReconcileError, Reconciler};
pub use sync::{manifest_file_name, resolve_artifact, SyncPipeline};

pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue<ObjectKey>>,
    concurrency: usize,
}

impl Controller {
    pub fn new(reconciler: Reconciler, concurrency: usize) -> Self {
        Self { reconciler: Arc::new(reconciler), queue: WorkQueue::new(), concurrency: concurrency.max(1) }
    }

    pub fn queue(&self) -> Arc<WorkQueue<ObjectKey>> { self.queue.clone() }

    /// Process watch events until `shutdown` fires or the event channel closes.
    /// In-flight attempts finish before this returns.
    pub async fn run(self, mut events: mpsc::Receiver<WatchEvent>, shutdown: CancellationToken) {
        let mut workers = Vec::with_capacity(self.concurrency);
        for id in 0..self.concurrency {
            workers.push(tokio::spawn(worker(id, self.reconciler.clone(), self.queue.clone())));
        }
        info!(workers = self.concurrency, "controller started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                ev = events.recv() => match ev {
                    Some(WatchEvent::Reconcile(key)) => self.queue.add(key),
                    Some(WatchEvent::Deleted(key)) => {
                        debug!(kustomization = %key, "deleted; dropping pending work");
                        self.queue.forget(&key);
                    }
                    None => break,
                },
            }
        }

        self.queue.shutdown();
        for w in workers {
            if let Err(e) = w.await {
                warn!(error = %e, "worker task failed");
            }
        }
        info!("controller stopped");
    }
}

async fn worker(id: usize, reconciler: Arc<Reconciler>, queue: Arc<WorkQueue<ObjectKey>>) {
    while let Some(key) = queue.next().await {
        match reconciler.reconcile(&key).await {
            Ok(Action::Requeue(after)) => queue.add_after(key.clone(), after),
            Ok(Action::Forget) => {
                debug!(worker = id, kustomization = %key, "kustomization gone; no requeue");
                queue.cancel_timer(&key);
            }
            Err(e) => {
                let after = reconciler.error_policy(&e);
                warn!(worker = id, error = %e, retry_in = ?after, "reconcile failed; requeueing");
                queue.add_after(key.clone(), after);
            }
        }
        queue.done(&key);
    }
    debug!(worker = id, "worker exiting");
}

/// Build the kube-backed controller from `config` and run it until `shutdown`.
pub async fn run(config: ControllerConfig, shutdown: CancellationToken) -> Result<()> {
    let client = kustd_kubehub::get_kube_client().await?;
    let pipeline = SyncPipeline::new(
        WorkspaceManager::new(&config.workspace_root),
        Arc::new(HttpFetcher::new()),
        Arc::new(KustomizeRenderer::new(&config.kustomize_bin)),
        Arc::new(KubectlApplier::new(&config.kubectl_bin)),
    );
    let reconciler = Reconciler::new(Arc::new(KubeCluster::new(client.clone())), pipeline, &config);
    let controller = Controller::new(reconciler, config.concurrency);

    let api: Api<Kustomization> = match config.namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (tx, rx) = mpsc::channel::<WatchEvent>(1024);
    let watch = tokio::spawn(async move {
        if let Err(e) = start_watcher(api, tx).await {
            warn!(error = ?e, "watcher failed");
        }
    });

    info!(namespace = ?config.namespace, timeout = ?config.sync_timeout, "starting kustomization controller");
    controller.run(rx, shutdown).await;
    watch.abort();
    Ok(())
}
