//! List+watch of Kustomizations, reduced to reconcile triggers.

use std::collections::HashMap;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::Api,
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
};
use kustd_core::{ChangePredicate, Kustomization, ObjectKey};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Object created or meaningfully changed.
    Reconcile(ObjectKey),
    /// Object gone; pending work for it can be dropped.
    Deleted(ObjectKey),
}

/// Remembers the last seen metadata per object so watch updates can be run
/// through [`ChangePredicate`].
#[derive(Debug, Default)]
pub struct ChangeFilter {
    predicate: ChangePredicate,
    seen: HashMap<ObjectKey, ObjectMeta>,
}

impl ChangeFilter {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.seen.len() }

    pub fn is_empty(&self) -> bool { self.seen.is_empty() }

    pub fn applied(&mut self, obj: &Kustomization) -> Option<WatchEvent> {
        let Some(key) = ObjectKey::of(obj) else {
            debug!("ignoring kustomization without name/namespace");
            return None;
        };
        let old = self.seen.insert(key.clone(), obj.metadata.clone());
        let trigger = match old {
            None => true,
            Some(old) => self.predicate.update(Some(&old), Some(&obj.metadata)),
        };
        if trigger {
            Some(WatchEvent::Reconcile(key))
        } else {
            counter!("kustd_watch_suppressed_total", 1u64);
            None
        }
    }

    pub fn deleted(&mut self, obj: &Kustomization) -> Option<WatchEvent> {
        let key = ObjectKey::of(obj)?;
        self.seen.remove(&key);
        Some(WatchEvent::Deleted(key))
    }

    /// Relist: objects missing from `objs` are reported deleted, the rest go
    /// through [`ChangeFilter::applied`].
    pub fn restarted(&mut self, objs: &[Kustomization]) -> Vec<WatchEvent> {
        let present: std::collections::HashSet<ObjectKey> = objs.iter().filter_map(ObjectKey::of).collect();
        let mut out: Vec<WatchEvent> = Vec::new();
        let mut gone: Vec<ObjectKey> = self.seen.keys().filter(|k| !present.contains(*k)).cloned().collect();
        gone.sort();
        for key in gone {
            self.seen.remove(&key);
            out.push(WatchEvent::Deleted(key));
        }
        out.extend(objs.iter().filter_map(|o| self.applied(o)));
        out
    }
}

/// Watch Kustomizations through `api` and forward reconcile triggers to `tx`.
/// Returns when the receiver is dropped.
pub async fn start_watcher(api: Api<Kustomization>, tx: mpsc::Sender<WatchEvent>) -> Result<()> {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut filter = ChangeFilter::new();
    info!("kustomization watcher started");
    while let Some(ev) = stream.next().await {
        let events = match ev {
            Ok(Event::Applied(o)) => filter.applied(&o).into_iter().collect(),
            Ok(Event::Deleted(o)) => filter.deleted(&o).into_iter().collect(),
            Ok(Event::Restarted(list)) => {
                debug!(count = list.len(), "watch restart");
                filter.restarted(&list)
            }
            Err(e) => {
                warn!(error = %e, "watch error; backing off");
                counter!("kustd_watch_errors_total", 1u64);
                Vec::new()
            }
        };
        for event in events {
            if tx.send(event).await.is_err() {
                info!("watch receiver closed");
                return Ok(());
            }
        }
    }
    warn!("watcher stream ended");
    Ok(())
}
