//! Update-event filter: only spec changes and sync-at requests trigger a reconcile.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::SYNC_AT_ANNOTATION;

/// Suppresses updates caused by the controller's own status writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangePredicate;

impl ChangePredicate {
    /// Decide whether an update from `old` to `new` warrants a reconcile.
    /// Missing metadata on either side never triggers.
    pub fn update(&self, old: Option<&ObjectMeta>, new: Option<&ObjectMeta>) -> bool {
        let (Some(old), Some(new)) = (old, new) else { return false };
        if old.generation != new.generation {
            return true;
        }
        match sync_at(new) {
            Some(val) => sync_at(old) != Some(val),
            None => false,
        }
    }
}

fn sync_at(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations.as_ref()?.get(SYNC_AT_ANNOTATION).map(String::as_str)
}
