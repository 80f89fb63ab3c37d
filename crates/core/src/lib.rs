//! kustd core types: resources, sync outcomes, status mapping and change predicate.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use kube::ResourceExt;
use serde::{Deserialize, Serialize};

pub mod crd;
pub mod interval;
pub mod predicate;
pub mod status;
pub mod sync;

pub use crd::{
    Artifact, Condition, GitRepository, GitRepositorySpec, GitRepositoryStatus, Kustomization, KustomizationSpec,
    KustomizationStatus, SourceReference, READY_CONDITION, SYNC_AT_ANNOTATION,
};
pub use interval::{parse_interval, IntervalError};
pub use predicate::ChangePredicate;
pub use sync::{FailureKind, SyncError, SyncOutcome};

/// Identity of a namespaced object (`namespace/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Key of a namespaced resource; `None` when name or namespace is unset.
    pub fn of<K: kube::Resource>(obj: &K) -> Option<Self> {
        let ns = obj.namespace()?;
        let name = obj.meta().name.clone()?;
        Some(Self { namespace: ns, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object key {0:?} (expect namespace/name)")]
pub struct ParseKeyError(String);

impl FromStr for ObjectKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => Ok(Self::new(ns, name)),
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}
