//! Outcome of one sync attempt.

use serde::{Deserialize, Serialize};

pub const REASON_APPLY_SUCCEEDED: &str = "ApplySucceeded";
pub const REASON_ARTIFACT_MISSING: &str = "ArtifactMissing";
pub const REASON_FETCH_FAILED: &str = "FetchFailed";
pub const REASON_STORAGE_OPERATION_FAILED: &str = "StorageOperationFailed";
pub const REASON_RENDER_FAILED: &str = "RenderFailed";
pub const REASON_APPLY_FAILED: &str = "ApplyFailed";

pub const APPLY_SUCCEEDED_MESSAGE: &str = "kustomization was successfully applied";

/// Stage at which a sync attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    ArtifactMissing,
    FetchFailed,
    RenderFailed,
    ApplyFailed,
}

/// Sync-stage failure. The message carries the diagnostic of the failing step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("artifact not found in {source_name}")]
    ArtifactMissing { source_name: String },
    #[error("workspace error: {0}")]
    Storage(String),
    #[error("artifact acquisition failed: {0}")]
    Fetch(String),
    #[error("build failed: {0}")]
    Render(String),
    #[error("apply failed: {0}")]
    Apply(String),
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::ArtifactMissing { .. } => FailureKind::ArtifactMissing,
            SyncError::Storage(_) | SyncError::Fetch(_) => FailureKind::FetchFailed,
            SyncError::Render(_) => FailureKind::RenderFailed,
            SyncError::Apply(_) => FailureKind::ApplyFailed,
        }
    }

    /// Condition reason identifying the failing stage.
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::ArtifactMissing { .. } => REASON_ARTIFACT_MISSING,
            SyncError::Storage(_) => REASON_STORAGE_OPERATION_FAILED,
            SyncError::Fetch(_) => REASON_FETCH_FAILED,
            SyncError::Render(_) => REASON_RENDER_FAILED,
            SyncError::Apply(_) => REASON_APPLY_FAILED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Succeeded {
        /// Revision of the artifact that was applied.
        revision: String,
    },
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool { matches!(self, SyncOutcome::Succeeded { .. }) }

    pub fn reason(&self) -> &'static str {
        match self {
            SyncOutcome::Succeeded { .. } => REASON_APPLY_SUCCEEDED,
            SyncOutcome::Failed(e) => e.reason(),
        }
    }
}

impl From<Result<String, SyncError>> for SyncOutcome {
    fn from(r: Result<String, SyncError>) -> Self {
        match r {
            Ok(revision) => SyncOutcome::Succeeded { revision },
            Err(e) => SyncOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_count_as_fetch_failures_with_own_reason() {
        let e = SyncError::Storage("disk full".into());
        assert_eq!(e.kind(), FailureKind::FetchFailed);
        assert_eq!(e.reason(), REASON_STORAGE_OPERATION_FAILED);
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn artifact_missing_names_the_source() {
        let e = SyncError::ArtifactMissing { source_name: "podinfo".into() };
        assert_eq!(e.to_string(), "artifact not found in podinfo");
        assert_eq!(SyncOutcome::Failed(e).reason(), REASON_ARTIFACT_MISSING);
    }
}
