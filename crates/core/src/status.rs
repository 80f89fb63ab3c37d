//! Mapping from a sync outcome to the Kustomization status.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::crd::{Condition, KustomizationStatus, READY_CONDITION};
use crate::sync::{SyncOutcome, APPLY_SUCCEEDED_MESSAGE};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

/// Build the status to persist after an attempt.
///
/// The Ready condition is replaced; its `lastTransitionTime` only moves when the
/// status value flips. `lastAppliedRevision` is kept from `previous` on failure.
pub fn status_for(
    outcome: &SyncOutcome,
    generation: Option<i64>,
    previous: Option<&KustomizationStatus>,
    now: DateTime<Utc>,
) -> KustomizationStatus {
    let (status, message, revision) = match outcome {
        SyncOutcome::Succeeded { revision } => (CONDITION_TRUE, APPLY_SUCCEEDED_MESSAGE.to_string(), Some(revision.clone())),
        SyncOutcome::Failed(e) => (CONDITION_FALSE, e.to_string(), None),
    };

    let prev_ready = previous.and_then(|p| p.ready_condition());
    let last_transition_time = match prev_ready {
        Some(c) if c.status == status && c.last_transition_time.is_some() => c.last_transition_time.clone(),
        _ => Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    };

    let mut conditions: Vec<Condition> = previous
        .map(|p| p.conditions.iter().filter(|c| c.type_ != READY_CONDITION).cloned().collect())
        .unwrap_or_default();
    conditions.insert(0, Condition {
        type_: READY_CONDITION.to_string(),
        status: status.to_string(),
        reason: outcome.reason().to_string(),
        message,
        last_transition_time,
    });

    KustomizationStatus {
        conditions,
        observed_generation: generation,
        last_applied_revision: revision.or_else(|| previous.and_then(|p| p.last_applied_revision.clone())),
    }
}

/// One-line summary of the Ready condition for logs and listings.
pub fn ready_message(status: Option<&KustomizationStatus>) -> String {
    match status.and_then(|s| s.ready_condition()) {
        Some(c) => format!("{}: {}", c.reason, c.message),
        None => "Unknown".to_string(),
    }
}

pub fn is_ready(status: Option<&KustomizationStatus>) -> bool {
    status.and_then(|s| s.ready_condition()).map(|c| c.status == CONDITION_TRUE).unwrap_or(false)
}
