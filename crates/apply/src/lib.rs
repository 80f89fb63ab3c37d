//! kustd apply: `kubectl apply` with optional label-scoped pruning, plus a
//! summary of the rendered manifest for audit logs.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use kustd_ops::{run_captured, Applier, StepError};
use metrics::{counter, histogram};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

fn max_manifest_bytes() -> usize {
    std::env::var("KUSTD_MAX_MANIFEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(8_000_000)
}

/// Arguments for applying `manifest`. A blank selector disables pruning.
pub fn apply_args(manifest: &Path, prune: Option<&str>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["apply".into(), "-f".into(), manifest.as_os_str().to_os_string()];
    if let Some(selector) = prune.map(str::trim).filter(|s| !s.is_empty()) {
        args.push("--prune".into());
        args.push("-l".into());
        args.push(selector.into());
    }
    args
}

pub struct KubectlApplier {
    bin: PathBuf,
}

impl KubectlApplier {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Default for KubectlApplier {
    fn default() -> Self { Self::new("kubectl") }
}

#[async_trait::async_trait]
impl Applier for KubectlApplier {
    async fn apply(&self, work_dir: &Path, manifest: &Path, prune: Option<&str>, deadline: Instant) -> Result<String, StepError> {
        let t0 = std::time::Instant::now();
        let mut cmd = Command::new(&self.bin);
        cmd.args(apply_args(manifest, prune)).current_dir(work_dir);
        match run_captured(cmd, "kubectl apply", deadline).await {
            Ok(out) => {
                histogram!("kustd_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("kustd_apply_ok", 1u64);
                Ok(out.combined())
            }
            Err(e) => {
                counter!("kustd_apply_err", 1u64);
                Err(e)
            }
        }
    }
}

/// Object counts per kind in a rendered multi-document manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSummary {
    pub objects: usize,
    pub kinds: BTreeMap<String, usize>,
}

impl ManifestSummary {
    /// Summarize `manifest`. Returns `None` when the manifest is too large or
    /// is not valid YAML; the apply step stays the judge of validity.
    pub fn parse(manifest: &[u8]) -> Option<Self> {
        if manifest.len() > max_manifest_bytes() {
            debug!(bytes = manifest.len(), "manifest too large to summarize");
            return None;
        }
        let mut out = ManifestSummary::default();
        for doc in serde_yaml::Deserializer::from_slice(manifest) {
            let value = match serde_yaml::Value::deserialize(doc) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "manifest is not valid YAML");
                    return None;
                }
            };
            if value.is_null() {
                continue;
            }
            let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or("<unknown>").to_string();
            *out.kinds.entry(kind).or_insert(0) += 1;
            out.objects += 1;
        }
        Some(out)
    }
}

impl std::fmt::Display for ManifestSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.kinds.iter().map(|(k, n)| format!("{}={}", k, n)).collect();
        write!(f, "{} objects ({})", self.objects, parts.join(", "))
    }
}
