//! kustd ops: the external steps of a sync attempt.
//!
//! Each step is a capability trait so the pipeline can run against fakes.
//! Every call receives the attempt deadline and must abort its own
//! subprocess or network operation once it passes.

#![forbid(unsafe_code)]

use std::path::Path;

use tokio::time::Instant;

pub mod fetch;
pub mod process;
pub mod render;
pub mod workspace;

pub use fetch::{unpack_stripped, HttpFetcher};
pub use process::{run_captured, CapturedOutput};
pub use render::{resolve_build_path, KustomizeRenderer};
pub use workspace::{Workspace, WorkspaceManager};

/// Failure of a single external step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{program} {status}: {output}")]
    Failed { program: String, status: String, output: String },
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Http(String),
    #[error("unpack: {0}")]
    Unpack(String),
}

impl StepError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StepError::Io { context: context.into(), source }
    }
}

/// Retrieves an artifact bundle and unpacks it into `dest`, stripping the
/// top-level directory of the bundle.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path, deadline: Instant) -> Result<(), StepError>;
}

/// Runs the build step in `work_dir` against the relative `path` and returns
/// the rendered manifest.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, work_dir: &Path, path: &Path, deadline: Instant) -> Result<Vec<u8>, StepError>;
}

/// Applies a rendered manifest, pruning by `prune` selector when given.
/// Returns the tool output for audit logging.
#[async_trait::async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, work_dir: &Path, manifest: &Path, prune: Option<&str>, deadline: Instant) -> Result<String, StepError>;
}
