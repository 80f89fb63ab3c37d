//! Deadline-bounded subprocess execution with captured output.

use std::process::Stdio;

use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::StepError;

#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// stderr followed by stdout, lossily decoded and trimmed.
    pub fn combined(&self) -> String {
        let err = String::from_utf8_lossy(&self.stderr);
        let out = String::from_utf8_lossy(&self.stdout);
        match (err.trim(), out.trim()) {
            ("", o) => o.to_string(),
            (e, "") => e.to_string(),
            (e, o) => format!("{}\n{}", e, o),
        }
    }
}

/// Spawn `cmd` and wait for it until `deadline`.
///
/// The child is killed when the deadline passes or the returned future is
/// dropped. A non-zero exit is `StepError::Failed` carrying the combined output.
pub async fn run_captured(mut cmd: Command, program: &str, deadline: Instant) -> Result<CapturedOutput, StepError> {
    cmd.kill_on_drop(true).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = cmd.spawn().map_err(|e| StepError::io(format!("spawning {}", program), e))?;
    debug!(program, pid = ?child.id(), "step started");
    let output = match tokio::time::timeout_at(deadline, child.wait_with_output()).await {
        Ok(res) => res.map_err(|e| StepError::io(format!("waiting for {}", program), e))?,
        Err(_) => return Err(StepError::DeadlineExceeded),
    };
    let captured = CapturedOutput { stdout: output.stdout, stderr: output.stderr };
    if !output.status.success() {
        return Err(StepError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            output: captured.combined(),
        });
    }
    Ok(captured)
}
