//! Per-attempt scratch directories.
//!
//! A [`Workspace`] is owned by exactly one sync attempt and removed when it is
//! dropped, which covers early returns, errors, panics and cancelled futures.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Workspaces are created as uniquely named children of `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh, empty directory named `<label>-<random>`.
    pub fn acquire(&self, label: &str) -> std::io::Result<Workspace> {
        std::fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new().prefix(&format!("{}-", sanitize(label))).tempdir_in(&self.root)?;
        debug!(path = %dir.path().display(), "workspace acquired");
        metrics::increment_gauge!("kustd_workspaces_open", 1.0);
        Ok(Workspace { dir: Some(dir) })
    }
}

#[derive(Debug)]
pub struct Workspace {
    dir: Option<tempfile::TempDir>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        // `dir` is only taken by `close`/`drop`, both of which consume the workspace.
        self.dir.as_ref().map(|d| d.path()).unwrap_or_else(|| Path::new(""))
    }

    /// Remove the directory now, surfacing removal errors.
    pub fn close(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                metrics::decrement_gauge!("kustd_workspaces_open", 1.0);
                dir.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            metrics::decrement_gauge!("kustd_workspaces_open", 1.0);
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "workspace removal failed");
            }
        }
    }
}

fn sanitize(label: &str) -> String {
    let s: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .take(48)
        .collect();
    if s.is_empty() { "ws".to_string() } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspaces_are_unique_and_removed_on_drop() {
        let root = tempfile::tempdir().expect("root");
        let mgr = WorkspaceManager::new(root.path());
        let a = mgr.acquire("podinfo").expect("a");
        let b = mgr.acquire("podinfo").expect("b");
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
        std::fs::write(a.path().join("podinfo.yaml"), "kind: List\n").expect("write");
        let (pa, pb) = (a.path().to_path_buf(), b.path().to_path_buf());
        drop(a);
        b.close().expect("close");
        assert!(!pa.exists());
        assert!(!pb.exists());
        assert_eq!(std::fs::read_dir(root.path()).expect("ls").count(), 0);
    }

    #[test]
    fn acquire_creates_missing_root() {
        let outer = tempfile::tempdir().expect("outer");
        let mgr = WorkspaceManager::new(outer.path().join("nested").join("ws"));
        let ws = mgr.acquire("a/b c").expect("acquire");
        assert!(ws.path().exists());
        let name = ws.path().file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        assert!(name.starts_with("a_b_c-"), "name={name}");
    }

    #[test]
    fn acquire_fails_when_root_is_a_file() {
        let outer = tempfile::tempdir().expect("outer");
        let file = outer.path().join("occupied");
        std::fs::write(&file, b"x").expect("write");
        assert!(WorkspaceManager::new(&file).acquire("ks").is_err());
    }
}
