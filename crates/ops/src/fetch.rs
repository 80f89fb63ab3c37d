//! Artifact retrieval: HTTP GET of a gzipped tarball, unpacked with the
//! top-level directory stripped.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use metrics::{counter, histogram};
use tar::{Archive, EntryType};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Fetcher, StepError};

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self { Self::new() }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path, deadline: Instant) -> Result<(), StepError> {
        let t0 = std::time::Instant::now();
        let download = async {
            let resp = self.client.get(url).send().await?.error_for_status()?;
            Ok::<_, reqwest::Error>(resp.bytes().await?)
        };
        let body = tokio::time::timeout_at(deadline, download)
            .await
            .map_err(|_| StepError::DeadlineExceeded)?
            .map_err(|e| StepError::Http(format!("artifact download `{}` error: {}", url, e)))?;
        histogram!("kustd_artifact_bytes", body.len() as f64);

        let dest_owned = dest.to_path_buf();
        let std_deadline = deadline.into_std();
        let files = tokio::task::spawn_blocking(move || unpack_stripped(&body[..], &dest_owned, std_deadline))
            .await
            .map_err(|e| StepError::Unpack(format!("unpack task failed: {}", e)))??;
        counter!("kustd_artifact_fetch_total", 1u64);
        debug!(url, files, elapsed_ms = t0.elapsed().as_millis() as u64, "artifact unpacked");
        Ok(())
    }
}

/// Unpack a `.tar.gz` stream into `dest`, dropping the first path component of
/// every entry. Only regular files and directories are extracted. Returns the
/// number of files written.
pub fn unpack_stripped<R: Read>(reader: R, dest: &Path, deadline: std::time::Instant) -> Result<usize, StepError> {
    let unpack_err = |e: std::io::Error| StepError::Unpack(e.to_string());
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut files = 0usize;
    for entry in archive.entries().map_err(unpack_err)? {
        if std::time::Instant::now() >= deadline {
            return Err(StepError::DeadlineExceeded);
        }
        let mut entry = entry.map_err(unpack_err)?;
        let raw = entry.path().map_err(unpack_err)?.into_owned();
        let Some(rel) = strip_first_component(&raw)? else { continue };
        let target = dest.join(&rel);
        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&target).map_err(|e| StepError::io(format!("creating {}", target.display()), e))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| StepError::io(format!("creating {}", parent.display()), e))?;
                }
                entry.unpack(&target).map_err(unpack_err)?;
                files += 1;
            }
            other => {
                warn!(entry = %raw.display(), kind = ?other, "skipping unsupported archive entry");
            }
        }
    }
    Ok(files)
}

/// `pkg/a/b.yaml` -> `a/b.yaml`; `/pkg/a.yaml` -> `a.yaml`; `pkg/` -> None.
/// Rejects entries that would escape the destination.
fn strip_first_component(path: &Path) -> Result<Option<PathBuf>, StepError> {
    let mut comps = path.components().filter(|c| !matches!(c, Component::CurDir | Component::RootDir));
    comps.next();
    let mut out = PathBuf::new();
    for c in comps {
        match c {
            Component::Normal(p) => out.push(p),
            _ => return Err(StepError::Unpack(format!("refusing archive entry {}", path.display()))),
        }
    }
    Ok(if out.as_os_str().is_empty() { None } else { Some(out) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::time::Duration;

    fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).expect("append");
        }
        builder.into_inner().expect("finish tar").finish().expect("finish gz")
    }

    fn far() -> std::time::Instant { std::time::Instant::now() + Duration::from_secs(30) }

    #[test]
    fn leading_slash_is_dropped_before_the_wrapping_directory() {
        let got = strip_first_component(Path::new("/repo/a.yaml")).expect("ok");
        assert_eq!(got, Some(PathBuf::from("a.yaml")));
        let got = strip_first_component(Path::new("./repo/deploy/b.yaml")).expect("ok");
        assert_eq!(got, Some(PathBuf::from("deploy/b.yaml")));
        assert_eq!(strip_first_component(Path::new("/repo/")).expect("ok"), None);
        assert!(strip_first_component(Path::new("/repo/../../etc/passwd")).is_err());
    }

    #[test]
    fn strips_wrapping_directory() {
        let dest = tempfile::tempdir().expect("dest");
        let data = tarball(&[
            ("podinfo-abc123/kustomization.yaml", "resources: [deploy.yaml]\n"),
            ("podinfo-abc123/deploy.yaml", "kind: Deployment\n"),
            ("podinfo-abc123/overlays/prod/kustomization.yaml", "resources: [../../]\n"),
        ]);
        let n = unpack_stripped(&data[..], dest.path(), far()).expect("unpack");
        assert_eq!(n, 3);
        assert!(dest.path().join("kustomization.yaml").is_file());
        assert!(dest.path().join("overlays/prod/kustomization.yaml").is_file());
        assert!(!dest.path().join("podinfo-abc123").exists());
    }

    #[test]
    fn top_level_files_are_dropped_like_tar_strip_components() {
        let dest = tempfile::tempdir().expect("dest");
        let data = tarball(&[("README.md", "x"), ("./repo/a.yaml", "kind: A\n")]);
        let n = unpack_stripped(&data[..], dest.path(), far()).expect("unpack");
        assert_eq!(n, 1);
        assert!(dest.path().join("a.yaml").is_file());
        assert!(!dest.path().join("README.md").exists());
    }

    #[test]
    fn parent_components_are_refused() {
        assert!(strip_first_component(Path::new("repo/../../etc/passwd")).is_err());
        assert_eq!(strip_first_component(Path::new("repo/")).expect("ok"), None);
        assert_eq!(strip_first_component(Path::new("repo/x/y")).expect("ok"), Some(PathBuf::from("x/y")));
    }

    #[test]
    fn corrupt_stream_is_unpack_error() {
        let dest = tempfile::tempdir().expect("dest");
        let err = unpack_stripped(&b"definitely not gzip"[..], dest.path(), far()).unwrap_err();
        assert!(matches!(err, StepError::Unpack(_)), "{err:?}");
    }

    #[test]
    fn expired_deadline_stops_unpacking() {
        let dest = tempfile::tempdir().expect("dest");
        let data = tarball(&[("repo/a.yaml", "kind: A\n")]);
        let err = unpack_stripped(&data[..], dest.path(), std::time::Instant::now()).unwrap_err();
        assert!(matches!(err, StepError::DeadlineExceeded));
    }
}
