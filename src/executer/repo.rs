//! Tiered package cache: probe, fetch and publish.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

use crate::error::SkwError;

/// Per-request timeout for cache probes and downloads.
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

fn is_http(repo: &str) -> bool {
    repo.starts_with("http://") || repo.starts_with("https://")
}

/// The repository that answered a cache probe.
#[derive(Debug, Clone)]
pub struct RepoHit {
    pub repo: String,
}

pub struct RepoClient {
    http: reqwest::blocking::Client,
}

impl RepoClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("constructing HTTP client")?;
        Ok(Self { http })
    }

    /// Consult the tiered repositories in order; the first metadata hit wins.
    ///
    /// Probe failures (timeouts, connection errors, non-2xx) count as misses.
    pub fn probe(&self, repos: &[String], pkg_file: &str) -> Option<RepoHit> {
        let meta_name = format!("{pkg_file}.meta.json");
        for repo in repos {
            let found = if is_http(repo) {
                let url = format!("{}/{}", repo.trim_end_matches('/'), meta_name);
                match self.http.head(&url).send() {
                    Ok(resp) => resp.status().is_success(),
                    Err(e) => {
                        debug!("cache probe miss at {url}: {e}");
                        false
                    }
                }
            } else {
                Path::new(repo).join(&meta_name).is_file()
            };
            if found {
                return Some(RepoHit { repo: repo.clone() });
            }
        }
        None
    }

    /// Bring the archive and its metadata into the scratch directory.
    ///
    /// A download failure after a successful probe is fatal: the cache said
    /// the package exists, so silence here means the repo went away.
    pub fn fetch(&self, hit: &RepoHit, pkg_file: &str, dest_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("creating download directory '{}'", dest_dir.display()))?;
        let meta_name = format!("{pkg_file}.meta.json");
        let archive_dest = dest_dir.join(pkg_file);
        let meta_dest = dest_dir.join(&meta_name);

        if is_http(&hit.repo) {
            self.download(&hit.repo, pkg_file, &archive_dest)?;
            self.download(&hit.repo, &meta_name, &meta_dest)?;
        } else {
            let repo = Path::new(&hit.repo);
            fs::copy(repo.join(pkg_file), &archive_dest).with_context(|| {
                format!("copying cached archive from '{}'", hit.repo)
            })?;
            fs::copy(repo.join(&meta_name), &meta_dest).with_context(|| {
                format!("copying cached metadata from '{}'", hit.repo)
            })?;
        }
        Ok((archive_dest, meta_dest))
    }

    fn download(&self, repo: &str, file_name: &str, dest: &Path) -> Result<()> {
        let url = format!("{}/{}", repo.trim_end_matches('/'), file_name);
        let mut resp = self
            .http
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| SkwError::RepoUnreachable(format!("{url}: {e}")))?;
        let mut out = File::create(dest)
            .with_context(|| format!("creating download '{}'", dest.display()))?;
        resp.copy_to(&mut out)
            .map_err(|e| SkwError::RepoUnreachable(format!("{url}: {e}")))?;
        Ok(())
    }
}

/// Publish an archive and its metadata to the upload repository.
///
/// A target containing `:` and no scheme is an SCP destination; HTTP(S)
/// targets are rejected before anything is sent.
pub fn publish(upload_repo: &str, archive: &Path, meta: &Path) -> Result<()> {
    if is_http(upload_repo) {
        return Err(SkwError::UploadRejected(upload_repo.to_string()).into());
    }

    if upload_repo.contains(':') {
        for file in [archive, meta] {
            let status = Command::new("scp")
                .arg(file)
                .arg(upload_repo)
                .status()
                .with_context(|| format!("spawning scp for '{}'", file.display()))?;
            if !status.success() {
                return Err(SkwError::ExternalToolFailed {
                    tool: "scp".to_string(),
                    detail: format!("uploading '{}' to '{upload_repo}': {status}", file.display()),
                }
                .into());
            }
        }
        return Ok(());
    }

    let dest_dir = Path::new(upload_repo);
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("creating upload repository '{}'", dest_dir.display()))?;
    for file in [archive, meta] {
        let name = file
            .file_name()
            .with_context(|| format!("upload source has no file name: '{}'", file.display()))?;
        fs::copy(file, dest_dir.join(name))
            .with_context(|| format!("copying '{}' to '{}'", file.display(), upload_repo))?;
    }
    Ok(())
}
