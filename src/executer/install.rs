//! Package installation: target resolution, root confirmation, extraction.

use anyhow::{bail, Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::archive::{self, PackageFormat};
use crate::error::SkwError;
use crate::plan::BuildEntry;

use super::config::ExecuterConfig;
use super::script::ExecMode;

/// Resolve where an entry's archive is extracted.
///
/// Chroot mode installs into the chroot (per-entry overrides are interpreted
/// relative to it); host mode starts from `default_extract_dir` and applies
/// the package > section > chapter override chain.
pub fn resolve_target(
    ecfg: &ExecuterConfig,
    entry: &BuildEntry,
    mode: ExecMode,
    chroot_dir: &Path,
) -> PathBuf {
    match mode {
        ExecMode::Chroot => match ecfg.extract_targets.lookup(entry) {
            Some(inner) => chroot_dir.join(inner.trim_start_matches('/')),
            None => chroot_dir.to_path_buf(),
        },
        ExecMode::Host => match ecfg.extract_targets.lookup(entry) {
            Some(target) => PathBuf::from(target),
            None => ecfg.default_extract_dir.clone(),
        },
    }
}

/// Ask before writing into the live root filesystem.
pub fn confirm_root_install(
    target: &Path,
    pkg_file: &str,
    require_confirm_root: bool,
    auto_confirm: bool,
) -> Result<()> {
    if target != Path::new("/") || !require_confirm_root || auto_confirm {
        return Ok(());
    }
    eprint!("WARNING: installing {pkg_file} into /. Continue? [y/N] ");
    io::stderr().flush().context("flushing confirmation prompt")?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("reading confirmation answer")?;
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(()),
        _ => bail!("installation of {pkg_file} into / aborted by user"),
    }
}

/// Verify the archive against its recorded checksum, then extract.
pub fn install_archive(
    archive_path: &Path,
    meta_path: &Path,
    format: PackageFormat,
    target: &Path,
) -> Result<()> {
    let meta = archive::read_metadata(meta_path)?;
    let (actual, _size) = archive::sha256_file(archive_path)?;
    if actual != meta.sha256 {
        return Err(SkwError::IntegrityError {
            name: archive_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            expected: meta.sha256,
            actual,
        }
        .into());
    }
    archive::extract(archive_path, format, target)
}
