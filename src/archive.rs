//! Package archives: deterministic tar(.gz|.xz) creation, SHA-256, metadata.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::error::SkwError;

/// Supported package archive encodings. Compression is implied by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Tar,
    TarGz,
    TarXz,
}

impl PackageFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "tar" => Ok(PackageFormat::Tar),
            "tar.gz" => Ok(PackageFormat::TarGz),
            "tar.xz" => Ok(PackageFormat::TarXz),
            other => Err(SkwError::ConfigInvalid(format!(
                "unknown package_format '{other}' (expected 'tar', 'tar.gz' or 'tar.xz')"
            ))
            .into()),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PackageFormat::Tar => "tar",
            PackageFormat::TarGz => "tar.gz",
            PackageFormat::TarXz => "tar.xz",
        }
    }
}

/// Integrity and provenance record written next to every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package_name: String,
    pub package_version: String,
    pub book: String,
    pub profile: String,
    pub chapter_id: String,
    pub section_id: String,
    pub exec_mode: String,
    pub created_at: String,
    pub hostname: String,
    pub platform: String,
    pub size: u64,
    pub sha256: String,
    pub files: Vec<String>,
}

/// Sibling metadata path for an archive: `<pkg>.<ext>.meta.json`.
pub fn metadata_path(archive: &Path) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta.json");
    archive.with_file_name(name)
}

pub fn write_metadata(path: &Path, meta: &PackageMetadata) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(meta).context("encoding package metadata")?;
    fs::write(path, bytes)
        .with_context(|| format!("writing package metadata '{}'", path.display()))?;
    Ok(())
}

pub fn read_metadata(path: &Path) -> Result<PackageMetadata> {
    let bytes = fs::read(path)
        .with_context(|| format!("reading package metadata '{}'", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing package metadata '{}'", path.display()))
}

/// Streaming SHA-256 of a file, returning the lowercase hex digest and size.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let mut reader = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("hashing '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

enum PackWriter {
    Plain(File),
    Gz(GzEncoder<File>),
    Xz(XzEncoder<File>),
}

impl Write for PackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PackWriter::Plain(w) => w.write(buf),
            PackWriter::Gz(w) => w.write(buf),
            PackWriter::Xz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PackWriter::Plain(w) => w.flush(),
            PackWriter::Gz(w) => w.flush(),
            PackWriter::Xz(w) => w.flush(),
        }
    }
}

impl PackWriter {
    fn finish(self) -> io::Result<()> {
        match self {
            PackWriter::Plain(mut w) => w.flush(),
            PackWriter::Gz(w) => w.finish().map(|_| ()),
            PackWriter::Xz(w) => w.finish().map(|_| ()),
        }
    }
}

fn open_reader(path: &Path, format: PackageFormat) -> Result<Box<dyn Read>> {
    let f = File::open(path).with_context(|| format!("opening archive '{}'", path.display()))?;
    Ok(match format {
        PackageFormat::Tar => Box::new(f),
        PackageFormat::TarGz => Box::new(GzDecoder::new(f)),
        PackageFormat::TarXz => Box::new(XzDecoder::new(f)),
    })
}

/// Archive a staging directory with member paths relative to its root.
///
/// Entries are appended in sorted path order with zeroed timestamps and
/// ownership so identical staging trees produce identical archives.
pub fn create(src_dir: &Path, out_path: &Path, format: PackageFormat) -> Result<()> {
    if !src_dir.is_dir() {
        bail!("staging directory not found: {}", src_dir.display());
    }
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating package directory '{}'", parent.display()))?;
    }

    let out = File::create(out_path)
        .with_context(|| format!("creating archive '{}'", out_path.display()))?;
    let writer = match format {
        PackageFormat::Tar => PackWriter::Plain(out),
        PackageFormat::TarGz => PackWriter::Gz(GzEncoder::new(out, Compression::default())),
        PackageFormat::TarXz => PackWriter::Xz(XzEncoder::new(out, 6)),
    };
    let mut builder = tar::Builder::new(writer);

    let mut paths: Vec<PathBuf> = WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .map(|ent| ent.path().to_path_buf())
        .filter(|p| p != src_dir)
        .collect();
    paths.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy().into_owned();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy().into_owned();
        ra.cmp(&rb)
    });

    for path in paths {
        let rel = path
            .strip_prefix(src_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let md = fs::symlink_metadata(&path)
            .with_context(|| format!("reading metadata '{}'", path.display()))?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(md.permissions().mode());
        }

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, rel, io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)
                .with_context(|| format!("reading symlink '{}'", path.display()))?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(target.to_string_lossy().as_ref())?;
            header.set_cksum();
            builder.append_data(&mut header, rel, io::empty())?;
        } else if md.is_file() {
            let mut f = File::open(&path)
                .with_context(|| format!("opening '{}'", path.display()))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut f)?;
        }
    }

    let writer = builder
        .into_inner()
        .with_context(|| format!("finalizing archive '{}'", out_path.display()))?;
    writer
        .finish()
        .with_context(|| format!("flushing archive '{}'", out_path.display()))?;
    Ok(())
}

/// Regular-file member paths of an archive, as stored.
pub fn list_files(archive_path: &Path, format: PackageFormat) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(open_reader(archive_path, format)?);
    let mut files = Vec::new();
    for entry in archive
        .entries()
        .with_context(|| format!("listing archive '{}'", archive_path.display()))?
    {
        let entry = entry
            .with_context(|| format!("reading archive member in '{}'", archive_path.display()))?;
        if entry.header().entry_type().is_file() {
            files.push(entry.path()?.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}

/// Extract an archive into `target`, preserving symlinks and permissions.
///
/// Every member path is normalized first; a member that would land outside
/// `target` fails the extraction before anything is written.
pub fn extract(archive_path: &Path, format: PackageFormat, target: &Path) -> Result<()> {
    {
        let mut archive = tar::Archive::new(open_reader(archive_path, format)?);
        for entry in archive
            .entries()
            .with_context(|| format!("validating archive '{}'", archive_path.display()))?
        {
            let entry = entry.with_context(|| {
                format!("reading archive member in '{}'", archive_path.display())
            })?;
            let raw = entry.path()?.into_owned();
            validate_member_path(&raw)?;
        }
    }

    fs::create_dir_all(target)
        .with_context(|| format!("creating extraction target '{}'", target.display()))?;
    let mut archive = tar::Archive::new(open_reader(archive_path, format)?);
    archive.set_preserve_permissions(true);
    archive
        .unpack(target)
        .with_context(|| {
            format!(
                "extracting '{}' into '{}'",
                archive_path.display(),
                target.display()
            )
        })?;
    Ok(())
}

fn validate_member_path(raw: &Path) -> Result<()> {
    let mut depth: i64 = 0;
    for component in raw.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(SkwError::PathEscape(raw.display().to_string()).into());
                }
            }
            Component::Normal(_) => depth += 1,
            // A leading '/' is tolerated the way tar itself strips it.
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(_) => {
                return Err(SkwError::PathEscape(raw.display().to_string()).into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage_tree(root: &Path) {
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::write(root.join("usr/bin/tool"), b"#!/bin/sh\necho ok\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(root.join("usr/bin/tool"), fs::Permissions::from_mode(0o755))
                .unwrap();
            std::os::unix::fs::symlink("tool", root.join("usr/bin/tool-alias")).unwrap();
        }
    }

    #[test]
    fn format_parse_and_extension() {
        assert_eq!(PackageFormat::parse("tar.xz").unwrap(), PackageFormat::TarXz);
        assert_eq!(PackageFormat::TarGz.extension(), "tar.gz");
        let err = PackageFormat::parse("zip").unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigInvalid");
    }

    #[test]
    fn pack_hash_extract_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        stage_tree(&staging);

        for format in [PackageFormat::Tar, PackageFormat::TarGz, PackageFormat::TarXz] {
            let archive = tmp
                .path()
                .join(format!("pkg.{}", format.extension()));
            create(&staging, &archive, format).unwrap();

            let (sha, size) = sha256_file(&archive).unwrap();
            assert_eq!(sha.len(), 64);
            assert!(size > 0);

            let files = list_files(&archive, format).unwrap();
            assert_eq!(files, vec!["usr/bin/tool".to_string()]);

            let out = tmp.path().join(format!("out-{}", format.extension()));
            extract(&archive, format, &out).unwrap();
            assert_eq!(fs::read(out.join("usr/bin/tool")).unwrap(), b"#!/bin/sh\necho ok\n");
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = fs::metadata(out.join("usr/bin/tool")).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o755);
                assert!(fs::symlink_metadata(out.join("usr/bin/tool-alias"))
                    .unwrap()
                    .file_type()
                    .is_symlink());
            }
        }
    }

    #[test]
    fn identical_staging_trees_produce_identical_archives() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        stage_tree(&staging);

        let a = tmp.path().join("a.tar");
        let b = tmp.path().join("b.tar");
        create(&staging, &a, PackageFormat::Tar).unwrap();
        create(&staging, &b, PackageFormat::Tar).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn escaping_member_is_refused() {
        let tmp = TempDir::new().unwrap();
        let evil = tmp.path().join("evil.tar");
        let out = File::create(&evil).unwrap();
        let mut builder = tar::Builder::new(out);
        let mut header = tar::Header::new_gnu();
        let name = b"../escape.txt\0";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"hi"[..]).unwrap();
        builder.finish().unwrap();

        let err = extract(&evil, PackageFormat::Tar, &tmp.path().join("out")).unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "PathEscape");
    }

    #[test]
    fn metadata_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tar.xz");
        let meta = PackageMetadata {
            package_name: "binutils".into(),
            package_version: "2.41".into(),
            book: "lfs".into(),
            profile: "systemd".into(),
            chapter_id: "ch-05".into(),
            section_id: "binutils".into(),
            exec_mode: "host".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            hostname: "builder".into(),
            platform: "linux-x86_64".into(),
            size: 42,
            sha256: "0".repeat(64),
            files: vec!["usr/bin/ld".into()],
        };
        let path = metadata_path(&archive);
        assert!(path.to_string_lossy().ends_with("pkg.tar.xz.meta.json"));
        write_metadata(&path, &meta).unwrap();
        let back = read_metadata(&path).unwrap();
        assert_eq!(back.sha256, meta.sha256);
        assert_eq!(back.files, meta.files);
    }
}
