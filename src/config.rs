//! Top-level `builder.toml` and the `${var}` substitution helper.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SkwError;

/// Filesystem roots shared by every pipeline stage.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub build_dir: PathBuf,
    pub package_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub skel_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuilderToml {
    paths: PathsToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsToml {
    build_dir: PathBuf,
    package_dir: PathBuf,
    profiles_dir: PathBuf,
    skel_dir: PathBuf,
}

impl BuilderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SkwError::ConfigMissing(format!(
                "{} (run 'skw-build configure' first)",
                path.display()
            ))
            .into());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading builder config '{}'", path.display()))?;
        let parsed: BuilderToml = toml::from_str(&raw).map_err(|e| {
            SkwError::ConfigInvalid(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self {
            build_dir: parsed.paths.build_dir,
            package_dir: parsed.paths.package_dir,
            profiles_dir: parsed.paths.profiles_dir,
            skel_dir: parsed.paths.skel_dir,
        })
    }

    /// Directory holding a profile's config files and templates.
    pub fn profile_dir(&self, book: &str, profile: &str) -> PathBuf {
        self.profiles_dir.join(book).join(profile)
    }

    /// Per-stage output root under the build directory.
    pub fn stage_dir(&self, stage: &str, book: &str, profile: &str) -> PathBuf {
        self.build_dir.join(stage).join(book).join(profile)
    }
}

/// Replace every recognized `${key}` placeholder in `value`.
///
/// Unrecognized placeholders are left untouched so config authors get the
/// literal text back instead of a hard failure.
pub fn substitute(value: &str, vars: &[(&str, &str)]) -> String {
    let mut out = value.to_string();
    for (key, replacement) in vars {
        let needle = format!("${{{key}}}");
        if out.contains(&needle) {
            out = out.replace(&needle, replacement);
        }
    }
    out
}

/// The standard `${book}` / `${profile}` / `${build_dir}` variable set.
pub fn base_vars<'a>(cfg: &'a BuilderConfig, book: &'a str, profile: &'a str) -> Vec<(&'a str, String)> {
    vec![
        ("book", book.to_string()),
        ("profile", profile.to_string()),
        ("build_dir", cfg.build_dir.display().to_string()),
        ("package_dir", cfg.package_dir.display().to_string()),
        ("profiles_dir", cfg.profiles_dir.display().to_string()),
    ]
}

/// Borrow a `(&str, String)` variable set as `(&str, &str)` pairs.
pub fn as_pairs<'a>(vars: &'a [(&'a str, String)]) -> Vec<(&'a str, &'a str)> {
    vars.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_known_keys() {
        let out = substitute(
            "${build_dir}/books/${book}/book.xml",
            &[("build_dir", "/tmp/build"), ("book", "lfs")],
        );
        assert_eq!(out, "/tmp/build/books/lfs/book.xml");
    }

    #[test]
    fn substitute_leaves_unknown_keys() {
        let out = substitute("${mystery}/x", &[("book", "lfs")]);
        assert_eq!(out, "${mystery}/x");
    }

    #[test]
    fn load_reports_missing_config() {
        let err = BuilderConfig::load(Path::new("/nonexistent/builder.toml")).unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigMissing");
    }

    #[test]
    fn load_reports_invalid_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("builder.toml");
        std::fs::write(&path, "paths = 3").unwrap();
        let err = BuilderConfig::load(&path).unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigInvalid");
    }

    #[test]
    fn load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("builder.toml");
        std::fs::write(
            &path,
            r#"
[paths]
build_dir = "build"
package_dir = "packages"
profiles_dir = "profiles"
skel_dir = "skel"
"#,
        )
        .unwrap();
        let cfg = BuilderConfig::load(&path).unwrap();
        assert_eq!(cfg.build_dir, PathBuf::from("build"));
        assert_eq!(cfg.profile_dir("lfs", "systemd"), PathBuf::from("profiles/lfs/systemd"));
        assert_eq!(
            cfg.stage_dir("parser", "lfs", "systemd"),
            PathBuf::from("build/parser/lfs/systemd")
        );
    }
}
