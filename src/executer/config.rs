//! Typed `executer.toml` schema and package-filename rendering.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::PackageFormat;
use crate::error::SkwError;
use crate::plan::BuildEntry;

/// Placeholders the package filename template may use.
const TEMPLATE_PLACEHOLDERS: &[&str] = &[
    "book",
    "profile",
    "chapter_id",
    "section_id",
    "package_name",
    "package_version",
];

#[derive(Debug, Deserialize)]
struct ExecuterToml {
    main: MainToml,
    #[serde(default)]
    chroot: Selector,
    #[serde(default)]
    host: Selector,
    #[serde(default)]
    package: Selector,
    #[serde(default)]
    packages: ExcludeTable,
    #[serde(default)]
    extract: ExtractTable,
}

#[derive(Debug, Deserialize)]
struct MainToml {
    chroot_dir: Option<String>,
    #[serde(default)]
    upload_repo: String,
    #[serde(default)]
    download_repos: Vec<String>,
    #[serde(default = "default_format")]
    package_format: String,
    package_name_template: String,
    #[serde(default = "default_extract_dir")]
    default_extract_dir: String,
    #[serde(default = "default_true")]
    require_confirm_root: bool,
}

fn default_format() -> String {
    "tar.xz".to_string()
}

fn default_extract_dir() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// Id lists selecting entries by package, section or chapter.
#[derive(Debug, Default, Deserialize)]
pub struct Selector {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<String>,
}

impl Selector {
    pub fn matches(&self, entry: &BuildEntry) -> bool {
        (!entry.package_name.is_empty() && self.packages.iter().any(|p| *p == entry.package_name))
            || self.sections.iter().any(|s| *s == entry.section_id)
            || self.chapters.iter().any(|c| *c == entry.chapter_id)
    }

    /// Like [`Selector::matches`], also accepting `name-version` package ids.
    pub fn matches_versioned(&self, entry: &BuildEntry) -> bool {
        if self.matches(entry) {
            return true;
        }
        if entry.package_name.is_empty() {
            return false;
        }
        let versioned = format!("{}-{}", entry.package_name, entry.package_version);
        self.packages.iter().any(|p| *p == versioned)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExcludeTable {
    #[serde(default)]
    exclude: Selector,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractTable {
    #[serde(default)]
    targets: ExtractTargets,
}

/// Per-id extraction target overrides; package beats section beats chapter.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractTargets {
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default)]
    pub chapters: BTreeMap<String, String>,
}

impl ExtractTargets {
    pub fn lookup(&self, entry: &BuildEntry) -> Option<&str> {
        crate::lookup::first_defined([
            self.packages.get(&entry.package_name),
            self.sections.get(&entry.section_id),
            self.chapters.get(&entry.chapter_id),
        ])
        .map(String::as_str)
    }
}

/// Resolved executer configuration with variables expanded.
#[derive(Debug)]
pub struct ExecuterConfig {
    pub chroot_dir: Option<PathBuf>,
    pub upload_repo: String,
    pub download_repos: Vec<String>,
    pub package_format: PackageFormat,
    pub package_name_template: String,
    pub default_extract_dir: PathBuf,
    pub require_confirm_root: bool,
    pub chroot: Selector,
    pub host: Selector,
    pub package: Selector,
    pub package_exclude: Selector,
    pub extract_targets: ExtractTargets,
}

impl ExecuterConfig {
    pub fn load(path: &Path, vars: &[(&str, &str)]) -> Result<Self> {
        if !path.is_file() {
            return Err(SkwError::ConfigMissing(path.display().to_string()).into());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
        let parsed: ExecuterToml = toml::from_str(&raw)
            .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;

        let expand = |value: &str| crate::config::substitute(value, vars);
        let template = parsed.main.package_name_template;
        validate_template(&template)?;

        Ok(Self {
            chroot_dir: parsed.main.chroot_dir.map(|d| PathBuf::from(expand(&d))),
            upload_repo: expand(&parsed.main.upload_repo),
            download_repos: parsed.main.download_repos.iter().map(|r| expand(r)).collect(),
            package_format: PackageFormat::parse(&parsed.main.package_format)?,
            package_name_template: template,
            default_extract_dir: PathBuf::from(expand(&parsed.main.default_extract_dir)),
            require_confirm_root: parsed.main.require_confirm_root,
            chroot: parsed.chroot,
            host: parsed.host,
            package: parsed.package,
            package_exclude: parsed.packages.exclude,
            extract_targets: parsed.extract.targets,
        })
    }

    /// Render the package filename for an entry, extension included.
    pub fn package_file_name(&self, book: &str, profile: &str, entry: &BuildEntry) -> String {
        let package_name = if entry.package_name.is_empty() {
            if entry.section_id.is_empty() {
                "noname"
            } else {
                entry.section_id.as_str()
            }
        } else {
            entry.package_name.as_str()
        };
        let package_version = if entry.package_version.is_empty() {
            "noversion"
        } else {
            entry.package_version.as_str()
        };

        let rendered = self
            .package_name_template
            .replace("{book}", book)
            .replace("{profile}", profile)
            .replace("{chapter_id}", &entry.chapter_id)
            .replace("{section_id}", &entry.section_id)
            .replace("{package_name}", package_name)
            .replace("{package_version}", package_version);
        format!("{rendered}.{}", self.package_format.extension())
    }
}

fn validate_template(template: &str) -> Result<()> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('}') else {
            return Err(SkwError::ConfigInvalid(format!(
                "package_name_template has an unterminated placeholder: '{template}'"
            ))
            .into());
        };
        let name = &tail[..close];
        if !TEMPLATE_PLACEHOLDERS.contains(&name) {
            return Err(SkwError::ConfigInvalid(format!(
                "package_name_template uses unknown placeholder '{{{name}}}'"
            ))
            .into());
        }
        rest = &tail[close + 1..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SourceSet;
    use tempfile::TempDir;

    fn entry(chapter: &str, section: &str, pkg: &str, ver: &str) -> BuildEntry {
        BuildEntry {
            source_book: "lfs".into(),
            chapter_id: chapter.into(),
            section_id: section.into(),
            package_name: pkg.into(),
            package_version: ver.into(),
            sources: SourceSet::default(),
            dependencies: vec![],
            build_instructions: vec![],
        }
    }

    fn load(toml_text: &str) -> Result<ExecuterConfig> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("executer.toml");
        fs::write(&path, toml_text).unwrap();
        ExecuterConfig::load(&path, &[("package_dir", "/srv/packages"), ("book", "lfs")])
    }

    const MINIMAL: &str = r#"
[main]
package_name_template = "{book}-{profile}-{chapter_id}-{package_name}-{package_version}"
upload_repo = "${package_dir}/repo"
download_repos = ["${package_dir}/repo", "https://cache.example.org/lfs"]
"#;

    #[test]
    fn filename_rendering_matches_template() {
        let cfg = load(MINIMAL).unwrap();
        let name = cfg.package_file_name("lfs", "systemd", &entry("ch-05", "binutils", "binutils", "2.41"));
        assert_eq!(name, "lfs-systemd-ch-05-binutils-2.41.tar.xz");
    }

    #[test]
    fn filename_falls_back_for_empty_fields() {
        let cfg = load(MINIMAL).unwrap();
        let name = cfg.package_file_name("lfs", "systemd", &entry("ch-07", "cleanup", "", ""));
        assert_eq!(name, "lfs-systemd-ch-07-cleanup-noversion.tar.xz");
    }

    #[test]
    fn variables_expand_in_repos() {
        let cfg = load(MINIMAL).unwrap();
        assert_eq!(cfg.upload_repo, "/srv/packages/repo");
        assert_eq!(cfg.download_repos[0], "/srv/packages/repo");
        assert_eq!(cfg.download_repos[1], "https://cache.example.org/lfs");
    }

    #[test]
    fn unknown_template_placeholder_is_config_error() {
        let err = load(
            r#"
[main]
package_name_template = "{book}-{bogus}"
"#,
        )
        .unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigInvalid");
    }

    #[test]
    fn unknown_format_is_fatal() {
        let err = load(
            r#"
[main]
package_name_template = "{book}"
package_format = "zip"
"#,
        )
        .unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigInvalid");
    }

    #[test]
    fn selector_matching() {
        let cfg = load(&format!(
            "{MINIMAL}
[chroot]
chapters = [\"ch-06\"]

[host]
packages = [\"binutils\"]

[package]
packages = [\"binutils-2.41\"]
sections = [\"gcc\"]

[packages.exclude]
sections = [\"gcc\"]
"
        ))
        .unwrap();

        let binutils = entry("ch-05", "binutils", "binutils", "2.41");
        assert!(cfg.host.matches(&binutils));
        assert!(!cfg.chroot.matches(&binutils));
        assert!(cfg.chroot.matches(&entry("ch-06", "glibc", "glibc", "2.38")));

        // name-version ids only count for packaging decisions.
        assert!(!cfg.package.matches(&binutils));
        assert!(cfg.package.matches_versioned(&binutils));
        assert!(cfg.package_exclude.matches(&entry("ch-05", "gcc", "gcc", "13.2")));
    }

    #[test]
    fn extract_target_priority() {
        let cfg = load(&format!(
            "{MINIMAL}
[extract.targets.packages]
binutils = \"/opt/binutils\"

[extract.targets.sections]
binutils = \"/opt/by-section\"

[extract.targets.chapters]
ch-05 = \"/opt/by-chapter\"
"
        ))
        .unwrap();
        let e = entry("ch-05", "binutils", "binutils", "2.41");
        assert_eq!(cfg.extract_targets.lookup(&e), Some("/opt/binutils"));
        let e = entry("ch-05", "binutils", "", "");
        assert_eq!(cfg.extract_targets.lookup(&e), Some("/opt/by-section"));
        let e = entry("ch-05", "gcc", "gcc", "13.2");
        assert_eq!(cfg.extract_targets.lookup(&e), Some("/opt/by-chapter"));
    }
}
