//! Typed `scripter.toml` schema.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::SkwError;
use crate::lookup::first_defined;
use crate::plan::BuildEntry;

#[derive(Debug, Deserialize)]
pub struct ScripterConfig {
    pub main: ScripterMain,
    #[serde(default)]
    pub global: ScopeRules,
    /// Per-chapter / per-section / per-package override tables, keyed by id.
    #[serde(flatten)]
    pub scopes: BTreeMap<String, ScopeRules>,
}

#[derive(Debug, Deserialize)]
pub struct ScripterMain {
    pub default_template: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeRules {
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub regex: RegexPatterns,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegexPatterns {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl ScripterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SkwError::ConfigMissing(path.display().to_string()).into());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
        let cfg: ScripterConfig = toml::from_str(&raw)
            .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
        Ok(cfg)
    }

    /// Template filename for an entry: package > section > chapter > default.
    pub fn template_for(&self, entry: &BuildEntry) -> &str {
        let scope_template = |id: &str| {
            if id.is_empty() {
                None
            } else {
                self.scopes.get(id).and_then(|s| s.template.as_deref())
            }
        };
        first_defined([
            scope_template(&entry.package_name),
            scope_template(&entry.section_id),
            scope_template(&entry.chapter_id),
        ])
        .unwrap_or(&self.main.default_template)
    }

    /// Raw rewrite rules in application order:
    /// global, then chapter, section and package specific.
    pub fn rules_for(&self, entry: &BuildEntry) -> Vec<&str> {
        let mut rules: Vec<&str> = self
            .global
            .regex
            .patterns
            .iter()
            .map(String::as_str)
            .collect();
        for id in [&entry.chapter_id, &entry.section_id, &entry.package_name] {
            if id.is_empty() {
                continue;
            }
            if let Some(scope) = self.scopes.get(id.as_str()) {
                rules.extend(scope.regex.patterns.iter().map(String::as_str));
            }
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SourceSet;

    fn entry(chapter: &str, section: &str, pkg: &str) -> BuildEntry {
        BuildEntry {
            source_book: "lfs".into(),
            chapter_id: chapter.into(),
            section_id: section.into(),
            package_name: pkg.into(),
            package_version: String::new(),
            sources: SourceSet::default(),
            dependencies: vec![],
            build_instructions: vec![],
        }
    }

    fn sample() -> ScripterConfig {
        toml::from_str(
            r#"
[main]
default_template = "template.script"

[global.regex]
patterns = ["s/foo/bar/"]

["ch-05"]
template = "chapter.script"

["ch-05".regex]
patterns = ["s/a/b/"]

[binutils]
template = "binutils.script"

[binutils.regex]
patterns = ["r/x(.)/y$1/"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn template_priority_package_beats_section_beats_chapter() {
        let cfg = sample();
        assert_eq!(cfg.template_for(&entry("ch-05", "sec", "binutils")), "binutils.script");
        assert_eq!(cfg.template_for(&entry("ch-05", "sec", "gcc")), "chapter.script");
        assert_eq!(cfg.template_for(&entry("ch-07", "sec", "gcc")), "template.script");
    }

    #[test]
    fn rules_collected_global_then_specific() {
        let cfg = sample();
        let rules = cfg.rules_for(&entry("ch-05", "sec", "binutils"));
        assert_eq!(rules, vec!["s/foo/bar/", "s/a/b/", "r/x(.)/y$1/"]);
    }

    #[test]
    fn missing_config_is_fatal() {
        let err = ScripterConfig::load(Path::new("/nonexistent/scripter.toml")).unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigMissing");
    }
}
