//! Typed `parser.toml` schema.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::SkwError;
use crate::lookup::first_defined;

#[derive(Debug, Deserialize)]
pub struct ParserConfig {
    pub main: ParserMain,
    #[serde(default)]
    pub xpaths: BTreeMap<String, String>,
    #[serde(default)]
    pub chapter_filters: Filter,
    #[serde(default)]
    pub section_filters: Filter,
    #[serde(default)]
    pub custom_code: CustomCode,
    #[serde(default)]
    pub ordered_build_groups: Vec<OrderedGroup>,
    /// Per-chapter / per-section override tables, keyed by id.
    #[serde(flatten)]
    pub overrides: BTreeMap<String, ScopeOverride>,
}

#[derive(Debug, Deserialize)]
pub struct ParserMain {
    pub xml_path: String,
    pub output_file: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeOverride {
    #[serde(default)]
    pub xpaths: BTreeMap<String, String>,
}

/// Include/exclude id filter; exclude dominates, empty include permits all.
#[derive(Debug, Default, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Filter {
    pub fn allows(&self, id: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|i| i == id);
        included && !self.exclude.iter().any(|e| e == id)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomCode {
    #[serde(default)]
    pub configs: Vec<String>,
}

/// Explicit ordering for packages that form a dependency cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderedGroup {
    pub packages: Vec<String>,
    #[serde(default)]
    pub anchor: Option<String>,
}

impl ParserConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SkwError::ConfigMissing(path.display().to_string()).into());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
        let cfg: ParserConfig = toml::from_str(&raw)
            .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
        Ok(cfg)
    }

    /// Hierarchical XPath lookup: section override, then chapter, then global.
    pub fn xpath_for(&self, key: &str, chapter_id: &str, section_id: &str) -> Option<&str> {
        first_defined([
            self.overrides
                .get(section_id)
                .and_then(|o| o.xpaths.get(key)),
            self.overrides
                .get(chapter_id)
                .and_then(|o| o.xpaths.get(key)),
            self.xpaths.get(key),
        ])
        .map(String::as_str)
    }
}
