//! The build plan: the typed unit of work that flows through all three stages.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::SkwError;

/// Upstream source references for one entry, parallel by index where present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet {
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub checksums: Vec<String>,
}

/// One unit of work, typically one package of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEntry {
    pub source_book: String,
    pub chapter_id: String,
    pub section_id: String,
    pub package_name: String,
    pub package_version: String,
    pub sources: SourceSet,
    pub dependencies: Vec<String>,
    pub build_instructions: Vec<String>,
}

impl BuildEntry {
    /// Identifier used for graph nodes and staging directories. Entries
    /// without a package name fall back to their section id.
    pub fn node_name(&self) -> &str {
        if self.package_name.is_empty() {
            &self.section_id
        } else {
            &self.package_name
        }
    }
}

/// Enforce the plan invariants before anything downstream consumes it.
pub fn validate(entries: &[BuildEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.chapter_id.is_empty() {
            return Err(SkwError::XmlMalformed(format!(
                "section '{}' has an empty chapter id",
                entry.section_id
            ))
            .into());
        }
        if !seen.insert((entry.chapter_id.clone(), entry.section_id.clone())) {
            return Err(SkwError::XmlMalformed(format!(
                "duplicate section '{}' in chapter '{}'",
                entry.section_id, entry.chapter_id
            ))
            .into());
        }
        let urls = entry.sources.urls.len();
        let sums = entry.sources.checksums.len();
        if urls != 0 && sums != 0 && urls != sums {
            return Err(SkwError::XmlMalformed(format!(
                "section '{}': {} source urls but {} checksums",
                entry.section_id, urls, sums
            ))
            .into());
        }
    }
    Ok(())
}

/// Write the plan as pretty-printed UTF-8 JSON, creating parent directories.
pub fn write(path: &Path, entries: &[BuildEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating plan directory '{}'", parent.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(entries).context("encoding build plan")?;
    fs::write(path, bytes).with_context(|| format!("writing build plan '{}'", path.display()))?;
    Ok(())
}

/// Read a plan back; the scripter and executer treat it as immutable input.
pub fn read(path: &Path) -> Result<Vec<BuildEntry>> {
    if !path.is_file() {
        return Err(SkwError::ConfigMissing(format!(
            "{} (run 'skw-build parse' first)",
            path.display()
        ))
        .into());
    }
    let bytes =
        fs::read(path).with_context(|| format!("reading build plan '{}'", path.display()))?;
    let entries: Vec<BuildEntry> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing build plan '{}'", path.display()))?;
    Ok(entries)
}
