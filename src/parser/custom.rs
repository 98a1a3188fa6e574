//! Synthetic build entries injected from `custom-*.toml` profile files.

use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::SkwError;
use crate::plan::{BuildEntry, SourceSet};

use super::xpath::{BookXml, XpathEngine};

#[derive(Debug, Deserialize)]
struct CustomConfig {
    #[serde(default)]
    custom_packages: Vec<CustomPackage>,
}

#[derive(Debug, Deserialize)]
struct CustomPackage {
    name: String,
    #[serde(default)]
    version: String,
    chapter_id: Option<String>,
    section_id: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    /// Inline shell commands, emitted first.
    #[serde(default)]
    commands: Vec<String>,
    /// XPath expressions evaluated against the main book; every matched
    /// node contributes one command string, in document order.
    #[serde(default)]
    xpath_commands: Vec<String>,
}

/// Load one custom-package config and produce its entries.
pub fn load_entries(
    config_path: &Path,
    book_name: &str,
    book: &BookXml,
    engine: &XpathEngine,
) -> Result<Vec<BuildEntry>> {
    if !config_path.is_file() {
        return Err(SkwError::ConfigMissing(config_path.display().to_string()).into());
    }
    let raw = fs::read_to_string(config_path)
        .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", config_path.display(), e)))?;
    let cfg: CustomConfig = toml::from_str(&raw)
        .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", config_path.display(), e)))?;

    let mut entries = Vec::new();
    for pkg in cfg.custom_packages {
        let mut build_instructions = pkg.commands.clone();
        for expr in &pkg.xpath_commands {
            let mut commands = engine.strings(book.document().root(), Some(expr))?;
            build_instructions.append(&mut commands);
        }

        let fallback_id = format!("custom-{}", pkg.name);
        entries.push(BuildEntry {
            source_book: book_name.to_string(),
            chapter_id: pkg.chapter_id.unwrap_or_else(|| fallback_id.clone()),
            section_id: pkg.section_id.unwrap_or(fallback_id),
            package_name: pkg.name,
            package_version: pkg.version,
            sources: SourceSet::default(),
            dependencies: pkg.dependencies,
            build_instructions,
        });
    }
    Ok(entries)
}
