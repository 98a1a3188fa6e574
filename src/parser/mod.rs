//! Parser stage: extract an ordered, typed build plan from the book XML.

pub mod config;
pub mod custom;
pub mod depgraph;
pub mod xpath;

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::{as_pairs, base_vars, substitute, BuilderConfig};
use crate::plan::{self, BuildEntry, SourceSet};

use config::ParserConfig;
use xpath::{node_id, BookXml, XpathEngine};

/// Location of the plan JSON for a profile, as configured in `parser.toml`.
pub fn plan_path(cfg: &BuilderConfig, book: &str, profile: &str) -> Result<PathBuf> {
    let pcfg = ParserConfig::load(&cfg.profile_dir(book, profile).join("parser.toml"))?;
    let vars = base_vars(cfg, book, profile);
    let output_file = substitute(&pcfg.main.output_file, &as_pairs(&vars));
    Ok(cfg.stage_dir("parser", book, profile).join(output_file))
}

/// Parse the book and return the dependency-ordered plan without writing it.
pub fn parse_book(cfg: &BuilderConfig, book: &str, profile: &str) -> Result<Vec<BuildEntry>> {
    let pcfg = ParserConfig::load(&cfg.profile_dir(book, profile).join("parser.toml"))?;
    parse_with(cfg, &pcfg, book, profile)
}

/// Parse the book and persist the plan JSON; returns the output path.
pub fn run(cfg: &BuilderConfig, book: &str, profile: &str) -> Result<PathBuf> {
    let pcfg = ParserConfig::load(&cfg.profile_dir(book, profile).join("parser.toml"))?;
    let entries = parse_with(cfg, &pcfg, book, profile)?;

    let vars = base_vars(cfg, book, profile);
    let output_file = substitute(&pcfg.main.output_file, &as_pairs(&vars));
    let output_path = cfg.stage_dir("parser", book, profile).join(output_file);
    plan::write(&output_path, &entries)?;

    info!(
        "parser complete: {} entries written to {}",
        entries.len(),
        output_path.display()
    );
    Ok(output_path)
}

fn parse_with(
    cfg: &BuilderConfig,
    pcfg: &ParserConfig,
    book: &str,
    profile: &str,
) -> Result<Vec<BuildEntry>> {
    let vars = base_vars(cfg, book, profile);
    let xml_path = PathBuf::from(substitute(&pcfg.main.xml_path, &as_pairs(&vars)));
    let book_xml = BookXml::load(&xml_path)?;
    let engine = XpathEngine::new();

    let mut entries = extract_entries(pcfg, book, &book_xml, &engine)?;

    for config_file in &pcfg.custom_code.configs {
        let config_path = cfg.profile_dir(book, profile).join(config_file);
        let mut injected = custom::load_entries(&config_path, book, &book_xml, &engine)?;
        entries.append(&mut injected);
    }

    plan::validate(&entries)?;
    depgraph::order_entries(entries, &pcfg.ordered_build_groups)
}

/// Hierarchical XPath lookup with entry-context `${key}` expansion.
fn lookup_expr(
    pcfg: &ParserConfig,
    key: &str,
    chapter_id: &str,
    section_id: &str,
    ctx: &[(&str, String)],
) -> Option<String> {
    pcfg.xpath_for(key, chapter_id, section_id)
        .map(|expr| substitute(expr, &as_pairs(ctx)))
}

fn extract_entries(
    pcfg: &ParserConfig,
    book: &str,
    book_xml: &BookXml,
    engine: &XpathEngine,
) -> Result<Vec<BuildEntry>> {
    let doc = book_xml.document();
    let chapter_expr = pcfg.xpaths.get("chapter_id").map(String::as_str);

    let mut entries = Vec::new();
    for chapter in engine.nodes(doc.root(), chapter_expr)? {
        let Some(chapter_id) = node_id(&chapter) else {
            warn!("chapter node without an 'id' attribute; skipped");
            continue;
        };
        if !pcfg.chapter_filters.allows(&chapter_id) {
            continue;
        }

        let section_expr = pcfg.xpath_for("section_id", &chapter_id, "");
        for section in engine.nodes(chapter, section_expr)? {
            let Some(section_id) = node_id(&section) else {
                warn!("section node without an 'id' attribute in chapter '{chapter_id}'; skipped");
                continue;
            };
            if !pcfg.section_filters.allows(&section_id) {
                continue;
            }

            let mut ctx: Vec<(&str, String)> = vec![
                ("book", book.to_string()),
                ("chapter_id", chapter_id.clone()),
                ("section_id", section_id.clone()),
            ];

            let package_name = engine
                .first_string(
                    section,
                    lookup_expr(pcfg, "package_name", &chapter_id, &section_id, &ctx).as_deref(),
                )?
                .unwrap_or_default();
            ctx.push(("package_name", package_name.clone()));

            let package_version = engine
                .first_string(
                    section,
                    lookup_expr(pcfg, "package_version", &chapter_id, &section_id, &ctx).as_deref(),
                )?
                .unwrap_or_default();
            ctx.push(("package_version", package_version.clone()));

            let expr = |key: &str| lookup_expr(pcfg, key, &chapter_id, &section_id, &ctx);
            let sources = SourceSet {
                titles: engine.strings(section, expr("source_titles").as_deref())?,
                urls: engine.strings(section, expr("source_urls").as_deref())?,
                checksums: engine.strings(section, expr("source_checksums").as_deref())?,
            };
            let dependencies = engine.strings(section, expr("dependencies").as_deref())?;
            let build_instructions =
                engine.strings(section, expr("build_instructions").as_deref())?;

            entries.push(BuildEntry {
                source_book: book.to_string(),
                chapter_id: chapter_id.clone(),
                section_id,
                package_name,
                package_version,
                sources,
                dependencies,
                build_instructions,
            });
        }
    }
    Ok(entries)
}
