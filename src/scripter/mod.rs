//! Scripter stage: compile the build plan into numbered shell scripts.

pub mod config;
pub mod rewrite;
pub mod template;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::BuilderConfig;
use crate::error::SkwError;
use crate::plan::{self, BuildEntry};

use config::ScripterConfig;
use rewrite::RewriteRule;

/// Script filename for the entry at plan position `idx`.
pub fn script_filename(idx: usize, entry: &BuildEntry) -> String {
    format!("{idx:04}_{}_{}.sh", entry.chapter_id, entry.section_id)
}

/// Generate one executable script per plan entry.
///
/// Re-running over an unchanged plan and config reproduces every script
/// byte for byte.
pub fn run(cfg: &BuilderConfig, book: &str, profile: &str) -> Result<PathBuf> {
    let profile_dir = cfg.profile_dir(book, profile);
    let scfg = ScripterConfig::load(&profile_dir.join("scripter.toml"))?;

    let default_path = profile_dir.join(&scfg.main.default_template);
    if !default_path.is_file() {
        return Err(SkwError::ConfigMissing(format!(
            "default template {}",
            default_path.display()
        ))
        .into());
    }
    let default_template = fs::read_to_string(&default_path)
        .with_context(|| format!("reading default template '{}'", default_path.display()))?;

    let entries = plan::read(&crate::parser::plan_path(cfg, book, profile)?)?;

    let scripts_dir = cfg.stage_dir("scripter", book, profile).join("scripts");
    fs::create_dir_all(&scripts_dir)
        .with_context(|| format!("creating scripts directory '{}'", scripts_dir.display()))?;

    for (idx, entry) in entries.iter().enumerate() {
        let content = render_script(&scfg, &profile_dir, &default_template, entry);
        let script_path = scripts_dir.join(script_filename(idx, entry));
        fs::write(&script_path, content)
            .with_context(|| format!("writing script '{}'", script_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("setting permissions '{}'", script_path.display()))?;
        }
    }

    info!(
        "scripter complete: {} scripts written to {}",
        entries.len(),
        scripts_dir.display()
    );
    Ok(scripts_dir)
}

fn render_script(
    scfg: &ScripterConfig,
    profile_dir: &Path,
    default_template: &str,
    entry: &BuildEntry,
) -> String {
    let template_name = scfg.template_for(entry);
    let template_path = profile_dir.join(template_name);
    let template = match fs::read_to_string(&template_path) {
        Ok(content) => content,
        Err(_) => {
            warn!(
                "template '{}' not found for section '{}'; falling back to default",
                template_path.display(),
                entry.section_id
            );
            default_template.to_string()
        }
    };

    let mut content = template::expand(entry, &template);
    for raw in scfg.rules_for(entry) {
        match RewriteRule::parse(raw) {
            Ok(rule) => match rule.apply(&content) {
                Ok(next) => content = next,
                Err(e) => warn!("skipping rewrite rule: {e}"),
            },
            Err(e) => warn!("skipping rewrite rule: {e}"),
        }
    }
    content
}
