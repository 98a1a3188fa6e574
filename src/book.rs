//! Book installation: clone or update the upstream repo and render the XML.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::config::{substitute, BuilderConfig};
use crate::error::SkwError;

#[derive(Debug, Deserialize)]
struct BookToml {
    main: BookMain,
}

#[derive(Debug, Deserialize)]
struct BookMain {
    repo_path: String,
    version: String,
    #[serde(default)]
    rev: String,
    make_command: String,
    output_file: String,
}

/// Clone or update the book repo, check out the pinned version, and run the
/// configured make command to render the XML.
///
/// An existing repo directory must be a git checkout; anything else is left
/// untouched and reported.
pub fn install(cfg: &BuilderConfig, book: &str) -> Result<()> {
    let book_toml = cfg.profiles_dir.join(book).join("book.toml");
    if !book_toml.is_file() {
        return Err(SkwError::ConfigMissing(format!(
            "{} (run 'skw-build add-book' first)",
            book_toml.display()
        ))
        .into());
    }
    let raw = fs::read_to_string(&book_toml)
        .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", book_toml.display(), e)))?;
    let parsed: BookToml = toml::from_str(&raw)
        .map_err(|e| SkwError::ConfigInvalid(format!("{}: {}", book_toml.display(), e)))?;
    let main = parsed.main;

    let book_dir = cfg.build_dir.join("books").join(book);
    let repo_dir = book_dir.join("repo");

    if !repo_dir.exists() {
        info!("cloning {} into {}", main.repo_path, repo_dir.display());
        fs::create_dir_all(&book_dir)
            .with_context(|| format!("creating book directory '{}'", book_dir.display()))?;
        run_git(&["clone", &main.repo_path, &repo_dir.display().to_string()], None)?;
    } else if repo_dir.join(".git").exists() {
        info!("updating existing checkout at {}", repo_dir.display());
        run_git(&["fetch", "--all"], Some(&repo_dir))?;
    } else {
        return Err(SkwError::ExternalToolFailed {
            tool: "git".to_string(),
            detail: format!(
                "'{}' exists but is not a git checkout; move it aside and retry",
                repo_dir.display()
            ),
        }
        .into());
    }

    run_git(&["checkout", &main.version], Some(&repo_dir))?;
    run_git(&["pull", "--ff-only"], Some(&repo_dir))?;

    let make_command = substitute(
        &main.make_command,
        &[
            ("book_dir", book_dir.display().to_string().as_str()),
            ("rev", main.rev.as_str()),
        ],
    );
    info!("running make command: {make_command}");
    let status = Command::new("sh")
        .arg("-c")
        .arg(&make_command)
        .current_dir(&repo_dir)
        .status()
        .with_context(|| format!("spawning make command for book '{book}'"))?;
    if !status.success() {
        return Err(SkwError::ExternalToolFailed {
            tool: "make".to_string(),
            detail: format!("'{make_command}': {status}"),
        }
        .into());
    }

    let xml_output = book_dir.join(&main.output_file);
    if xml_output.is_file() {
        info!("book '{book}' installed; XML at {}", xml_output.display());
    } else {
        warn!(
            "book '{book}' built but expected XML '{}' was not produced",
            xml_output.display()
        );
    }
    Ok(())
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let status = cmd
        .status()
        .with_context(|| format!("spawning git {}", args.join(" ")))?;
    if !status.success() {
        return Err(SkwError::ExternalToolFailed {
            tool: "git".to_string(),
            detail: format!("git {}: {status}", args.join(" ")),
        }
        .into());
    }
    Ok(())
}

/// Path where the installed book XML is expected, for diagnostics.
pub fn xml_output_path(cfg: &BuilderConfig, book: &str, output_file: &str) -> PathBuf {
    cfg.build_dir.join("books").join(book).join(output_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture(book_toml: Option<&str>) -> (TempDir, BuilderConfig) {
        let tmp = TempDir::new().unwrap();
        let cfg = BuilderConfig {
            build_dir: tmp.path().join("build"),
            package_dir: tmp.path().join("packages"),
            profiles_dir: tmp.path().join("profiles"),
            skel_dir: tmp.path().join("skel"),
        };
        if let Some(content) = book_toml {
            let book_dir = cfg.profiles_dir.join("lfs");
            fs::create_dir_all(&book_dir).unwrap();
            fs::write(book_dir.join("book.toml"), content).unwrap();
        }
        (tmp, cfg)
    }

    #[test]
    fn missing_book_config_is_fatal() {
        let (_tmp, cfg) = fixture(None);
        let err = install(&cfg, "lfs").unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ConfigMissing");
    }

    #[test]
    fn non_git_repo_dir_is_refused() {
        let (_tmp, cfg) = fixture(Some(
            r#"
[main]
repo_path = "https://git.example.org/lfs.git"
version = "12.1"
rev = "systemd"
make_command = "make REV=${rev}"
output_file = "book.xml"
"#,
        ));
        let repo_dir = cfg.build_dir.join("books/lfs/repo");
        fs::create_dir_all(&repo_dir).unwrap();
        fs::write(repo_dir.join("stray-file"), "not a checkout").unwrap();

        let err = install(&cfg, "lfs").unwrap_err();
        assert_eq!(crate::error::category_tag(&err), "ExternalToolFailed");
    }
}
