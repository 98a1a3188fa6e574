//! Book and profile scaffolding: listing, creation from skeleton files.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::config::BuilderConfig;
use crate::error::SkwError;

/// Skeleton files copied into a new profile, `(source, destination)`.
const PROFILE_SKEL_FILES: &[(&str, &str)] = &[
    ("parser.toml.skel", "parser.toml"),
    ("scripter.toml.skel", "scripter.toml"),
    ("executer.toml.skel", "executer.toml"),
    ("template.script", "template.script"),
];

/// Create `builder.toml` from the skeleton if it does not exist yet.
pub fn configure(config_path: &Path, skel_dir: &Path) -> Result<()> {
    if config_path.exists() {
        println!("{} already exists; review it manually.", config_path.display());
        return Ok(());
    }
    let skel = skel_dir.join("builder.toml.skel");
    if !skel.is_file() {
        return Err(SkwError::ConfigMissing(skel.display().to_string()).into());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory '{}'", parent.display()))?;
    }
    fs::copy(&skel, config_path)
        .with_context(|| format!("copying '{}' to '{}'", skel.display(), config_path.display()))?;
    println!("initialized {}; edit it before adding books.", config_path.display());
    Ok(())
}

/// Immediate subdirectories of the profiles root.
pub fn list_books(cfg: &BuilderConfig) -> Result<Vec<String>> {
    list_subdirs(&cfg.profiles_dir)
}

/// Immediate subdirectories of one book.
pub fn list_profiles(cfg: &BuilderConfig, book: &str) -> Result<Vec<String>> {
    let book_dir = cfg.profiles_dir.join(book);
    if !book_dir.is_dir() {
        bail!("book '{book}' not found under {}", cfg.profiles_dir.display());
    }
    list_subdirs(&book_dir)
}

fn list_subdirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading directory '{}'", dir.display()))?
    {
        let entry = entry.with_context(|| format!("iterating directory '{}'", dir.display()))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Create a new book directory seeded with `book.toml`.
pub fn add_book(cfg: &BuilderConfig, name: &str) -> Result<()> {
    let book_dir = cfg.profiles_dir.join(name);
    if book_dir.exists() {
        bail!("book '{name}' already exists at {}", book_dir.display());
    }
    let skel = cfg.skel_dir.join("book.toml.skel");
    if !skel.is_file() {
        return Err(SkwError::ConfigMissing(skel.display().to_string()).into());
    }
    fs::create_dir_all(&book_dir)
        .with_context(|| format!("creating book directory '{}'", book_dir.display()))?;
    fs::copy(&skel, book_dir.join("book.toml"))
        .with_context(|| format!("copying '{}' into '{}'", skel.display(), book_dir.display()))?;
    println!("book '{name}' created at {}; edit book.toml before install-book.", book_dir.display());
    Ok(())
}

/// Create a new profile under a book, seeded with the stage configs.
pub fn add_profile(cfg: &BuilderConfig, book: &str, name: &str) -> Result<()> {
    let book_dir = cfg.profiles_dir.join(book);
    if !book_dir.is_dir() {
        bail!("book '{book}' does not exist; run add-book first");
    }
    let profile_dir = book_dir.join(name);
    if profile_dir.exists() {
        bail!("profile '{name}' already exists under '{book}'");
    }
    fs::create_dir_all(&profile_dir)
        .with_context(|| format!("creating profile directory '{}'", profile_dir.display()))?;

    for (src_name, dest_name) in PROFILE_SKEL_FILES {
        let src = cfg.skel_dir.join(src_name);
        if !src.is_file() {
            return Err(SkwError::ConfigMissing(src.display().to_string()).into());
        }
        fs::copy(&src, profile_dir.join(dest_name)).with_context(|| {
            format!("copying '{}' into '{}'", src.display(), profile_dir.display())
        })?;
    }
    println!("profile '{name}' created under book '{book}' at {}", profile_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, BuilderConfig) {
        let tmp = TempDir::new().unwrap();
        let cfg = BuilderConfig {
            build_dir: tmp.path().join("build"),
            package_dir: tmp.path().join("packages"),
            profiles_dir: tmp.path().join("profiles"),
            skel_dir: tmp.path().join("skel"),
        };
        fs::create_dir_all(&cfg.skel_dir).unwrap();
        for name in [
            "builder.toml.skel",
            "book.toml.skel",
            "parser.toml.skel",
            "scripter.toml.skel",
            "executer.toml.skel",
            "template.script",
        ] {
            fs::write(cfg.skel_dir.join(name), format!("# skeleton {name}\n")).unwrap();
        }
        (tmp, cfg)
    }

    #[test]
    fn add_and_list_books_and_profiles() {
        let (_tmp, cfg) = fixture();
        assert!(list_books(&cfg).unwrap().is_empty());

        add_book(&cfg, "lfs").unwrap();
        assert_eq!(list_books(&cfg).unwrap(), vec!["lfs"]);
        assert!(cfg.profiles_dir.join("lfs/book.toml").is_file());

        add_profile(&cfg, "lfs", "systemd").unwrap();
        assert_eq!(list_profiles(&cfg, "lfs").unwrap(), vec!["systemd"]);
        let profile_dir = cfg.profile_dir("lfs", "systemd");
        for name in ["parser.toml", "scripter.toml", "executer.toml", "template.script"] {
            assert!(profile_dir.join(name).is_file(), "missing {name}");
        }
    }

    #[test]
    fn duplicates_are_rejected() {
        let (_tmp, cfg) = fixture();
        add_book(&cfg, "lfs").unwrap();
        assert!(add_book(&cfg, "lfs").is_err());
        add_profile(&cfg, "lfs", "systemd").unwrap();
        assert!(add_profile(&cfg, "lfs", "systemd").is_err());
        assert!(add_profile(&cfg, "nope", "systemd").is_err());
    }

    #[test]
    fn configure_copies_skeleton_once() {
        let (tmp, cfg) = fixture();
        let config_path = tmp.path().join("builder.toml");
        configure(&config_path, &cfg.skel_dir).unwrap();
        assert!(config_path.is_file());
        // Second call leaves the file alone.
        fs::write(&config_path, "edited").unwrap();
        configure(&config_path, &cfg.skel_dir).unwrap();
        assert_eq!(fs::read_to_string(&config_path).unwrap(), "edited");
    }
}
