//! Executer stage: run scripts, package, verify, install and publish.

pub mod config;
pub mod install;
pub mod repo;
pub mod script;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::archive::{self, PackageMetadata};
use crate::config::{as_pairs, base_vars, BuilderConfig};
use crate::error::SkwError;
use crate::plan::{self, BuildEntry};

use config::ExecuterConfig;
use repo::RepoClient;
use script::{ExecMode, ScriptJob};

/// Per-script lifecycle states. Any state may fail, which halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Pending,
    CacheHit,
    Building,
    Packaging,
    Skipped,
    Installing,
    Publishing,
    Done,
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptState::Pending => "pending",
            ScriptState::CacheHit => "cache-hit",
            ScriptState::Building => "building",
            ScriptState::Packaging => "packaging",
            ScriptState::Skipped => "skipped",
            ScriptState::Installing => "installing",
            ScriptState::Publishing => "publishing",
            ScriptState::Done => "done",
        };
        write!(f, "{name}")
    }
}

struct StateTracker {
    script: String,
    state: ScriptState,
}

impl StateTracker {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            state: ScriptState::Pending,
        }
    }

    fn to(&mut self, next: ScriptState) {
        debug!("{}: {} -> {}", self.script, self.state, next);
        self.state = next;
    }
}

/// Run every generated script in filename order.
pub fn run(cfg: &BuilderConfig, book: &str, profile: &str, auto_confirm: bool) -> Result<()> {
    let executer = Executer::open(cfg, book, profile, auto_confirm)?;
    executer.run_all()
}

struct Executer<'a> {
    cfg: &'a BuilderConfig,
    ecfg: ExecuterConfig,
    client: RepoClient,
    book: &'a str,
    profile: &'a str,
    entries: Vec<BuildEntry>,
    scripts_dir: PathBuf,
    exec_dir: PathBuf,
    logs_dir: PathBuf,
    downloads_dir: PathBuf,
    chroot_dir: PathBuf,
    auto_confirm: bool,
}

impl<'a> Executer<'a> {
    fn open(
        cfg: &'a BuilderConfig,
        book: &'a str,
        profile: &'a str,
        auto_confirm: bool,
    ) -> Result<Self> {
        let profile_dir = cfg.profile_dir(book, profile);
        let vars = base_vars(cfg, book, profile);
        let ecfg = ExecuterConfig::load(&profile_dir.join("executer.toml"), &as_pairs(&vars))?;

        let entries = plan::read(&crate::parser::plan_path(cfg, book, profile)?)?;

        let scripts_dir = cfg.stage_dir("scripter", book, profile).join("scripts");
        if !scripts_dir.is_dir() {
            return Err(SkwError::ConfigMissing(format!(
                "{} (run 'skw-build script' first)",
                scripts_dir.display()
            ))
            .into());
        }

        let exec_dir = cfg.stage_dir("executer", book, profile);
        let logs_dir = exec_dir.join("logs");
        let downloads_dir = exec_dir.join("downloads");
        fs::create_dir_all(&logs_dir)
            .with_context(|| format!("creating logs directory '{}'", logs_dir.display()))?;
        fs::create_dir_all(&downloads_dir)
            .with_context(|| format!("creating downloads directory '{}'", downloads_dir.display()))?;

        let chroot_dir = ecfg
            .chroot_dir
            .clone()
            .unwrap_or_else(|| exec_dir.join("chroot"));

        Ok(Self {
            cfg,
            ecfg,
            client: RepoClient::new()?,
            book,
            profile,
            entries,
            scripts_dir,
            exec_dir,
            logs_dir,
            downloads_dir,
            chroot_dir,
            auto_confirm,
        })
    }

    fn run_all(&self) -> Result<()> {
        let mut scripts: Vec<PathBuf> = fs::read_dir(&self.scripts_dir)
            .with_context(|| format!("reading scripts directory '{}'", self.scripts_dir.display()))?
            .filter_map(Result::ok)
            .map(|ent| ent.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("sh"))
            .collect();
        scripts.sort();

        for script in &scripts {
            self.process_script(script)?;
        }
        info!("executer complete: {} scripts processed", scripts.len());
        Ok(())
    }

    fn process_script(&self, script: &Path) -> Result<()> {
        let script_name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = self.resolve_entry(&script_name)?;
        let mut tracker = StateTracker::new(&script_name);

        let pkg_file = self.ecfg.package_file_name(self.book, self.profile, entry);
        let mode = self.exec_mode(entry)?;
        let log_path = self.logs_dir.join(format!("{script_name}.log"));

        // Cache probe comes first: a published package is never rebuilt.
        if let Some(hit) = self.client.probe(&self.ecfg.download_repos, &pkg_file) {
            tracker.to(ScriptState::CacheHit);
            let (archive_path, meta_path) =
                self.client.fetch(&hit, &pkg_file, &self.downloads_dir)?;
            tracker.to(ScriptState::Installing);
            self.install(entry, mode, &pkg_file, &archive_path, &meta_path)?;
            append_skip_log(&log_path, &pkg_file, &hit.repo)?;
            tracker.to(ScriptState::Done);
            info!("installed cached package {pkg_file} from {}", hit.repo);
            return Ok(());
        }

        tracker.to(ScriptState::Building);
        let node = entry.node_name();
        let destdir = match mode {
            ExecMode::Host => self.exec_dir.join("destdir").join(node),
            ExecMode::Chroot => self.chroot_dir.join("destdir").join(node),
        };
        if destdir.exists() {
            fs::remove_dir_all(&destdir)
                .with_context(|| format!("clearing staging directory '{}'", destdir.display()))?;
        }
        fs::create_dir_all(&destdir)
            .with_context(|| format!("creating staging directory '{}'", destdir.display()))?;
        let workdir = self.exec_dir.join("work").join(node);

        let job = ScriptJob {
            script,
            scripts_dir: &self.scripts_dir,
            workdir: &workdir,
            destdir: &destdir,
            chroot_dir: &self.chroot_dir,
            log_path: &log_path,
        };
        let status = script::run_script(&job, mode)?;
        if !status.success() {
            return Err(SkwError::ScriptFailed {
                script: script_name,
                status: status.to_string(),
            }
            .into());
        }

        if !self.should_package(entry) {
            tracker.to(ScriptState::Skipped);
            tracker.to(ScriptState::Done);
            return Ok(());
        }

        tracker.to(ScriptState::Packaging);
        let archive_path = self.cfg.package_dir.join(&pkg_file);
        archive::create(&destdir, &archive_path, self.ecfg.package_format)?;
        let (sha256, size) = archive::sha256_file(&archive_path)?;
        let files = archive::list_files(&archive_path, self.ecfg.package_format)?;
        let meta = PackageMetadata {
            package_name: entry.package_name.clone(),
            package_version: entry.package_version.clone(),
            book: self.book.to_string(),
            profile: self.profile.to_string(),
            chapter_id: entry.chapter_id.clone(),
            section_id: entry.section_id.clone(),
            exec_mode: mode.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            size,
            sha256: sha256.clone(),
            files,
        };
        let meta_path = archive::metadata_path(&archive_path);
        archive::write_metadata(&meta_path, &meta)?;
        info!("created package {pkg_file} ({size} bytes, sha256 {})", &sha256[..12]);

        tracker.to(ScriptState::Installing);
        self.install(entry, mode, &pkg_file, &archive_path, &meta_path)?;

        if !self.ecfg.upload_repo.is_empty() {
            tracker.to(ScriptState::Publishing);
            repo::publish(&self.ecfg.upload_repo, &archive_path, &meta_path)?;
            info!("published {pkg_file} to {}", self.ecfg.upload_repo);
        }

        fs::remove_dir_all(&destdir)
            .with_context(|| format!("removing staging directory '{}'", destdir.display()))?;
        tracker.to(ScriptState::Done);
        Ok(())
    }

    fn install(
        &self,
        entry: &BuildEntry,
        mode: ExecMode,
        pkg_file: &str,
        archive_path: &Path,
        meta_path: &Path,
    ) -> Result<()> {
        let target = install::resolve_target(&self.ecfg, entry, mode, &self.chroot_dir);
        install::confirm_root_install(
            &target,
            pkg_file,
            self.ecfg.require_confirm_root,
            self.auto_confirm,
        )?;
        install::install_archive(archive_path, meta_path, self.ecfg.package_format, &target)
    }

    /// Match `NNNN_<chapter>_<section>.sh` back to its plan entry.
    fn resolve_entry(&self, script_name: &str) -> Result<&BuildEntry> {
        let suffix = script_name
            .get(5..)
            .filter(|_| {
                script_name.len() > 5
                    && script_name.as_bytes()[4] == b'_'
                    && script_name[..4].bytes().all(|b| b.is_ascii_digit())
            })
            .ok_or_else(|| {
                SkwError::ConfigInvalid(format!(
                    "script name '{script_name}' is not of the form NNNN_<chapter>_<section>.sh"
                ))
            })?;
        self.entries
            .iter()
            .find(|e| format!("{}_{}.sh", e.chapter_id, e.section_id) == suffix)
            .ok_or_else(|| {
                SkwError::ConfigInvalid(format!(
                    "no plan entry matches script '{script_name}'"
                ))
                .into()
            })
    }

    fn exec_mode(&self, entry: &BuildEntry) -> Result<ExecMode> {
        let in_chroot = self.ecfg.chroot.matches(entry);
        let in_host = self.ecfg.host.matches(entry);
        if in_chroot && in_host {
            return Err(SkwError::ConfigInvalid(format!(
                "entry '{}' is listed for both chroot and host execution",
                entry.node_name()
            ))
            .into());
        }
        if in_chroot {
            Ok(ExecMode::Chroot)
        } else {
            Ok(ExecMode::Host)
        }
    }

    /// Packaging inclusion: `[package]` membership, `[packages.exclude]` wins.
    fn should_package(&self, entry: &BuildEntry) -> bool {
        self.ecfg.package.matches_versioned(entry)
            && !self.ecfg.package_exclude.matches_versioned(entry)
    }
}

fn append_skip_log(log_path: &Path, pkg_file: &str, repo: &str) -> Result<()> {
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening script log '{}'", log_path.display()))?;
    writeln!(log, "\nSKIPPED: using cached {pkg_file} from {repo}")
        .with_context(|| format!("writing script log '{}'", log_path.display()))?;
    Ok(())
}
