//! Generated-script execution: host and chroot modes, output tee'd to a log.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use crate::error::SkwError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Host,
    Chroot,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Host => write!(f, "host"),
            ExecMode::Chroot => write!(f, "chroot"),
        }
    }
}

/// Everything needed to run one generated script.
pub struct ScriptJob<'a> {
    pub script: &'a Path,
    pub scripts_dir: &'a Path,
    /// Working directory for the host-mode child.
    pub workdir: &'a Path,
    /// Staging directory, exported to the child as `DESTDIR`.
    pub destdir: &'a Path,
    pub chroot_dir: &'a Path,
    pub log_path: &'a Path,
}

/// Run the script, teeing stdout+stderr to the console and the log file.
pub fn run_script(job: &ScriptJob<'_>, mode: ExecMode) -> Result<ExitStatus> {
    match mode {
        ExecMode::Host => run_host(job),
        ExecMode::Chroot => run_chroot(job),
    }
}

fn run_host(job: &ScriptJob<'_>) -> Result<ExitStatus> {
    fs::create_dir_all(job.workdir)
        .with_context(|| format!("creating work directory '{}'", job.workdir.display()))?;
    let script = job
        .script
        .canonicalize()
        .with_context(|| format!("resolving script path '{}'", job.script.display()))?;

    let child = Command::new("/bin/sh")
        .arg(&script)
        .current_dir(job.workdir)
        .env("DESTDIR", job.destdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning script '{}'", script.display()))?;
    tee_child(child, job.log_path)
}

fn run_chroot(job: &ScriptJob<'_>) -> Result<ExitStatus> {
    let script_name = job
        .script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // The chroot sees the scripts directory and the host's device,
    // proc and sys trees at fixed paths.
    let binds = [
        (job.scripts_dir.to_path_buf(), job.chroot_dir.join("scripts")),
        (PathBuf::from("/dev"), job.chroot_dir.join("dev")),
        (PathBuf::from("/proc"), job.chroot_dir.join("proc")),
        (PathBuf::from("/sys"), job.chroot_dir.join("sys")),
    ];

    let mut mounted: Vec<&Path> = Vec::new();
    let mut mount_error = None;
    for (src, dst) in &binds {
        if let Err(e) = bind_mount(src, dst) {
            mount_error = Some(e);
            break;
        }
        mounted.push(dst);
    }

    let result = match mount_error {
        Some(e) => Err(e),
        None => {
            let internal_destdir = chroot_internal_path(job.destdir, job.chroot_dir)?;
            let child = Command::new("chroot")
                .arg(job.chroot_dir)
                .arg("/bin/sh")
                .arg(format!("/scripts/{script_name}"))
                .env_clear()
                .env("PATH", "/bin:/usr/bin:/sbin:/usr/sbin")
                .env("HOME", "/root")
                .env("TERM", std::env::var("TERM").unwrap_or_else(|_| "dumb".into()))
                .env("DESTDIR", &internal_destdir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("spawning chroot for '{script_name}'"));
            match child {
                Ok(child) => tee_child(child, job.log_path),
                Err(e) => Err(e),
            }
        }
    };

    for dst in mounted.iter().rev() {
        lazy_unmount(dst);
    }
    result
}

/// Map a host-side staging path to its path as seen inside the chroot.
pub fn chroot_internal_path(destdir: &Path, chroot_dir: &Path) -> Result<PathBuf> {
    let rel = destdir.strip_prefix(chroot_dir).with_context(|| {
        format!(
            "staging directory '{}' is outside the chroot '{}'",
            destdir.display(),
            chroot_dir.display()
        )
    })?;
    Ok(Path::new("/").join(rel))
}

fn bind_mount(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("creating bind mount target '{}'", dst.display()))?;
    let status = Command::new("mount")
        .arg("--bind")
        .arg(src)
        .arg(dst)
        .status()
        .with_context(|| format!("spawning mount for '{}'", dst.display()))?;
    if !status.success() {
        return Err(SkwError::ExternalToolFailed {
            tool: "mount".to_string(),
            detail: format!("bind-mounting '{}' -> '{}': {status}", src.display(), dst.display()),
        }
        .into());
    }
    Ok(())
}

fn lazy_unmount(dst: &Path) {
    let _ = Command::new("umount").arg("-lf").arg(dst).status();
}

fn tee_child(mut child: Child, log_path: &Path) -> Result<ExitStatus> {
    let mut log = File::create(log_path)
        .with_context(|| format!("creating script log '{}'", log_path.display()))?;

    let (tx, rx) = mpsc::channel::<String>();
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_line_reader(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_line_reader(stderr, tx.clone()));
    }
    drop(tx);

    for line in rx {
        println!("{line}");
        writeln!(log, "{line}")
            .with_context(|| format!("writing script log '{}'", log_path.display()))?;
    }
    for reader in readers {
        let _ = reader.join();
    }

    child.wait().context("waiting for script to finish")
}

fn spawn_line_reader<R: Read + Send + 'static>(source: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}
