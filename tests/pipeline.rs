//! End-to-end pipeline scenarios: parse -> script -> execute over a real
//! temp workspace, with a local package repository for cache runs.

use std::fs;
use std::path::Path;

use scratchkit_builder::{archive, category_tag, executer, parser, plan, scripter, BuilderConfig};
use tempfile::TempDir;

const BOOK_XML: &str = r#"<?xml version="1.0"?>
<book>
  <chapter id="ch-05">
    <sect1 id="binutils">
      <package>binutils</package>
      <version>2.41</version>
      <screen><userinput>mkdir -p $DESTDIR/usr/bin</userinput></screen>
      <screen><userinput>printf binutils-2.41 &gt; $DESTDIR/usr/bin/binutils</userinput></screen>
    </sect1>
    <sect1 id="gcc">
      <package>gcc</package>
      <version>13.2</version>
      <dependency>binutils</dependency>
      <screen><userinput>mkdir -p $DESTDIR/usr/bin</userinput></screen>
      <screen><userinput>printf gcc-13.2 &gt; $DESTDIR/usr/bin/gcc</userinput></screen>
    </sect1>
    <sect1 id="ch-05-test">
      <package>testsuite</package>
      <screen><userinput>exit 1</userinput></screen>
    </sect1>
  </chapter>
</book>"#;

const PARSER_TOML: &str = r#"
[main]
xml_path = "${build_dir}/books/${book}/book.xml"
output_file = "parser_output.json"

[xpaths]
chapter_id = "//chapter"
section_id = "./sect1"
package_name = "./package/text()"
package_version = "./version/text()"
dependencies = "./dependency/text()"
build_instructions = "./screen/userinput"

[section_filters]
exclude = ["ch-05-test"]
"#;

const SCRIPTER_TOML: &str = r#"
[main]
default_template = "template.script"
"#;

const TEMPLATE: &str = "#!/bin/sh\nset -e\n{{build_instructions}}\n";

struct Workspace {
    _tmp: TempDir,
    cfg: BuilderConfig,
    repo_dir: std::path::PathBuf,
    install_root: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap();
    let cfg = BuilderConfig {
        build_dir: tmp.path().join("build"),
        package_dir: tmp.path().join("packages"),
        profiles_dir: tmp.path().join("profiles"),
        skel_dir: tmp.path().join("skel"),
    };
    let repo_dir = tmp.path().join("repo");
    let install_root = tmp.path().join("install-root");

    let profile_dir = cfg.profile_dir("lfs", "systemd");
    fs::create_dir_all(&profile_dir).unwrap();
    fs::write(profile_dir.join("parser.toml"), PARSER_TOML).unwrap();
    fs::write(profile_dir.join("scripter.toml"), SCRIPTER_TOML).unwrap();
    fs::write(profile_dir.join("template.script"), TEMPLATE).unwrap();
    fs::write(
        profile_dir.join("executer.toml"),
        format!(
            r#"
[main]
package_name_template = "{{book}}-{{profile}}-{{chapter_id}}-{{package_name}}-{{package_version}}"
package_format = "tar.xz"
default_extract_dir = "{install}"
upload_repo = "{repo}"
download_repos = ["{repo}"]

[package]
chapters = ["ch-05"]
"#,
            install = install_root.display(),
            repo = repo_dir.display(),
        ),
    )
    .unwrap();

    let book_dir = cfg.build_dir.join("books/lfs");
    fs::create_dir_all(&book_dir).unwrap();
    fs::write(book_dir.join("book.xml"), BOOK_XML).unwrap();

    Workspace {
        _tmp: tmp,
        cfg,
        repo_dir,
        install_root,
    }
}

fn scripts_dir(ws: &Workspace) -> std::path::PathBuf {
    ws.cfg.stage_dir("scripter", "lfs", "systemd").join("scripts")
}

#[test]
fn happy_path_builds_packages_installs_and_publishes() {
    let ws = workspace();

    // Parse: filtered, dependency-ordered plan.
    let plan_path = parser::run(&ws.cfg, "lfs", "systemd").unwrap();
    let entries = plan::read(&plan_path).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.package_name.as_str()).collect();
    assert_eq!(names, vec!["binutils", "gcc"]);

    // Script: numbered executables.
    scripter::run(&ws.cfg, "lfs", "systemd").unwrap();
    assert!(scripts_dir(&ws).join("0000_ch-05_binutils.sh").is_file());
    assert!(scripts_dir(&ws).join("0001_ch-05_gcc.sh").is_file());

    // Execute: build, package, verify, install, publish.
    executer::run(&ws.cfg, "lfs", "systemd", true).unwrap();

    let binutils_pkg = ws
        .cfg
        .package_dir
        .join("lfs-systemd-ch-05-binutils-2.41.tar.xz");
    let gcc_pkg = ws.cfg.package_dir.join("lfs-systemd-ch-05-gcc-13.2.tar.xz");
    assert!(binutils_pkg.is_file());
    assert!(gcc_pkg.is_file());

    // Installed tree is populated.
    assert_eq!(
        fs::read(ws.install_root.join("usr/bin/binutils")).unwrap(),
        b"binutils-2.41"
    );
    assert_eq!(fs::read(ws.install_root.join("usr/bin/gcc")).unwrap(), b"gcc-13.2");

    // Metadata records the archive checksum and file manifest.
    let meta = archive::read_metadata(&archive::metadata_path(&binutils_pkg)).unwrap();
    let (sha, size) = archive::sha256_file(&binutils_pkg).unwrap();
    assert_eq!(meta.sha256, sha);
    assert_eq!(meta.size, size);
    assert_eq!(meta.files, vec!["usr/bin/binutils".to_string()]);
    assert_eq!(meta.book, "lfs");
    assert_eq!(meta.exec_mode, "host");

    // Published copies land in the upload repo with metadata.
    assert!(ws.repo_dir.join("lfs-systemd-ch-05-binutils-2.41.tar.xz").is_file());
    assert!(ws
        .repo_dir
        .join("lfs-systemd-ch-05-binutils-2.41.tar.xz.meta.json")
        .is_file());

    // Staging directories are cleaned up after packaging.
    let destdir_root = ws.cfg.stage_dir("executer", "lfs", "systemd").join("destdir");
    assert!(!destdir_root.join("binutils").exists());
}

#[test]
fn second_run_hits_the_cache_and_never_rebuilds() {
    let ws = workspace();
    parser::run(&ws.cfg, "lfs", "systemd").unwrap();
    scripter::run(&ws.cfg, "lfs", "systemd").unwrap();
    executer::run(&ws.cfg, "lfs", "systemd", true).unwrap();

    // Make any rebuild attempt fail loudly, then wipe the install root.
    for script in ["0000_ch-05_binutils.sh", "0001_ch-05_gcc.sh"] {
        fs::write(scripts_dir(&ws).join(script), "#!/bin/sh\nexit 1\n").unwrap();
    }
    fs::remove_dir_all(&ws.install_root).unwrap();

    executer::run(&ws.cfg, "lfs", "systemd", true).unwrap();

    // Cached packages were verified and reinstalled without running scripts.
    assert_eq!(
        fs::read(ws.install_root.join("usr/bin/binutils")).unwrap(),
        b"binutils-2.41"
    );
    let log = fs::read_to_string(
        ws.cfg
            .stage_dir("executer", "lfs", "systemd")
            .join("logs/0000_ch-05_binutils.sh.log"),
    )
    .unwrap();
    assert!(log.contains("SKIPPED: using cached lfs-systemd-ch-05-binutils-2.41.tar.xz"));
}

#[test]
fn corrupted_cached_archive_fails_with_integrity_error() {
    let ws = workspace();
    parser::run(&ws.cfg, "lfs", "systemd").unwrap();
    scripter::run(&ws.cfg, "lfs", "systemd").unwrap();
    executer::run(&ws.cfg, "lfs", "systemd", true).unwrap();

    // Corrupt the published archive; its metadata still records the old hash.
    let cached = ws.repo_dir.join("lfs-systemd-ch-05-binutils-2.41.tar.xz");
    let mut bytes = fs::read(&cached).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&cached, bytes).unwrap();

    let err = executer::run(&ws.cfg, "lfs", "systemd", true).unwrap_err();
    assert_eq!(category_tag(&err), "IntegrityError");
}

#[test]
fn stage_outputs_are_deterministic_across_reruns() {
    let ws = workspace();
    let plan_path = parser::run(&ws.cfg, "lfs", "systemd").unwrap();
    let plan_bytes = fs::read(&plan_path).unwrap();
    scripter::run(&ws.cfg, "lfs", "systemd").unwrap();
    let script_path = scripts_dir(&ws).join("0000_ch-05_binutils.sh");
    let script_bytes = fs::read(&script_path).unwrap();

    parser::run(&ws.cfg, "lfs", "systemd").unwrap();
    scripter::run(&ws.cfg, "lfs", "systemd").unwrap();
    assert_eq!(fs::read(&plan_path).unwrap(), plan_bytes);
    assert_eq!(fs::read(&script_path).unwrap(), script_bytes);
}

#[test]
fn scripts_see_destdir_not_the_live_root() {
    let ws = workspace();
    parser::run(&ws.cfg, "lfs", "systemd").unwrap();
    scripter::run(&ws.cfg, "lfs", "systemd").unwrap();
    executer::run(&ws.cfg, "lfs", "systemd", true).unwrap();

    // Nothing was written outside the configured install root.
    assert!(!Path::new("/usr/bin/binutils-2.41").exists());
    assert!(ws.install_root.join("usr/bin/binutils").is_file());
}
