#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

const FAKE_VOL: &str = r#"#!/bin/sh
if [ "$1" = "--help" ]; then
  echo "Volatility 3 Framework 2.5.2"
  exit 0
fi
if [ "$3" = "banners.Banners" ]; then
  echo "0x3a00000	Microsoft Windows [Version 10.0.19041]"
  exit 0
fi
case "$5" in
  windows.pslist)
    printf '{"PID": 4}\n{"PID": 88}\n'
    ;;
  windows.netscan)
    echo "Unable to validate the plugin requirements: ['kernel']" >&2
    exit 1
    ;;
  *)
    printf '{"plugin": "%s"}\n' "$5"
    ;;
esac
"#;

const FAKE_BINWALK: &str = r#"#!/bin/sh
if [ "$1" = "--help" ]; then
  echo "Binwalk v2.3.4"
  exit 0
fi
echo "DECIMAL       HEXADECIMAL     DESCRIPTION"
echo "----------------------------------------"
echo "0             0x0             PNG image, 640 x 480"
echo "512           0x200           Zlib compressed data"
"#;

const FAKE_EXIFTOOL: &str = r#"#!/bin/sh
if [ "$1" = "-ver" ]; then
  echo "12.76"
  exit 0
fi
printf '[{"File": {"FileType": "PNG"}}]\n'
"#;

/// Variables that would override the config file.
const OVERRIDE_VARS: &[&str] = &[
    "VOL3_PATH",
    "BINWALK_PATH",
    "EXIFTOOL_PATH",
    "STORAGE_ROOT",
    "VOL3_TIMEOUT_SECONDS",
    "BINWALK_ENABLED",
    "EXIFTOOL_ENABLED",
    "RUST_LOG",
];

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Writes the fake tools plus a config pointing at them.
fn setup(dir: &Path, exiftool_enabled: bool) -> PathBuf {
    let vol = write_script(dir, "vol", FAKE_VOL);
    let binwalk = write_script(dir, "binwalk", FAKE_BINWALK);
    let exiftool = write_script(dir, "exiftool", FAKE_EXIFTOOL);
    let yaml = format!(
        "tools:\n  volatility:\n    path: {}\n  binwalk:\n    path: {}\n  exiftool:\n    path: {}\n    enabled: {exiftool_enabled}\nstorage:\n  root: {}\n",
        vol.display(),
        binwalk.display(),
        exiftool.display(),
        dir.join("storage").display()
    );
    let config = dir.join("memtriage.yaml");
    fs::write(&config, yaml).unwrap();
    config
}

fn memtriage(config: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_memtriage"));
    for var in OVERRIDE_VARS {
        command.env_remove(var);
    }
    command
        .arg("--config")
        .arg(config)
        .arg("--quiet")
        .args(args)
        .output()
        .expect("failed to run memtriage")
}

fn image(dir: &Path) -> PathBuf {
    let path = dir.join("host.raw");
    fs::write(&path, b"image").unwrap();
    path
}

// ---------------------------------------------------------------------------
// check / detect
// ---------------------------------------------------------------------------

#[test]
fn check_lists_tool_versions() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);

    let output = memtriage(&config, &["check"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2.5.2"));
    assert!(stdout.contains("2.3.4"));
    assert!(stdout.contains("12.76"));
}

#[test]
fn check_fails_when_enabled_tool_missing() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    fs::remove_file(dir.path().join("binwalk")).unwrap();

    let output = memtriage(&config, &["check"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error: 1 enabled tool(s) unavailable"));
}

#[test]
fn unreadable_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = memtriage(&dir.path().join("absent.yaml"), &["check"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load config"));
}

#[test]
fn detect_prints_profile() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let image = image(dir.path());

    let output = memtriage(&config, &["detect", "--image", image.to_str().unwrap()]);
    assert!(output.status.success());
    let profile: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(profile["os_category"], "Windows");
    assert_eq!(profile["method"], "banners");
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[test]
fn run_writes_report_and_flags_failures() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let image = image(dir.path());
    let out = dir.path().join("out");

    let output = memtriage(
        &config,
        &[
            "run",
            "--image",
            image.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--plugins",
            "windows.pslist,windows.netscan",
            "--fail-on-error",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stdout).contains("1 succeeded, 1 failed"));

    let report: Value = serde_json::from_str(&fs::read_to_string(out.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["plugins"]["windows.pslist"]["status"], "success");
    assert_eq!(report["plugins"]["windows.pslist"]["record_count"], 2);
    assert_eq!(report["plugins"]["windows.netscan"]["status"], "failed");
    assert!(out.join("windows_pslist.json").exists());
}

#[test]
fn run_without_fail_flag_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let image = image(dir.path());
    let out = dir.path().join("out");

    let output = memtriage(
        &config,
        &[
            "run",
            "--image",
            image.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--plugins",
            "windows.netscan",
            "--format",
            "yaml",
        ],
    );
    assert!(output.status.success());
    assert!(out.join("report.yaml").exists());
}

#[test]
fn run_qualifies_bare_plugins_after_detection() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let image = image(dir.path());
    let out = dir.path().join("out");

    let output = memtriage(
        &config,
        &[
            "run",
            "--image",
            image.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--plugins",
            "pslist",
            "--detect-profile",
            "--jobs",
            "1",
        ],
    );
    assert!(output.status.success());

    let report: Value = serde_json::from_str(&fs::read_to_string(out.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["profile"]["os_category"], "Windows");
    assert_eq!(report["plugins"]["windows.pslist"]["record_count"], 2);
}

#[test]
fn run_rejects_missing_image() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);

    let output = memtriage(
        &config,
        &[
            "run",
            "--image",
            dir.path().join("nope.raw").to_str().unwrap(),
            "--output",
            dir.path().join("out").to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("memory image not found"));
}

// ---------------------------------------------------------------------------
// artifact analysis
// ---------------------------------------------------------------------------

#[test]
fn scan_prints_findings_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let artifact = dir.path().join("blob.bin");
    fs::write(&artifact, b"blob").unwrap();

    let output = memtriage(
        &config,
        &["scan", "--input", artifact.to_str().unwrap(), "--no-extract"],
    );
    assert!(output.status.success());
    let results: Value = serde_json::from_slice(&output.stdout).unwrap();
    let result = &results[artifact.to_str().unwrap()];
    assert_eq!(result["status"], "success");
    assert_eq!(result["record_count"], 2);
}

#[test]
fn scan_creates_only_the_extraction_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let artifact = dir.path().join("blob.bin");
    fs::write(&artifact, b"blob").unwrap();

    let output = memtriage(&config, &["scan", "--input", artifact.to_str().unwrap()]);
    assert!(output.status.success());

    let storage = dir.path().join("storage");
    assert!(storage.join("artifacts").join("binwalk").is_dir());
    for sub in ["uploads", "results", "logs"] {
        assert!(!storage.join(sub).exists(), "{sub} should not be created by scan");
    }
}

#[test]
fn process_without_scan_creates_no_storage() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let artifact = dir.path().join("pic.png");
    fs::write(&artifact, b"png").unwrap();

    let output = memtriage(
        &config,
        &["process", "--input", artifact.to_str().unwrap(), "--no-scan"],
    );
    assert!(output.status.success());
    assert!(!dir.path().join("storage").exists());
}

#[test]
fn disabled_metadata_reports_failure_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), false);
    let artifact = dir.path().join("pic.png");
    fs::write(&artifact, b"png").unwrap();

    let output = memtriage(
        &config,
        &["metadata", "--input", artifact.to_str().unwrap(), "--fail-on-error"],
    );
    assert_eq!(output.status.code(), Some(2));
    let results: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        results[artifact.to_str().unwrap()]["error_message"],
        "ExifTool is disabled"
    );
}

#[test]
fn process_combines_both_analyses() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), true);
    let artifact = dir.path().join("carved.png");
    fs::write(&artifact, b"abc").unwrap();

    let output = memtriage(&config, &["process", "--input", artifact.to_str().unwrap()]);
    assert!(output.status.success());
    let combined: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(combined[0]["file_size_bytes"], 3);
    assert_eq!(
        combined[0]["sha256"],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(combined[0]["signature_scan"]["record_count"], 2);
    assert_eq!(combined[0]["metadata"]["parsed_output"]["records"]["file_type"], "PNG");
}
