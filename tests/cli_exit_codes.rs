use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use wg_overlay::config::Settings;

fn settings_file(root: &Path) -> PathBuf {
    let path = root.join("wg-overlay.toml");
    let body = toml::to_string(&Settings::rooted(root)).unwrap();
    fs::write(&path, body).unwrap();
    path
}

fn wg_overlay(settings: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wg-overlay"))
        .arg("--settings")
        .arg(settings)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

#[test]
fn uninstall_without_marker_exits_1_without_prompting() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_file(dir.path());

    let out = wg_overlay(&settings, &["uninstall"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&out.stdout).contains("Aborted"));

    let out = wg_overlay(&settings, &["uninstall", "--yes"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!Settings::rooted(dir.path()).state_dir.exists());
}

#[test]
fn status_on_clean_host_exits_0() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_file(dir.path());
    let out = wg_overlay(&settings, &["status"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "not installed");
}
