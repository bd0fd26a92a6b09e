use std::fs;
use wg_overlay::config::{load_settings, Settings};

#[test]
fn settings_file_overrides_paths() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("wg-overlay.toml");
    let body = format!(
        "interface = \"wg1\"\nconfig_dir = \"{}\"\nclient_dns = [\"9.9.9.9\"]\n",
        dir.path().join("wireguard").display()
    );
    fs::write(&p, body).unwrap();
    let settings = load_settings(Some(p)).unwrap();
    assert_eq!(settings.config_path(), dir.path().join("wireguard/wg1.conf"));
    assert_eq!(settings.clients_dir(), dir.path().join("wireguard/clients"));
    assert_eq!(settings.client_dns, vec!["9.9.9.9"]);
    assert_eq!(settings.state_dir, Settings::default().state_dir);
}

#[test]
fn malformed_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("wg-overlay.toml");
    fs::write(&p, "default_port = \"not a number\"\n").unwrap();
    let err = load_settings(Some(p)).unwrap_err();
    assert_eq!(err.kind(), wg_overlay::ErrorKind::InputValidation);
}
