use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::{fs, path::PathBuf};

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/wg-overlay.toml";

/// Tool settings. Every field has a default so an absent file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub interface: String,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub rules_file: PathBuf,
    pub sysctl_file: PathBuf,
    /// Network address of the overlay /24.
    pub subnet: Ipv4Addr,
    pub default_port: u16,
    pub client_dns: Vec<String>,
    /// Public endpoint written into client configs; resolved when unset.
    pub endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: "wg0".into(),
            config_dir: PathBuf::from("/etc/wireguard"),
            state_dir: PathBuf::from("/var/lib/wg-overlay"),
            rules_file: PathBuf::from("/etc/iptables/rules.v4"),
            sysctl_file: PathBuf::from("/etc/sysctl.d/99-wg-overlay.conf"),
            subnet: Ipv4Addr::new(10, 66, 66, 0),
            default_port: 51820,
            client_dns: vec!["1.1.1.1".into(), "1.0.0.1".into()],
            endpoint: None,
        }
    }
}

impl Settings {
    /// Settings rooted under `root`, for tests and staging directories.
    pub fn rooted(root: &std::path::Path) -> Self {
        Self {
            config_dir: root.join("etc/wireguard"),
            state_dir: root.join("var/lib/wg-overlay"),
            rules_file: root.join("etc/iptables/rules.v4"),
            sysctl_file: root.join("etc/sysctl.d/99-wg-overlay.conf"),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subnet.octets()[3] != 0 {
            return Err(Error::InvalidSettings(format!(
                "subnet {} is not the network address of a /24",
                self.subnet
            )));
        }
        if self.interface.is_empty() || self.interface.len() > 15 {
            return Err(Error::InvalidSettings(format!(
                "interface name {:?} must be 1-15 characters",
                self.interface
            )));
        }
        if self.default_port == 0 {
            return Err(Error::InvalidPort("default_port must be 1-65535".into()));
        }
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    pub fn server_private_key_path(&self) -> PathBuf {
        self.config_dir.join("server_private.key")
    }

    pub fn server_public_key_path(&self) -> PathBuf {
        self.config_dir.join("server_public.key")
    }

    pub fn clients_dir(&self) -> PathBuf {
        self.config_dir.join("clients")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join("journal.log")
    }
}

/// Load settings from `path` (or the default location). A missing file yields defaults.
pub fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let p = path.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    if !p.exists() {
        return Ok(Settings::default());
    }
    let s = fs::read_to_string(&p).map_err(|e| Error::io(&p, e))?;
    let settings: Settings = toml::from_str(&s)
        .map_err(|e| Error::InvalidSettings(format!("{}: {}", p.display(), e)))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.config_path(), PathBuf::from("/etc/wireguard/wg0.conf"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("wg-overlay.toml");
        fs::write(&p, "interface = \"wg7\"\nsubnet = \"10.9.0.0\"\n").unwrap();
        let settings = load_settings(Some(p)).unwrap();
        assert_eq!(settings.interface, "wg7");
        assert_eq!(settings.subnet, Ipv4Addr::new(10, 9, 0, 0));
        assert_eq!(settings.default_port, 51820);
    }

    #[test]
    fn rejects_subnet_with_host_bits() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("wg-overlay.toml");
        fs::write(&p, "subnet = \"10.9.0.5\"\n").unwrap();
        assert!(matches!(load_settings(Some(p)), Err(Error::InvalidSettings(_))));
    }
}
