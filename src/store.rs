//! Server configuration on disk: the `wg-quick` file, server key files and
//! the scalar state later operations depend on.

use crate::allocator::{host_address, SERVER_HOST_ID};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::firewall::FirewallRuleSet;
use crate::fsutil::{read_optional, write_atomic};
use crate::guard::InstallApproval;
use crate::keys::KeyPair;
use crate::wg::{ConfigDocument, InterfaceSection, PeerEntry};
use log::info;
use std::net::Ipv4Addr;
use std::path::PathBuf;

const HEADER: &str = "# Managed by wg-overlay. Peer blocks are maintained by `wg-overlay add-client`/`delete-client`.\n";

/// The server side of the overlay, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub listen_port: u16,
    pub private_key: String,
    pub public_key: String,
    pub outbound_interface: String,
    pub peers: Vec<PeerEntry>,
}

impl ServerConfig {
    /// Network address of the overlay /24.
    pub fn subnet(&self) -> Ipv4Addr {
        host_address(self.address, 0)
    }
}

/// Owns the server configuration file and the durable scalar state.
#[derive(Debug, Clone)]
pub struct ServerConfigStore {
    settings: Settings,
}

impl ServerConfigStore {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn state_file(&self, name: &str) -> PathBuf {
        self.settings.state_dir.join(name)
    }

    /// Tagged rules for this installation's subnet, interface and port.
    pub fn rule_set(&self, outbound_interface: &str, listen_port: u16) -> FirewallRuleSet {
        FirewallRuleSet::new(
            self.settings.subnet,
            &self.settings.interface,
            outbound_interface,
            listen_port,
        )
    }

    /**
     * @brief Write a fresh server configuration.
     * @param approval Issued by the installation guard for this configuration path.
     * @param outbound_interface Interface overlay traffic is masqueraded behind.
     * @param listen_port UDP port the server listens on.
     * @param keys Server key pair.
     */
    pub fn create(
        &self,
        approval: &InstallApproval,
        outbound_interface: &str,
        listen_port: u16,
        keys: &KeyPair,
    ) -> Result<ServerConfig> {
        let config_path = self.settings.config_path();
        if approval.config_path() != config_path {
            return Err(Error::PreconditionFailed(format!(
                "install approval was issued for {}, not {}",
                approval.config_path().display(),
                config_path.display()
            )));
        }
        if config_path.exists() {
            return Err(Error::PreconditionFailed(format!(
                "{} appeared after the installation check",
                config_path.display()
            )));
        }
        if listen_port == 0 {
            return Err(Error::InvalidPort("listen port must be 1-65535".into()));
        }
        validate_interface_name(outbound_interface)?;

        let rules = self.rule_set(outbound_interface, listen_port);
        let interface = InterfaceSection {
            address: host_address(self.settings.subnet, SERVER_HOST_ID),
            prefix_len: 24,
            listen_port,
            private_key: keys.private_key.clone(),
            post_up: rules.up_hooks(),
            post_down: rules.down_hooks(),
        };
        let text = format!("{}{}", HEADER, interface.render());

        write_atomic(&self.settings.server_private_key_path(), &format!("{}\n", keys.private_key), Some(0o600))?;
        write_atomic(&self.settings.server_public_key_path(), &format!("{}\n", keys.public_key), Some(0o644))?;
        write_atomic(&config_path, &text, Some(0o600))?;
        write_atomic(&self.state_file("outbound_interface"), &format!("{}\n", outbound_interface), None)?;
        write_atomic(&self.state_file("listen_port"), &format!("{}\n", listen_port), None)?;
        info!(
            "wrote {} (address {}/24, port {}, outbound {})",
            config_path.display(),
            interface.address,
            listen_port,
            outbound_interface
        );

        Ok(ServerConfig {
            address: interface.address,
            prefix_len: interface.prefix_len,
            listen_port,
            private_key: keys.private_key.clone(),
            public_key: keys.public_key.clone(),
            outbound_interface: outbound_interface.to_string(),
            peers: Vec::new(),
        })
    }

    fn load_state(&self, name: &str) -> Result<String> {
        let path = self.state_file(name);
        match read_optional(&path)? {
            Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            _ => Err(Error::NotInstalled(format!("{} is missing", path.display()))),
        }
    }

    pub fn load_outbound_interface(&self) -> Result<String> {
        self.load_state("outbound_interface")
    }

    pub fn load_port(&self) -> Result<u16> {
        let raw = self.load_state("listen_port")?;
        raw.parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::corrupt(self.state_file("listen_port"), 1, format!("bad port {:?}", raw)))
    }

    /// Endpoint chosen at install time, if one was recorded.
    pub fn load_endpoint(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.state_file("endpoint"))?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn save_endpoint(&self, endpoint: &str) -> Result<()> {
        write_atomic(&self.state_file("endpoint"), &format!("{}\n", endpoint), None)
    }

    /// Scalar state files written by `create`, for teardown.
    pub fn state_files(&self) -> Vec<PathBuf> {
        ["outbound_interface", "listen_port", "endpoint"]
            .iter()
            .map(|n| self.state_file(n))
            .collect()
    }

    /// Fails with NotInstalled unless the durable state written by `create` is present.
    pub fn require_installed(&self) -> Result<()> {
        self.load_outbound_interface()?;
        self.load_port()?;
        Ok(())
    }

    pub fn load_document(&self) -> Result<ConfigDocument> {
        let path = self.settings.config_path();
        let text = read_optional(&path)?
            .ok_or_else(|| Error::NotInstalled(format!("{} does not exist", path.display())))?;
        ConfigDocument::parse(&path, &text)
    }

    pub fn save_document(&self, doc: &ConfigDocument) -> Result<()> {
        write_atomic(&self.settings.config_path(), &doc.render(), Some(0o600))
    }

    pub fn server_public_key(&self) -> Result<String> {
        let path = self.settings.server_public_key_path();
        read_optional(&path)?
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::NotInstalled(format!("{} does not exist", path.display())))
    }

    /// Everything known about the installed server.
    pub fn load(&self) -> Result<ServerConfig> {
        self.require_installed()?;
        let doc = self.load_document()?;
        let interface = doc.interface()?;
        Ok(ServerConfig {
            address: interface.address,
            prefix_len: interface.prefix_len,
            listen_port: self.load_port()?,
            private_key: interface.private_key,
            public_key: self.server_public_key()?,
            outbound_interface: self.load_outbound_interface()?,
            peers: doc.peers(),
        })
    }
}

fn validate_interface_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 15
        && name.chars().all(|c| c.is_ascii_alphanumeric() || "_-.@".contains(c));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidSettings(format!("invalid outbound interface name {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::InstallationGuard;
    use crate::mock::MemoryFirewall;

    fn keys() -> KeyPair {
        KeyPair {
            private_key: "cHJpdmF0ZQ==".into(),
            public_key: "cHVibGlj".into(),
        }
    }

    #[test]
    fn create_then_load() {
        let root = tempfile::tempdir().unwrap();
        let store = ServerConfigStore::new(Settings::rooted(root.path()));
        let approval = InstallationGuard::new(store.settings())
            .approve(&MemoryFirewall::new())
            .unwrap();
        let created = store.create(&approval, "eth0", 51999, &keys()).unwrap();
        assert_eq!(created.address, Ipv4Addr::new(10, 66, 66, 1));
        assert_eq!(store.load().unwrap(), created);
        assert_eq!(store.load_outbound_interface().unwrap(), "eth0");
        assert_eq!(store.load_port().unwrap(), 51999);

        let iface = store.load_document().unwrap().interface().unwrap();
        assert_eq!(iface.post_up, store.rule_set("eth0", 51999).up_hooks());
        assert_eq!(iface.post_down.len(), 5);

        // a second create with the stale approval is refused
        assert!(matches!(
            store.create(&approval, "eth0", 51999, &keys()),
            Err(Error::PreconditionFailed(_))
        ));
    }

    #[test]
    fn state_missing_means_not_installed() {
        let root = tempfile::tempdir().unwrap();
        let store = ServerConfigStore::new(Settings::rooted(root.path()));
        assert!(matches!(store.load_port(), Err(Error::NotInstalled(_))));
        assert!(matches!(store.load_outbound_interface(), Err(Error::NotInstalled(_))));
        assert!(matches!(store.load_document(), Err(Error::NotInstalled(_))));
    }

    #[test]
    fn rejects_bad_port_and_interface() {
        let root = tempfile::tempdir().unwrap();
        let store = ServerConfigStore::new(Settings::rooted(root.path()));
        let approval = InstallationGuard::new(store.settings())
            .approve(&MemoryFirewall::new())
            .unwrap();
        assert!(matches!(store.create(&approval, "eth0", 0, &keys()), Err(Error::InvalidPort(_))));
        assert!(matches!(
            store.create(&approval, "eth0; rm -rf /", 51820, &keys()),
            Err(Error::InvalidSettings(_))
        ));
        assert!(!store.settings().config_path().exists());
    }
}
