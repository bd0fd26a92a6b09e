//! Operation entry points used by the command line. Every mutating
//! operation holds the configuration lock for its whole duration.

use crate::client::{client_dir, read_client_config, ClientArtifact};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::filelog;
use crate::firewall::{remove_live, FirewallBackend, FirewallRule, LiveRule};
use crate::fsutil::{read_optional, remove_dir_all_if_exists, remove_file_if_exists, write_atomic};
use crate::guard::{InstallApproval, InstallState, InstallationGuard, InstallationMarker};
use crate::host::{EndpointResolver, ServiceController};
use crate::keys::{KeyGenerator, KeyPair};
use crate::lock::ConfigLock;
use crate::peer_registry::{is_valid_name, PeerRegistry};
use crate::rules_file::{merge_persisted, reload_live_from_persisted};
use crate::store::{ServerConfig, ServerConfigStore};
use crate::uninstall::{UninstallCoordinator, UninstallReport};
use crate::wg::PeerEntry;
use log::{info, warn};
use std::path::PathBuf;

/// Parameters chosen by the operator for `install`.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub outbound_interface: String,
    pub listen_port: u16,
    /// Overrides both the settings endpoint and the resolver.
    pub endpoint: Option<String>,
    /// Operator accepted live firewall rules this tool did not create.
    pub confirm_foreign_rules: bool,
}

/// State captured before an install attempt writes anything.
struct InstallUndo {
    new_paths: Vec<PathBuf>,
    rules_file: Option<String>,
    live_before: Vec<LiveRule>,
    service_enabled: bool,
}

/// The engine wired to its host collaborators.
pub struct Overlay<'a> {
    settings: Settings,
    firewall: &'a dyn FirewallBackend,
    service: &'a dyn ServiceController,
    keys: &'a dyn KeyGenerator,
    resolver: &'a dyn EndpointResolver,
}

impl<'a> Overlay<'a> {
    pub fn new(
        settings: Settings,
        firewall: &'a dyn FirewallBackend,
        service: &'a dyn ServiceController,
        keys: &'a dyn KeyGenerator,
        resolver: &'a dyn EndpointResolver,
    ) -> Self {
        Self {
            settings,
            firewall,
            service,
            keys,
            resolver,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn store(&self) -> ServerConfigStore {
        ServerConfigStore::new(self.settings.clone())
    }

    fn journal(&self, line: &str) {
        filelog::write_line(&self.settings.journal_path(), line);
    }

    pub fn status(&self) -> InstallState {
        InstallationGuard::new(&self.settings).check()
    }

    pub fn server(&self) -> Result<ServerConfig> {
        self.store().load()
    }

    /**
     * @brief Create the server configuration, persist its rules and start the service.
     * @param req Operator choices.
     * @return The new server configuration.
     */
    pub fn install(&self, req: &InstallRequest) -> Result<ServerConfig> {
        let _lock = ConfigLock::acquire(&self.settings.state_dir)?;
        let mut guard = InstallationGuard::new(&self.settings);
        if req.confirm_foreign_rules {
            guard.confirm_foreign_rules();
        }
        let approval = guard.approve(self.firewall)?;

        let endpoint = req
            .endpoint
            .clone()
            .or_else(|| self.settings.endpoint.clone())
            .or_else(|| self.resolver.resolve())
            .ok_or_else(|| {
                Error::PreconditionFailed("could not determine the public endpoint; pass one explicitly".into())
            })?;

        let keys = self.keys.generate()?;
        let mut undo = InstallUndo {
            new_paths: self.install_paths().into_iter().filter(|p| !p.exists()).collect(),
            rules_file: read_optional(&self.settings.rules_file)?,
            live_before: self.firewall.list()?,
            service_enabled: false,
        };
        let server = match self.install_steps(&approval, req, &endpoint, &keys, &mut undo) {
            Ok(server) => server,
            Err(e) => {
                warn!("install failed ({}), rolling back", e);
                self.roll_back_install(&undo);
                return Err(e);
            }
        };
        self.journal(&format!(
            "install {} port {} via {}",
            self.settings.interface, req.listen_port, req.outbound_interface
        ));
        info!(
            "installed {} on {}:{} (server key {})",
            self.settings.interface, endpoint, req.listen_port, server.public_key
        );
        Ok(server)
    }

    /// Files install writes, for rolling back a failed attempt.
    fn install_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.settings.config_path(),
            self.settings.server_private_key_path(),
            self.settings.server_public_key_path(),
            self.settings.sysctl_file.clone(),
        ];
        paths.extend(self.store().state_files());
        paths
    }

    fn install_steps(
        &self,
        approval: &InstallApproval,
        req: &InstallRequest,
        endpoint: &str,
        keys: &KeyPair,
        undo: &mut InstallUndo,
    ) -> Result<ServerConfig> {
        let store = self.store();
        let server = store.create(approval, &req.outbound_interface, req.listen_port, keys)?;
        store.save_endpoint(endpoint)?;

        write_atomic(&self.settings.sysctl_file, "net.ipv4.ip_forward = 1\n", None)?;
        self.service.apply_sysctl(&self.settings.sysctl_file)?;

        let rules = store.rule_set(&req.outbound_interface, req.listen_port);
        let existing = undo.rules_file.clone().unwrap_or_default();
        let (merged, added) = merge_persisted(&existing, &rules.activation_rules());
        if added > 0 {
            write_atomic(&self.settings.rules_file, &merged, None)?;
        }
        reload_live_from_persisted(self.firewall, &merged)?;

        undo.service_enabled = true;
        self.service.enable(&self.settings.interface)?;
        InstallationMarker::new(&self.settings.state_dir).set()?;
        Ok(server)
    }

    /// Best effort: every step is attempted and failures are only logged.
    fn roll_back_install(&self, undo: &InstallUndo) {
        if undo.service_enabled {
            if let Err(e) = self.service.disable(&self.settings.interface) {
                warn!("rollback: {}", e);
            }
        }
        let added_live: Vec<FirewallRule> = match self.firewall.list() {
            Ok(live) => live
                .iter()
                .filter(|l| !undo.live_before.contains(*l))
                .filter_map(LiveRule::owned)
                .collect(),
            Err(e) => {
                warn!("rollback: {}", e);
                Vec::new()
            }
        };
        if let Err(e) = remove_live(self.firewall, &added_live) {
            warn!("rollback: {}", e);
        }
        let restored = match (&undo.rules_file, read_optional(&self.settings.rules_file)) {
            (_, Err(e)) => Err(e),
            (Some(before), Ok(Some(now))) if *before == now => Ok(()),
            (Some(before), Ok(_)) => write_atomic(&self.settings.rules_file, before, None),
            (None, Ok(_)) => remove_file_if_exists(&self.settings.rules_file).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!("rollback: {}", e);
        }
        for path in &undo.new_paths {
            if let Err(e) = remove_file_if_exists(path) {
                warn!("rollback: {}", e);
            }
        }
    }

    /**
     * @brief Register a client, write its artifact and reload the service.
     * @return The peer entry and the path of its client config.
     */
    pub fn add_client(&self, name: &str) -> Result<(PeerEntry, PathBuf)> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        let store = self.store();
        store.require_installed()?;
        let _lock = ConfigLock::acquire(&self.settings.state_dir)?;
        let port = store.load_port()?;
        let endpoint = match store.load_endpoint()? {
            Some(e) => e,
            None => self
                .settings
                .endpoint
                .clone()
                .or_else(|| self.resolver.resolve())
                .ok_or_else(|| Error::PreconditionFailed("no endpoint recorded at install".into()))?,
        };
        let server_public_key = store.server_public_key()?;

        let keys = self.keys.generate()?;
        let registry = PeerRegistry::new(&store);
        let entry = registry.add(name, &keys.public_key)?;
        let artifact = ClientArtifact {
            name: entry.name.clone(),
            keys,
            address: entry.address,
            dns: self.settings.client_dns.clone(),
            server_public_key,
            endpoint,
            listen_port: port,
        };
        let committed = artifact
            .write(&self.settings)
            .and_then(|conf| self.service.reload(&self.settings.interface).map(|_| conf));
        let conf = match committed {
            Ok(conf) => conf,
            Err(e) => {
                warn!("adding {} failed ({}), rolling back peer", name, e);
                registry.remove(name)?;
                let _ = remove_dir_all_if_exists(&client_dir(&self.settings, name));
                return Err(e);
            }
        };
        self.journal(&format!("add-client {} {}", entry.name, entry.address));
        Ok((entry, conf))
    }

    pub fn list_clients(&self) -> Result<Vec<PeerEntry>> {
        PeerRegistry::new(&self.store()).list()
    }

    /// Client config text; NotFound when the client is not registered.
    pub fn show_client(&self, name: &str) -> Result<String> {
        let store = self.store();
        PeerRegistry::new(&store).get(name)?;
        read_client_config(&self.settings, name)
    }

    /**
     * @brief Remove a client and its artifact directory.
     * @return None when no such client exists; nothing is changed in that case.
     */
    pub fn delete_client(&self, name: &str) -> Result<Option<PeerEntry>> {
        let store = self.store();
        store.require_installed()?;
        let _lock = ConfigLock::acquire(&self.settings.state_dir)?;
        let removed = match PeerRegistry::new(&store).remove(name) {
            Ok(entry) => entry,
            Err(Error::NotFound(what)) => {
                warn!("{} not found, nothing to delete", what);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if is_valid_name(name) {
            remove_dir_all_if_exists(&client_dir(&self.settings, name))?;
        }
        self.service.reload(&self.settings.interface)?;
        self.journal(&format!("delete-client {}", removed.name));
        Ok(Some(removed))
    }

    /// Tear down the installation. Without the marker nothing is touched, not even the lock.
    pub fn uninstall(&self) -> Result<UninstallReport> {
        let marker = InstallationGuard::new(&self.settings).marker();
        if !marker.is_present() {
            return Err(Error::NotInstalled(format!("{} is absent", marker.path().display())));
        }
        let _lock = ConfigLock::acquire(&self.settings.state_dir)?;
        UninstallCoordinator::new(&self.settings, self.firewall, self.service).run()
    }
}
