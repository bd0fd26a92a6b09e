//! Reverses an installation made by this tool.
//!
//! Firewall teardown is scoped by the ownership tag. File teardown removes
//! the artifacts the tool writes (config, server keys, the clients tree,
//! the sysctl drop-in and scalar state) and the configuration directory only
//! when nothing else is left in it. The marker is cleared last so an
//! interrupted run can simply be repeated.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::filelog;
use crate::firewall::{remove_owned_live, FirewallBackend};
use crate::fsutil::{read_optional, remove_dir_all_if_exists, remove_file_if_exists, write_atomic};
use crate::guard::InstallationMarker;
use crate::host::ServiceController;
use crate::rules_file::strip_owned;
use crate::store::ServerConfigStore;
use log::{debug, info};
use std::fs;
use std::io::ErrorKind;

/// What a teardown removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub live_rules_removed: usize,
    pub persisted_rules_removed: usize,
    pub paths_removed: usize,
}

pub struct UninstallCoordinator<'a> {
    settings: &'a Settings,
    firewall: &'a dyn FirewallBackend,
    service: &'a dyn ServiceController,
}

impl<'a> UninstallCoordinator<'a> {
    pub fn new(
        settings: &'a Settings,
        firewall: &'a dyn FirewallBackend,
        service: &'a dyn ServiceController,
    ) -> Self {
        Self {
            settings,
            firewall,
            service,
        }
    }

    /**
     * @brief Tear the installation down.
     * @return NotInstalled, with nothing touched, when the marker is absent.
     */
    pub fn run(&self) -> Result<UninstallReport> {
        let marker = InstallationMarker::new(&self.settings.state_dir);
        if !marker.is_present() {
            return Err(Error::NotInstalled(format!(
                "{} is absent; refusing to remove configuration this tool did not create",
                marker.path().display()
            )));
        }
        let mut report = UninstallReport::default();

        self.service.disable(&self.settings.interface)?;

        report.live_rules_removed = remove_owned_live(self.firewall)?;

        if let Some(text) = read_optional(&self.settings.rules_file)? {
            let (stripped, removed) = strip_owned(&text);
            if stripped.trim().is_empty() && !text.trim().is_empty() {
                // only sections added at install were in it
                remove_file_if_exists(&self.settings.rules_file)?;
                report.paths_removed += 1;
            } else if stripped != text {
                write_atomic(&self.settings.rules_file, &stripped, None)?;
            }
            report.persisted_rules_removed = removed;
        }

        let store = ServerConfigStore::new(self.settings.clone());
        let mut files = vec![
            self.settings.config_path(),
            self.settings.server_private_key_path(),
            self.settings.server_public_key_path(),
            self.settings.sysctl_file.clone(),
        ];
        files.extend(store.state_files());
        for path in &files {
            if remove_file_if_exists(path)? {
                debug!("removed {}", path.display());
                report.paths_removed += 1;
            }
        }
        if remove_dir_all_if_exists(&self.settings.clients_dir())? {
            report.paths_removed += 1;
        }
        match fs::remove_dir(&self.settings.config_dir) {
            Ok(()) => report.paths_removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(_) => debug!("{} not empty, kept", self.settings.config_dir.display()),
        }

        filelog::write_line(&self.settings.journal_path(), "uninstall");
        marker.clear()?;
        info!(
            "uninstalled {}: {} live rules, {} persisted rules, {} paths removed",
            self.settings.interface,
            report.live_rules_removed,
            report.persisted_rules_removed,
            report.paths_removed
        );
        Ok(report)
    }
}
