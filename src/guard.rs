//! Decides whether installing is safe, using the installation marker as the
//! record of what this tool created.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::firewall::{foreign_live_rules, FirewallBackend, LiveRule};
use crate::fsutil::{remove_file_if_exists, write_atomic};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Persisted fact that the current installation was created by this tool.
#[derive(Debug, Clone)]
pub struct InstallationMarker {
    path: PathBuf,
}

impl InstallationMarker {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("installed"),
        }
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }

    pub fn set(&self) -> Result<()> {
        write_atomic(&self.path, &format!("{}\n", crate::firewall::OWNERSHIP_TAG), None)
    }

    pub fn clear(&self) -> Result<()> {
        remove_file_if_exists(&self.path).map(|_| ())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What the host currently looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    /// No overlay configuration or key material.
    Clean,
    /// Configuration exists and the marker says it is ours.
    OwnedInstall,
    /// Configuration or keys exist without the marker.
    ForeignConflict(Vec<PathBuf>),
}

/// Proof that the guard approved installing to a configuration path.
#[derive(Debug)]
pub struct InstallApproval {
    config_path: PathBuf,
}

impl InstallApproval {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[derive(Debug)]
pub struct InstallationGuard<'a> {
    settings: &'a Settings,
    foreign_rules_confirmed: bool,
}

impl<'a> InstallationGuard<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            foreign_rules_confirmed: false,
        }
    }

    pub fn marker(&self) -> InstallationMarker {
        InstallationMarker::new(&self.settings.state_dir)
    }

    pub fn check(&self) -> InstallState {
        let present: Vec<PathBuf> = [
            self.settings.config_path(),
            self.settings.server_private_key_path(),
            self.settings.server_public_key_path(),
        ]
        .into_iter()
        .filter(|p| p.exists())
        .collect();
        if present.is_empty() {
            InstallState::Clean
        } else if self.marker().is_present() {
            InstallState::OwnedInstall
        } else {
            InstallState::ForeignConflict(present)
        }
    }

    /// Live rules this tool did not create.
    pub fn foreign_rules(&self, backend: &dyn FirewallBackend) -> Result<Vec<LiveRule>> {
        foreign_live_rules(backend)
    }

    /// Operator accepted the foreign live rules. Lasts for this guard only.
    pub fn confirm_foreign_rules(&mut self) {
        self.foreign_rules_confirmed = true;
    }

    pub fn foreign_rules_confirmed(&self) -> bool {
        self.foreign_rules_confirmed
    }

    /**
     * @brief Approve a fresh install or explain why not.
     * @return PreconditionFailed on an existing installation, foreign state,
     *         or unconfirmed foreign live rules.
     */
    pub fn approve(&self, backend: &dyn FirewallBackend) -> Result<InstallApproval> {
        match self.check() {
            InstallState::Clean => {}
            InstallState::OwnedInstall => {
                return Err(Error::PreconditionFailed(format!(
                    "{} is already installed; manage clients or uninstall first",
                    self.settings.interface
                )));
            }
            InstallState::ForeignConflict(paths) => {
                let list: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                warn!("foreign overlay state: {}", list.join(", "));
                return Err(Error::PreconditionFailed(format!(
                    "existing configuration not created by wg-overlay: {}",
                    list.join(", ")
                )));
            }
        }
        let foreign = self.foreign_rules(backend)?;
        if !foreign.is_empty() {
            if !self.foreign_rules_confirmed {
                return Err(Error::PreconditionFailed(format!(
                    "{} live firewall rules were not created by wg-overlay; confirm to install alongside them",
                    foreign.len()
                )));
            }
            info!("installing alongside {} confirmed foreign firewall rules", foreign.len());
        }
        Ok(InstallApproval {
            config_path: self.settings.config_path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::Table;
    use crate::mock::MemoryFirewall;
    use std::fs;

    #[test]
    fn empty_host_is_clean() {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::rooted(root.path());
        let guard = InstallationGuard::new(&settings);
        assert_eq!(guard.check(), InstallState::Clean);
        assert!(guard.approve(&MemoryFirewall::new()).is_ok());
    }

    #[test]
    fn keys_without_marker_are_foreign() {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::rooted(root.path());
        fs::create_dir_all(&settings.config_dir).unwrap();
        fs::write(settings.server_private_key_path(), "k\n").unwrap();
        let guard = InstallationGuard::new(&settings);
        assert_eq!(
            guard.check(),
            InstallState::ForeignConflict(vec![settings.server_private_key_path()])
        );
        assert!(matches!(
            guard.approve(&MemoryFirewall::new()),
            Err(Error::PreconditionFailed(_))
        ));
        // the foreign file is left alone
        assert_eq!(fs::read_to_string(settings.server_private_key_path()).unwrap(), "k\n");
    }

    #[test]
    fn config_with_marker_is_owned() {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::rooted(root.path());
        fs::create_dir_all(&settings.config_dir).unwrap();
        fs::write(settings.config_path(), "[Interface]\n").unwrap();
        let guard = InstallationGuard::new(&settings);
        guard.marker().set().unwrap();
        assert_eq!(guard.check(), InstallState::OwnedInstall);
        assert!(guard.approve(&MemoryFirewall::new()).is_err());
    }

    #[test]
    fn foreign_rules_need_confirmation_once() {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::rooted(root.path());
        let fw = MemoryFirewall::new();
        fw.insert_foreign(Table::Filter, "-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT");
        let mut guard = InstallationGuard::new(&settings);
        assert!(matches!(guard.approve(&fw), Err(Error::PreconditionFailed(_))));
        guard.confirm_foreign_rules();
        assert!(guard.approve(&fw).is_ok());
        assert!(guard.approve(&fw).is_ok());
        // a new guard starts unconfirmed
        assert!(InstallationGuard::new(&settings).approve(&fw).is_err());
    }

    #[test]
    fn marker_set_and_clear() {
        let root = tempfile::tempdir().unwrap();
        let marker = InstallationMarker::new(root.path());
        assert!(!marker.is_present());
        marker.set().unwrap();
        assert!(marker.is_present());
        marker.clear().unwrap();
        marker.clear().unwrap();
        assert!(!marker.is_present());
    }
}
