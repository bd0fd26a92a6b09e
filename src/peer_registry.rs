use crate::allocator::{allocate, host_address};
use crate::error::{Error, Result};
use crate::keys::validate_public_key_b64;
use crate::store::ServerConfigStore;
use crate::wg::PeerEntry;
use log::info;
use std::collections::HashSet;

/// Longest client name accepted; matches the interface name limit.
pub const MAX_NAME_LEN: usize = 15;

/**
 * @brief Client names are 1-15 letters, digits, '_' or '-'.
 */
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Peer blocks inside the server configuration file.
#[derive(Debug, Clone, Copy)]
pub struct PeerRegistry<'a> {
    store: &'a ServerConfigStore,
}

impl<'a> PeerRegistry<'a> {
    pub fn new(store: &'a ServerConfigStore) -> Self {
        Self { store }
    }

    /**
     * @brief List peers in file order.
     * @return Peer entries, or CorruptConfig when a block is malformed.
     */
    pub fn list(&self) -> Result<Vec<PeerEntry>> {
        self.store.require_installed()?;
        Ok(self.store.load_document()?.peers())
    }

    /**
     * @brief Look up one peer by name.
     */
    pub fn get(&self, name: &str) -> Result<PeerEntry> {
        self.list()?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::NotFound(format!("client {:?}", name)))
    }

    /**
     * @brief Add a peer, allocating the lowest free address.
     * @param name Client name.
     * @param public_key Peer public key (Base64-encoded, 32 bytes).
     * @return The new entry as written.
     */
    pub fn add(&self, name: &str, public_key: &str) -> Result<PeerEntry> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        validate_public_key_b64(public_key)?;
        self.store.require_installed()?;

        let mut doc = self.store.load_document()?;
        let server = doc.interface()?.address;
        let peers = doc.peers();
        if peers.iter().any(|p| p.name == name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        if let Some(owner) = peers.iter().find(|p| p.public_key == public_key) {
            return Err(Error::DuplicatePublicKey(owner.name.clone()));
        }

        let mut used: HashSet<_> = peers.iter().map(|p| p.address).collect();
        used.insert(server);
        let entry = PeerEntry {
            name: name.to_string(),
            public_key: public_key.to_string(),
            address: allocate(host_address(server, 0), &used)?,
        };
        doc.push_peer(entry.clone());
        self.store.save_document(&doc)?;
        info!("added client {} at {}", entry.name, entry.address);
        Ok(entry)
    }

    /**
     * @brief Remove a peer block and its padding.
     * @return The removed entry, or NotFound with the file untouched.
     */
    pub fn remove(&self, name: &str) -> Result<PeerEntry> {
        self.store.require_installed()?;
        let mut doc = self.store.load_document()?;
        let removed = doc
            .remove_peer(name)
            .ok_or_else(|| Error::NotFound(format!("client {:?}", name)))?;
        self.store.save_document(&doc)?;
        info!("removed client {} ({})", removed.name, removed.address);
        Ok(removed)
    }
}
