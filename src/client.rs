//! Per-client artifact directory: key pair plus an importable config.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::fsutil::{read_optional, write_atomic};
use crate::keys::KeyPair;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Everything a client needs to join the overlay.
#[derive(Debug, Clone)]
pub struct ClientArtifact {
    pub name: String,
    pub keys: KeyPair,
    pub address: Ipv4Addr,
    pub dns: Vec<String>,
    pub server_public_key: String,
    pub endpoint: String,
    pub listen_port: u16,
}

impl ClientArtifact {
    /// Client side `wg-quick` configuration.
    pub fn render(&self) -> String {
        let mut out = String::from("[Interface]\n");
        out.push_str(&format!("PrivateKey = {}\n", self.keys.private_key));
        out.push_str(&format!("Address = {}/32\n", self.address));
        if !self.dns.is_empty() {
            out.push_str(&format!("DNS = {}\n", self.dns.join(", ")));
        }
        out.push_str("\n[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", self.server_public_key));
        out.push_str(&format!("Endpoint = {}:{}\n", endpoint_host(&self.endpoint), self.listen_port));
        out.push_str("AllowedIPs = 0.0.0.0/0\n");
        out.push_str("PersistentKeepalive = 25\n");
        out
    }

    /// Write keys and config under `<config_dir>/clients/<name>/`.
    pub fn write(&self, settings: &Settings) -> Result<PathBuf> {
        let dir = client_dir(settings, &self.name);
        write_atomic(&dir.join("private.key"), &format!("{}\n", self.keys.private_key), Some(0o600))?;
        write_atomic(&dir.join("public.key"), &format!("{}\n", self.keys.public_key), Some(0o644))?;
        let conf = dir.join(format!("{}.conf", self.name));
        write_atomic(&conf, &self.render(), Some(0o600))?;
        Ok(conf)
    }
}

fn endpoint_host(endpoint: &str) -> String {
    if endpoint.contains(':') && !endpoint.starts_with('[') {
        format!("[{}]", endpoint)
    } else {
        endpoint.to_string()
    }
}

pub fn client_dir(settings: &Settings, name: &str) -> PathBuf {
    settings.clients_dir().join(name)
}

/// Stored client config text.
pub fn read_client_config(settings: &Settings, name: &str) -> Result<String> {
    let conf = client_dir(settings, name).join(format!("{}.conf", name));
    read_optional(&conf)?
        .ok_or_else(|| Error::NotFound(format!("client config {}", conf.display())))
}

/**
 * @brief Render text as a terminal QR code.
 */
pub fn render_qr(text: &str) -> Result<String> {
    let code = qrcode::QrCode::new(text.as_bytes()).map_err(|e| Error::tool("qrcode", e.to_string()))?;
    Ok(code
        .render::<char>()
        .quiet_zone(false)
        .module_dimensions(2, 1)
        .build())
}
