//! The `wg-quick` configuration file, parsed into structured records.
//!
//! The file is kept as a sequence of segments: free text (the `[Interface]`
//! section and anything else) and peer blocks delimited by
//! `# BEGIN <name>` / `# END <name>`. Rendering concatenates the segments,
//! so parsing and rendering an unmodified file is byte-identical.

use crate::error::{Error, Result};
use crate::peer_registry::is_valid_name;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

const BEGIN: &str = "# BEGIN ";
const END: &str = "# END ";

/// One client authorised on the overlay. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub name: String,
    pub public_key: String,
    pub address: Ipv4Addr,
}

impl PeerEntry {
    /// The marker-delimited block for this peer, without padding.
    pub fn render_block(&self) -> String {
        format!(
            "{BEGIN}{name}\n[Peer]\nPublicKey = {key}\nAllowedIPs = {addr}/32\n{END}{name}\n",
            name = self.name,
            key = self.public_key,
            addr = self.address
        )
    }
}

/// The `[Interface]` section as written by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSection {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub listen_port: u16,
    pub private_key: String,
    pub post_up: Vec<String>,
    pub post_down: Vec<String>,
}

impl InterfaceSection {
    pub fn render(&self) -> String {
        let mut out = String::from("[Interface]\n");
        out.push_str(&format!("Address = {}/{}\n", self.address, self.prefix_len));
        out.push_str(&format!("ListenPort = {}\n", self.listen_port));
        out.push_str(&format!("PrivateKey = {}\n", self.private_key));
        for hook in &self.post_up {
            out.push_str(&format!("PostUp = {}\n", hook));
        }
        for hook in &self.post_down {
            out.push_str(&format!("PostDown = {}\n", hook));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Peer {
        entry: PeerEntry,
        padding: String,
        raw: String,
    },
}

/// A parsed configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    path: PathBuf,
    segments: Vec<Segment>,
}

impl ConfigDocument {
    /// A new document holding only `text`.
    pub fn new(path: &Path, text: String) -> Self {
        Self {
            path: path.to_path_buf(),
            segments: vec![Segment::Text(text)],
        }
    }

    /**
     * @brief Split `text` into free text and peer blocks.
     * @param path Used in error messages only.
     * @return CorruptConfig on unbalanced markers or a block missing its key or address.
     */
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut pending = String::new();
        let mut block: Option<(String, usize, String, String)> = None;

        for (idx, line) in text.split_inclusive('\n').enumerate() {
            let lineno = idx + 1;
            let trimmed = line.trim_end();
            if let Some((name, start, padding, mut raw)) = block.take() {
                raw.push_str(line);
                if let Some(end) = trimmed.strip_prefix(END) {
                    if end.trim() != name {
                        return Err(Error::corrupt(
                            path,
                            lineno,
                            format!("'# END {}' closes block '{}'", end.trim(), name),
                        ));
                    }
                    let entry = parse_block(path, start, &name, &raw)?;
                    segments.push(Segment::Peer { entry, padding, raw });
                } else if trimmed.starts_with(BEGIN) {
                    return Err(Error::corrupt(
                        path,
                        lineno,
                        format!("BEGIN inside unterminated block '{}'", name),
                    ));
                } else {
                    block = Some((name, start, padding, raw));
                }
                continue;
            }
            if let Some(name) = trimmed.strip_prefix(BEGIN) {
                let mut padding = String::new();
                if pending == "\n" || pending.ends_with("\n\n") {
                    pending.pop();
                    padding.push('\n');
                }
                if !pending.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut pending)));
                }
                block = Some((name.trim().to_string(), lineno, padding, line.to_string()));
            } else if trimmed.starts_with(END) {
                return Err(Error::corrupt(path, lineno, "END without matching BEGIN"));
            } else {
                pending.push_str(line);
            }
        }
        if let Some((name, start, _, _)) = block {
            return Err(Error::corrupt(
                path,
                start,
                format!("BEGIN '{}' has no matching END", name),
            ));
        }
        if !pending.is_empty() {
            segments.push(Segment::Text(pending));
        }
        Ok(Self {
            path: path.to_path_buf(),
            segments,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Peer { padding, raw, .. } => {
                    out.push_str(padding);
                    out.push_str(raw);
                }
            }
        }
        out
    }

    /// Peers in file order.
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Peer { entry, .. } => Some(entry.clone()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Append a peer block, separated from the previous content by one blank line.
    pub fn push_peer(&mut self, entry: PeerEntry) {
        let text = self.render();
        if !text.is_empty() && !text.ends_with('\n') {
            self.segments.push(Segment::Text("\n".into()));
        }
        let raw = entry.render_block();
        self.segments.push(Segment::Peer {
            entry,
            padding: "\n".into(),
            raw,
        });
    }

    /// Remove the named block and its padding. Returns the removed entry.
    pub fn remove_peer(&mut self, name: &str) -> Option<PeerEntry> {
        let pos = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Peer { entry, .. } if entry.name == name))?;
        match self.segments.remove(pos) {
            Segment::Peer { entry, .. } => Some(entry),
            Segment::Text(_) => None,
        }
    }

    /// Parse the `[Interface]` section.
    pub fn interface(&self) -> Result<InterfaceSection> {
        let mut in_interface = false;
        let mut address = None;
        let mut listen_port = None;
        let mut private_key = None;
        let mut post_up = Vec::new();
        let mut post_down = Vec::new();
        let mut lineno = 0;
        let mut header_line = None;

        for segment in &self.segments {
            let text = match segment {
                Segment::Text(text) => text,
                Segment::Peer { padding, raw, .. } => {
                    lineno += padding.lines().count() + raw.lines().count();
                    in_interface = false;
                    continue;
                }
            };
            for line in text.lines() {
                lineno += 1;
                let line = line.trim();
                if line.starts_with('[') {
                    in_interface = line == "[Interface]";
                    if in_interface && header_line.is_none() {
                        header_line = Some(lineno);
                    }
                    continue;
                }
                if !in_interface || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    continue;
                };
                let value = value.trim();
                match key.trim() {
                    "Address" => {
                        let (ip, prefix) = value.split_once('/').unwrap_or((value, "32"));
                        let ip = ip.parse::<Ipv4Addr>().map_err(|e| {
                            Error::corrupt(&self.path, lineno, format!("Address {:?}: {}", value, e))
                        })?;
                        let prefix = prefix.parse::<u8>().map_err(|e| {
                            Error::corrupt(&self.path, lineno, format!("Address {:?}: {}", value, e))
                        })?;
                        address = Some((ip, prefix));
                    }
                    "ListenPort" => {
                        let port = value.parse::<u16>().map_err(|e| {
                            Error::corrupt(&self.path, lineno, format!("ListenPort {:?}: {}", value, e))
                        })?;
                        listen_port = Some(port);
                    }
                    "PrivateKey" => private_key = Some(value.to_string()),
                    "PostUp" => post_up.push(value.to_string()),
                    "PostDown" => post_down.push(value.to_string()),
                    _ => {}
                }
            }
        }

        let Some(header_line) = header_line else {
            return Err(Error::corrupt(&self.path, 1, "no [Interface] section"));
        };
        let missing = |field: &str| Error::corrupt(&self.path, header_line, format!("[Interface] has no {}", field));
        let (address, prefix_len) = address.ok_or_else(|| missing("Address"))?;
        Ok(InterfaceSection {
            address,
            prefix_len,
            listen_port: listen_port.ok_or_else(|| missing("ListenPort"))?,
            private_key: private_key.ok_or_else(|| missing("PrivateKey"))?,
            post_up,
            post_down,
        })
    }
}

fn parse_block(path: &Path, start: usize, name: &str, raw: &str) -> Result<PeerEntry> {
    if !is_valid_name(name) {
        return Err(Error::corrupt(path, start, format!("invalid peer name {:?}", name)));
    }
    let mut saw_header = false;
    let mut public_key = None;
    let mut address = None;
    for (offset, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line == "[Peer]" {
            saw_header = true;
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "PublicKey" => public_key = Some(value.to_string()),
            "AllowedIPs" => {
                let ip = value
                    .strip_suffix("/32")
                    .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
                    .ok_or_else(|| {
                        Error::corrupt(
                            path,
                            start + offset,
                            format!("peer '{}' AllowedIPs {:?} is not a single /32", name, value),
                        )
                    })?;
                address = Some(ip);
            }
            _ => {}
        }
    }
    let missing = |what: &str| Error::corrupt(path, start, format!("peer '{}' has no {}", name, what));
    if !saw_header {
        return Err(missing("[Peer] header"));
    }
    Ok(PeerEntry {
        name: name.to_string(),
        public_key: public_key.ok_or_else(|| missing("PublicKey"))?,
        address: address.ok_or_else(|| missing("AllowedIPs"))?,
    })
}
