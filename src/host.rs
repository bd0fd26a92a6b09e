//! Host services the engine drives but does not own: the overlay service
//! unit, kernel forwarding and public endpoint discovery.

use crate::error::{Error, Result};
use log::{debug, warn};
use std::net::{IpAddr, UdpSocket};
use std::path::Path;
use std::process::Command;

/// Lifecycle of the overlay network interface.
pub trait ServiceController {
    /// Enable at boot and start now.
    fn enable(&self, interface: &str) -> Result<()>;
    /// Apply peer changes without dropping existing sessions.
    fn reload(&self, interface: &str) -> Result<()>;
    /// Stop and disable at boot.
    fn disable(&self, interface: &str) -> Result<()>;
    /// Load a sysctl drop-in file.
    fn apply_sysctl(&self, path: &Path) -> Result<()>;
}

fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!("running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::tool(program, format!("failed to run: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::tool(
            program,
            format!("{} {}: {}", program, args.join(" "), stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `wg-quick@<iface>` units managed through systemctl.
#[derive(Debug, Default, Clone)]
pub struct SystemdController;

impl SystemdController {
    fn unit(interface: &str) -> String {
        format!("wg-quick@{}", interface)
    }
}

impl ServiceController for SystemdController {
    fn enable(&self, interface: &str) -> Result<()> {
        let unit = Self::unit(interface);
        run("systemctl", &["enable", "--now", unit.as_str()]).map(|_| ())
    }

    fn reload(&self, interface: &str) -> Result<()> {
        let unit = Self::unit(interface);
        run("systemctl", &["reload", unit.as_str()]).map(|_| ())
    }

    fn disable(&self, interface: &str) -> Result<()> {
        let unit = Self::unit(interface);
        run("systemctl", &["disable", "--now", unit.as_str()]).map(|_| ())
    }

    fn apply_sysctl(&self, path: &Path) -> Result<()> {
        let p = path.to_string_lossy();
        run("sysctl", &["-p", &*p]).map(|_| ())
    }
}

/// Best-effort discovery of the address clients should connect to.
pub trait EndpointResolver {
    fn resolve(&self) -> Option<String>;
}

/// A fixed endpoint, from settings or the command line.
#[derive(Debug, Clone)]
pub struct FixedEndpoint(pub String);

impl EndpointResolver for FixedEndpoint {
    fn resolve(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Source address of the default route, found by connecting a UDP socket.
/// Connecting a datagram socket sends nothing.
#[derive(Debug, Default, Clone)]
pub struct LocalRouteResolver;

impl EndpointResolver for LocalRouteResolver {
    fn resolve(&self) -> Option<String> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("1.1.1.1:53").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip.to_string()),
            other => {
                warn!("no usable IPv4 source address (got {})", other);
                None
            }
        }
    }
}

/**
 * @brief Name of the interface carrying the default route, if any.
 */
pub fn default_route_interface() -> Option<String> {
    let out = run("ip", &["-4", "route", "show", "default"]).ok()?;
    parse_default_route(&out)
}

fn parse_default_route(out: &str) -> Option<String> {
    let mut tokens = out.lines().next()?.split_whitespace();
    tokens.by_ref().find(|t| *t == "dev")?;
    tokens.next().map(str::to_string)
}
