use clap::{Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use wg_overlay::client::render_qr;
use wg_overlay::config::load_settings;
use wg_overlay::firewall::IptablesBackend;
use wg_overlay::guard::{InstallState, InstallationGuard};
use wg_overlay::host::{default_route_interface, LocalRouteResolver, SystemdController};
use wg_overlay::keys::X25519KeyGenerator;
use wg_overlay::{Error, InstallRequest, Overlay};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("{:?} error: {:?}", e.kind(), e);
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let settings = load_settings(cli.settings)?;
    let firewall = IptablesBackend;
    let service = SystemdController;
    let keys = X25519KeyGenerator;
    let resolver = LocalRouteResolver;
    let overlay = Overlay::new(settings, &firewall, &service, &keys, &resolver);

    match cli.cmd {
        Cmd::Install { interface, port, endpoint, yes } => {
            let outbound = interface
                .or_else(default_route_interface)
                .unwrap_or_else(|| "eth0".into());
            let listen_port = port.unwrap_or(overlay.settings().default_port);
            let mut confirm = yes;
            if !confirm {
                let foreign = InstallationGuard::new(overlay.settings()).foreign_rules(&firewall)?;
                if !foreign.is_empty() {
                    eprintln!("{} live firewall rules were not created by wg-overlay.", foreign.len());
                    confirm = ask("Install alongside them?")?;
                }
            }
            let server = overlay.install(&InstallRequest {
                outbound_interface: outbound,
                listen_port,
                endpoint,
                confirm_foreign_rules: confirm,
            })?;
            println!("Installed {} on UDP {}", overlay.settings().interface, server.listen_port);
            println!("Server public key: {}", server.public_key);
        }
        Cmd::AddClient { name } => {
            let (peer, conf) = overlay.add_client(&name)?;
            println!("Added {} at {}", peer.name, peer.address);
            println!("Client config: {}", conf.display());
        }
        Cmd::ListClients { json } => {
            let peers = overlay.list_clients()?;
            if json {
                let rows: Vec<_> = peers
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "address": p.address.to_string(),
                            "public_key": p.public_key,
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(rows));
            } else {
                for p in peers {
                    println!("{} {} {}", p.name, p.address, p.public_key);
                }
            }
        }
        Cmd::ShowClient { name, no_qr } => {
            let text = overlay.show_client(&name)?;
            println!("{}", text);
            if !no_qr {
                println!("{}", render_qr(&text)?);
            }
        }
        Cmd::DeleteClient { name } => match overlay.delete_client(&name)? {
            Some(peer) => println!("Deleted {} ({})", peer.name, peer.address),
            None => println!("No client named {}", name),
        },
        Cmd::Uninstall { yes } => {
            let marker = InstallationGuard::new(overlay.settings()).marker();
            if !marker.is_present() {
                return Err(Error::NotInstalled(format!("{} is absent", marker.path().display())));
            }
            if !yes && !ask("Remove the overlay, its clients and its firewall rules?")? {
                println!("Aborted");
                return Ok(());
            }
            let report = overlay.uninstall()?;
            println!(
                "Removed {} live rules, {} persisted rules, {} paths",
                report.live_rules_removed, report.persisted_rules_removed, report.paths_removed
            );
        }
        Cmd::Status => match overlay.status() {
            InstallState::Clean => println!("not installed"),
            InstallState::OwnedInstall => {
                let server = overlay.server()?;
                println!(
                    "installed: {}/{} port {} via {}, {} clients",
                    server.address,
                    server.prefix_len,
                    server.listen_port,
                    server.outbound_interface,
                    server.peers.len()
                );
            }
            InstallState::ForeignConflict(paths) => {
                for p in paths {
                    println!("foreign: {}", p.display());
                }
            }
        },
    }
    Ok(())
}

/// Yes/no prompt on a terminal; anything but an explicit yes, or no terminal, is a no.
fn ask(question: &str) -> Result<bool, Error> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }
    print!("{} [y/N] ", question);
    io::stdout().flush().map_err(|e| Error::Io { path: PathBuf::from("<stdout>"), source: e })?;
    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .map_err(|e| Error::Io { path: PathBuf::from("<stdin>"), source: e })?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[derive(Parser)]
#[command(name = "wg-overlay")]
#[command(version, about = "WireGuard overlay installer and client manager")]
struct Cli {
    /// Settings file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the server configuration and start the overlay
    Install {
        /// Outbound interface for NAT (default: the default-route interface)
        #[arg(long)]
        interface: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Public address clients connect to
        #[arg(long)]
        endpoint: Option<String>,
        /// Proceed even if foreign firewall rules are live
        #[arg(long)]
        yes: bool,
    },
    AddClient { name: String },
    ListClients {
        #[arg(long)]
        json: bool,
    },
    ShowClient {
        name: String,
        #[arg(long)]
        no_qr: bool,
    },
    DeleteClient { name: String },
    Uninstall {
        #[arg(long)]
        yes: bool,
    },
    Status,
}
