/* \page OverlayOverview Overlay Overview
WireGuard overlay installation and client management.

- Settings and derived paths (`config.rs`), errors (`error.rs`).
- Client address allocation (`allocator.rs`).
- Configuration file format with marker-delimited peer blocks (`wg.rs`).
- Server configuration and durable state (`store.rs`).
- Peer registry (`peer_registry.rs`) and client artifacts (`client.rs`).
- Tagged firewall rules, live (`firewall.rs`) and persisted (`rules_file.rs`).
- Install gate (`guard.rs`) and teardown (`uninstall.rs`).
- Host collaborators (`keys.rs`, `host.rs`, `mock.rs`), lock and journal (`lock.rs`, `filelog.rs`).
- Operation entry points (`engine.rs`).
*/
pub mod allocator;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod filelog;
pub mod firewall;
pub mod fsutil;
pub mod guard;
pub mod host;
pub mod keys;
pub mod lock;
pub mod mock;
pub mod peer_registry;
pub mod rules_file;
pub mod store;
pub mod uninstall;
pub mod wg;

pub use engine::{InstallRequest, Overlay};
pub use error::{Error, ErrorKind, Result};
