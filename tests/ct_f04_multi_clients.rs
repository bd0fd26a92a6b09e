use std::collections::HashSet;
use std::net::Ipv4Addr;
use wg_overlay::config::Settings;
use wg_overlay::guard::InstallationGuard;
use wg_overlay::keys::{KeyGenerator, KeyPair};
use wg_overlay::mock::{MemoryFirewall, SequenceKeyGenerator};
use wg_overlay::peer_registry::PeerRegistry;
use wg_overlay::store::ServerConfigStore;
use wg_overlay::Error;

fn installed(root: &std::path::Path) -> ServerConfigStore {
    let store = ServerConfigStore::new(Settings::rooted(root));
    let approval = InstallationGuard::new(store.settings())
        .approve(&MemoryFirewall::new())
        .unwrap();
    let keys = KeyPair {
        private_key: "c2VydmVyLXByaXZhdGU=".into(),
        public_key: "c2VydmVyLXB1YmxpYw==".into(),
    };
    store.create(&approval, "eth0", 51820, &keys).unwrap();
    store
}

/// 32-byte keys unique per index.
fn key(i: u32) -> String {
    use base64::Engine as _;
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&i.to_be_bytes());
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[test]
fn ct_f04_multiple_clients_get_distinct_addresses() {
    let root = tempfile::tempdir().unwrap();
    let store = installed(root.path());
    let registry = PeerRegistry::new(&store);
    let gen = SequenceKeyGenerator::new();
    for i in 0..10 {
        let pair = gen.generate().unwrap();
        registry.add(&format!("client{}", i), &pair.public_key).unwrap();
    }
    let peers = registry.list().unwrap();
    assert_eq!(peers.len(), 10);
    let addrs: HashSet<Ipv4Addr> = peers.iter().map(|p| p.address).collect();
    assert_eq!(addrs.len(), 10);
    assert_eq!(peers[0].address, Ipv4Addr::new(10, 66, 66, 2));
    assert_eq!(peers[9].address, Ipv4Addr::new(10, 66, 66, 11));
}

#[test]
fn ct_f04_freed_address_is_reused_lowest_first() {
    let root = tempfile::tempdir().unwrap();
    let store = installed(root.path());
    let registry = PeerRegistry::new(&store);
    registry.add("a", &key(1)).unwrap();
    registry.add("b", &key(2)).unwrap();
    registry.add("c", &key(3)).unwrap();
    registry.remove("a").unwrap();
    let d = registry.add("d", &key(4)).unwrap();
    assert_eq!(d.address, Ipv4Addr::new(10, 66, 66, 2));
    let names: Vec<String> = registry.list().unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["b", "c", "d"]);
}

#[test]
fn ct_f04_capacity_is_253_clients() {
    let root = tempfile::tempdir().unwrap();
    let store = installed(root.path());
    let registry = PeerRegistry::new(&store);
    for i in 0..253u32 {
        registry.add(&format!("c{}", i), &key(i)).unwrap();
    }
    let before = std::fs::read_to_string(store.settings().config_path()).unwrap();
    assert!(matches!(registry.add("overflow", &key(999)), Err(Error::AddressSpaceExhausted)));
    let after = std::fs::read_to_string(store.settings().config_path()).unwrap();
    assert_eq!(before, after);
    assert_eq!(
        registry.get("c252").unwrap().address,
        Ipv4Addr::new(10, 66, 66, 254)
    );
}
