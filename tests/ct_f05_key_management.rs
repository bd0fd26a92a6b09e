use wg_overlay::config::Settings;
use wg_overlay::guard::InstallationGuard;
use wg_overlay::keys::{validate_public_key_b64, KeyGenerator, X25519KeyGenerator};
use wg_overlay::mock::MemoryFirewall;
use wg_overlay::peer_registry::PeerRegistry;
use wg_overlay::store::ServerConfigStore;
use wg_overlay::{Error, ErrorKind};

fn installed(root: &std::path::Path) -> ServerConfigStore {
    let store = ServerConfigStore::new(Settings::rooted(root));
    let approval = InstallationGuard::new(store.settings())
        .approve(&MemoryFirewall::new())
        .unwrap();
    let keys = X25519KeyGenerator.generate().unwrap();
    store.create(&approval, "eth0", 51820, &keys).unwrap();
    store
}

#[test]
fn ct_f05_validate_public_key_length() {
    assert!(validate_public_key_b64("AAAA").is_err());
    let pair = X25519KeyGenerator.generate().unwrap();
    assert!(validate_public_key_b64(&pair.public_key).is_ok());
}

#[test]
fn ct_f05_add_rejects_bad_key_and_reused_key() {
    let root = tempfile::tempdir().unwrap();
    let store = installed(root.path());
    let registry = PeerRegistry::new(&store);
    let err = registry.add("laptop", "AAAA").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);

    let pair = X25519KeyGenerator.generate().unwrap();
    registry.add("laptop", &pair.public_key).unwrap();
    match registry.add("phone", &pair.public_key) {
        Err(Error::DuplicatePublicKey(owner)) => assert_eq!(owner, "laptop"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn ct_f05_server_private_key_is_not_world_readable() {
    let root = tempfile::tempdir().unwrap();
    let store = installed(root.path());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for p in [store.settings().server_private_key_path(), store.settings().config_path()] {
            let mode = std::fs::metadata(&p).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0, "{}", p.display());
        }
    }
    let server = store.load().unwrap();
    assert!(validate_public_key_b64(&server.public_key).is_ok());
}
