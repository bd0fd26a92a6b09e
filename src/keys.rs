use crate::error::{Error, Result};
use base64::{engine::general_purpose, Engine as _};
use x25519_dalek::{PublicKey, StaticSecret};

/// Base64 encoded WireGuard key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Source of fresh key pairs.
pub trait KeyGenerator {
    fn generate(&self) -> Result<KeyPair>;
}

/// Curve25519 keys from the OS random number generator.
#[derive(Debug, Default, Clone)]
pub struct X25519KeyGenerator;

impl KeyGenerator for X25519KeyGenerator {
    fn generate(&self) -> Result<KeyPair> {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Ok(KeyPair {
            private_key: general_purpose::STANDARD.encode(secret.to_bytes()),
            public_key: general_purpose::STANDARD.encode(public.as_bytes()),
        })
    }
}

/**
 * @brief Validate a Base64 key decodes to 32 bytes.
 * @param b64 Base64-encoded key.
 */
pub fn validate_public_key_b64(b64: &str) -> Result<()> {
    let bytes = general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Error::InvalidKey(format!("{:?} is not base64: {}", b64, e)))?;
    if bytes.len() != 32 {
        return Err(Error::InvalidKey(format!(
            "{:?} decodes to {} bytes, expected 32",
            b64,
            bytes.len()
        )));
    }
    Ok(())
}
