//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use crate::error::{CryptoError, CryptoResult};

/// Laenge aller Schluessel (X25519 und ChaCha20-Poly1305)
pub const KEY_LEN: usize = 32;

/// Geheimer 32-Byte-Schluessel (wird beim Drop genullt)
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED] {KEY_LEN} bytes)")
    }
}

impl SecretKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Uebernimmt einen Slice, der genau 32 Bytes lang sein muss
    pub fn aus_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                    erwartet: KEY_LEN,
                    erhalten: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Parst einen Hex-String
    pub fn aus_hex(hex_str: &str) -> CryptoResult<Self> {
        Self::aus_slice(&hex::decode(hex_str)?)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// X25519-Schluesselpaar
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: [u8; KEY_LEN],
    pub private_key: SecretKey,
}

impl KeyPair {
    /// Oeffentlicher Schluessel als Hex
    pub fn public_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

/// Parst einen oeffentlichen Schluessel aus Hex
pub fn public_key_aus_hex(hex_str: &str) -> CryptoResult<[u8; KEY_LEN]> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
            erwartet: KEY_LEN,
            erhalten: bytes.len(),
        })
}
