//! X25519 Diffie-Hellman und Schluesselableitung
//!
//! Ablauf fuer einen gemeinsamen Kanal:
//! 1. Beide Seiten erzeugen ein Schluesselpaar (`generate_key_pair`)
//! 2. Oeffentliche Schluessel werden ausgetauscht
//! 3. `derive_sym_key` = HKDF-SHA256(ECDH(eigen_privat, peer_oeffentlich))
//! 4. Das Topic des Kanals ist `sha256(sym_key)` als Hex (`hash_key`)

use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::OsRng;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use tandem_core::Topic;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeyPair, SecretKey, KEY_LEN};

/// Erzeugt ein frisches X25519-Schluesselpaar
pub fn generate_key_pair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519PublicKey::from(&secret);
    KeyPair {
        public_key: public.to_bytes(),
        private_key: SecretKey::new(secret.to_bytes()),
    }
}

/// Erzeugt einen zufaelligen symmetrischen Schluessel
pub fn generate_sym_key() -> SecretKey {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    SecretKey::new(bytes)
}

/// Leitet aus eigenem privaten und fremdem oeffentlichen Schluessel den
/// gemeinsamen symmetrischen Schluessel ab
pub fn derive_sym_key(
    private_key: &SecretKey,
    peer_public_key: &[u8; KEY_LEN],
) -> CryptoResult<SecretKey> {
    let secret = StaticSecret::from(*private_key.as_bytes());
    let peer = X25519PublicKey::from(*peer_public_key);
    let shared = secret.diffie_hellman(&peer);

    if !shared.was_contributory() {
        return Err(CryptoError::KeyDerivation(
            "Oeffentlicher Schluessel der Gegenstelle ist schwach".into(),
        ));
    }

    let okm = hkdf_derive(shared.as_bytes(), &[], &[], KEY_LEN)?;
    SecretKey::aus_slice(&okm)
}

/// HKDF-SHA256: Extract + Expand
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Topic eines symmetrischen Schluessels: `sha256(key)`
pub fn hash_key(key: &SecretKey) -> Topic {
    let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
    Topic::aus_bytes(&digest)
}

/// Hex-SHA256 einer Nachricht (fuer Duplikaterkennung)
pub fn hash_message(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
