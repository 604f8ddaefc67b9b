//! # tandem-crypto
//!
//! Kanal-Kryptografie fuer Tandem.
//!
//! ## Module
//! - `exchange` - X25519-Schluesselpaare, ECDH + HKDF, Topic-Ableitung
//! - `envelope` - ChaCha20-Poly1305-Umschlag (Typ 0 symmetrisch, Typ 1 Bootstrap)
//! - `keychain` - Schluesselbund: Tag -> Geheimnis
//! - `types` - Gemeinsame Typen (SecretKey, KeyPair)
//! - `error` - Fehlertypen

pub mod envelope;
pub mod error;
pub mod exchange;
pub mod keychain;
pub mod types;

// Bequeme Re-Exports
pub use envelope::{Envelope, EnvelopeTyp};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{derive_sym_key, generate_key_pair, generate_sym_key, hash_key, hash_message};
pub use keychain::Keychain;
pub use types::{public_key_aus_hex, KeyPair, SecretKey, KEY_LEN};
