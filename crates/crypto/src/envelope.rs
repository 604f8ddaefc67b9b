//! Umschlag-Verschluesselung (ChaCha20-Poly1305)
//!
//! ## Format (Base64, Standard-Alphabet mit Padding)
//! ```text
//! [typ(1)] [sender_public_key(32), nur Typ 1] [iv(12)] [ciphertext + tag(16)]
//! ```
//!
//! - Typ 0: beide Seiten kennen den symmetrischen Schluessel des Topics
//! - Typ 1: Bootstrap; der Sender haengt seinen X25519-Schluessel an, der
//!   Empfaenger leitet den Schluessel per ECDH ab

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SecretKey, KEY_LEN};

/// Laenge des Initialisierungsvektors
pub const IV_LEN: usize = 12;
/// Laenge des Poly1305-Tags
pub const TAG_LEN: usize = 16;

/// Typ-Byte des Umschlags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeTyp {
    Symmetrisch = 0,
    Bootstrap = 1,
}

impl EnvelopeTyp {
    pub fn aus_byte(b: u8) -> CryptoResult<Self> {
        match b {
            0 => Ok(Self::Symmetrisch),
            1 => Ok(Self::Bootstrap),
            andere => Err(CryptoError::UngueltigerUmschlag(format!(
                "Unbekannter Typ {andere}"
            ))),
        }
    }
}

/// Zerlegter Umschlag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub typ: EnvelopeTyp,
    pub sender_public_key: Option<[u8; KEY_LEN]>,
    pub iv: [u8; IV_LEN],
    /// Ciphertext mit angehaengtem Tag
    pub sealed: Vec<u8>,
}

impl Envelope {
    /// Serialisiert Header und Ciphertext als Base64
    pub fn kodieren(&self) -> String {
        let mut bytes = Vec::with_capacity(1 + KEY_LEN + IV_LEN + self.sealed.len());
        bytes.push(self.typ as u8);
        if let Some(pk) = &self.sender_public_key {
            bytes.extend_from_slice(pk);
        }
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.sealed);
        STANDARD.encode(bytes)
    }

    /// Parst einen Base64-Umschlag ohne zu entschluesseln
    pub fn parsen(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD.decode(encoded.trim())?;
        let (&typ_byte, rest) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::UngueltigerUmschlag("Leerer Umschlag".into()))?;
        let typ = EnvelopeTyp::aus_byte(typ_byte)?;

        let (sender_public_key, rest) = match typ {
            EnvelopeTyp::Symmetrisch => (None, rest),
            EnvelopeTyp::Bootstrap => {
                if rest.len() < KEY_LEN {
                    return Err(CryptoError::UngueltigerUmschlag(
                        "Absenderschluessel fehlt".into(),
                    ));
                }
                let (pk, rest) = rest.split_at(KEY_LEN);
                let mut arr = [0u8; KEY_LEN];
                arr.copy_from_slice(pk);
                (Some(arr), rest)
            }
        };

        if rest.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::UngueltigerUmschlag(format!(
                "Zu kurz: {} Bytes nach dem Header",
                rest.len()
            )));
        }
        let (iv_bytes, sealed) = rest.split_at(IV_LEN);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);

        Ok(Self {
            typ,
            sender_public_key,
            iv,
            sealed: sealed.to_vec(),
        })
    }
}

/// Verschluesselt `plaintext` und gibt den Base64-Umschlag zurueck
///
/// Fuer Typ 1 muss `sender_public_key` gesetzt sein.
pub fn encrypt(
    key: &SecretKey,
    plaintext: &[u8],
    typ: EnvelopeTyp,
    sender_public_key: Option<[u8; KEY_LEN]>,
) -> CryptoResult<String> {
    let sender_public_key = match (typ, sender_public_key) {
        (EnvelopeTyp::Symmetrisch, _) => None,
        (EnvelopeTyp::Bootstrap, Some(pk)) => Some(pk),
        (EnvelopeTyp::Bootstrap, None) => {
            return Err(CryptoError::Verschluesselung(
                "Typ 1 benoetigt den oeffentlichen Schluessel des Senders".into(),
            ))
        }
    };

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(nonce.as_slice());

    Ok(Envelope {
        typ,
        sender_public_key,
        iv,
        sealed,
    }
    .kodieren())
}

/// Entschluesselt einen bereits geparsten Umschlag
pub fn decrypt(key: &SecretKey, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(&envelope.iv), envelope.sealed.as_slice())
        .map_err(|_| CryptoError::Entschluesselung("Authentifizierung fehlgeschlagen".into()))
}

/// Liest nur das Typ-Byte
pub fn envelope_typ(encoded: &str) -> CryptoResult<EnvelopeTyp> {
    Ok(Envelope::parsen(encoded)?.typ)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{derive_sym_key, generate_key_pair, generate_sym_key};

    #[test]
    fn typ0_roundtrip() {
        let key = generate_sym_key();
        let kodiert = encrypt(&key, b"{\"hallo\":1}", EnvelopeTyp::Symmetrisch, None).unwrap();

        let env = Envelope::parsen(&kodiert).unwrap();
        assert_eq!(env.typ, EnvelopeTyp::Symmetrisch);
        assert!(env.sender_public_key.is_none());
        assert_eq!(decrypt(&key, &env).unwrap(), b"{\"hallo\":1}");
    }

    #[test]
    fn typ1_mit_abgeleitetem_schluessel() {
        let sender = generate_key_pair();
        let empfaenger = generate_key_pair();
        let key_sender = derive_sym_key(&sender.private_key, &empfaenger.public_key).unwrap();

        let kodiert = encrypt(
            &key_sender,
            b"bootstrap",
            EnvelopeTyp::Bootstrap,
            Some(sender.public_key),
        )
        .unwrap();

        let env = Envelope::parsen(&kodiert).unwrap();
        assert_eq!(env.typ, EnvelopeTyp::Bootstrap);
        let pk = env.sender_public_key.unwrap();
        assert_eq!(pk, sender.public_key);

        let key_empfaenger = derive_sym_key(&empfaenger.private_key, &pk).unwrap();
        assert_eq!(decrypt(&key_empfaenger, &env).unwrap(), b"bootstrap");
    }

    #[test]
    fn typ1_ohne_absender_schluessel_fehlschlag() {
        let key = generate_sym_key();
        assert!(encrypt(&key, b"x", EnvelopeTyp::Bootstrap, None).is_err());
    }

    #[test]
    fn falscher_schluessel_oder_manipulation() {
        let key = generate_sym_key();
        let kodiert = encrypt(&key, b"geheim", EnvelopeTyp::Symmetrisch, None).unwrap();

        let mut env = Envelope::parsen(&kodiert).unwrap();
        assert!(decrypt(&generate_sym_key(), &env).is_err());

        let letzter = env.sealed.len() - 1;
        env.sealed[letzter] ^= 0x01;
        assert!(decrypt(&key, &env).is_err());
    }

    #[test]
    fn header_layout() {
        let key = generate_sym_key();
        let kodiert = encrypt(&key, b"abc", EnvelopeTyp::Symmetrisch, None).unwrap();
        let roh = STANDARD.decode(&kodiert).unwrap();
        assert_eq!(roh[0], 0);
        assert_eq!(roh.len(), 1 + IV_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn kaputte_umschlaege() {
        assert!(Envelope::parsen("").is_err());
        assert!(Envelope::parsen("%%%").is_err());
        assert!(Envelope::parsen(&STANDARD.encode([2u8; 40])).is_err());
        assert!(Envelope::parsen(&STANDARD.encode([1u8; 20])).is_err());
        assert!(envelope_typ(&STANDARD.encode([0u8; 10])).is_err());
    }
}
