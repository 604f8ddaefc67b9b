//! Schluesselbund
//!
//! Ordnet jedem Tag genau ein Geheimnis zu:
//! - symmetrische Schluessel unter ihrem Topic
//! - private X25519-Schluessel unter ihrem oeffentlichen Schluessel (Hex)
//!
//! Der Bund selbst ist rein im Speicher. Persistenz uebernimmt der Aufrufer
//! ueber `snapshot` und `wiederherstellen`.

use dashmap::DashMap;
use std::collections::BTreeMap;

use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretKey;

/// Tag -> Geheimnis
#[derive(Debug, Default)]
pub struct Keychain {
    eintraege: DashMap<String, SecretKey>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Legt ein Geheimnis ab und ersetzt ein vorhandenes mit gleichem Tag
    pub fn setzen(&self, tag: impl Into<String>, key: SecretKey) {
        self.eintraege.insert(tag.into(), key);
    }

    /// Liefert das Geheimnis zu einem Tag
    pub fn holen(&self, tag: &str) -> CryptoResult<SecretKey> {
        self.eintraege
            .get(tag)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CryptoError::KeinSchluessel(tag.to_string()))
    }

    pub fn hat(&self, tag: &str) -> bool {
        self.eintraege.contains_key(tag)
    }

    /// Entfernt ein Geheimnis; gibt true zurueck wenn es vorhanden war
    pub fn entfernen(&self, tag: &str) -> bool {
        self.eintraege.remove(tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    /// Hex-Abbild aller Eintraege (sortiert) fuer die Persistenz
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.eintraege
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_hex()))
            .collect()
    }

    /// Ersetzt den Inhalt durch ein zuvor gespeichertes Abbild
    ///
    /// Ungueltige Eintraege werden uebersprungen und protokolliert.
    pub fn wiederherstellen(&self, abbild: BTreeMap<String, String>) {
        self.eintraege.clear();
        for (tag, hex_key) in abbild {
            match SecretKey::aus_hex(&hex_key) {
                Ok(key) => {
                    self.eintraege.insert(tag, key);
                }
                Err(e) => {
                    tracing::warn!(tag = %tag, fehler = %e, "Ungueltiger Schluessel im Abbild verworfen");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::generate_sym_key;

    #[test]
    fn setzen_holen_entfernen() {
        let kc = Keychain::new();
        let key = generate_sym_key();
        kc.setzen("topic-a", key.clone());

        assert!(kc.hat("topic-a"));
        assert_eq!(kc.holen("topic-a").unwrap(), key);
        assert!(kc.entfernen("topic-a"));
        assert!(!kc.entfernen("topic-a"));
        assert!(matches!(kc.holen("topic-a"), Err(CryptoError::KeinSchluessel(_))));
    }

    #[test]
    fn snapshot_und_wiederherstellen() {
        let kc = Keychain::new();
        kc.setzen("a", generate_sym_key());
        kc.setzen("b", generate_sym_key());

        let mut abbild = kc.snapshot();
        abbild.insert("kaputt".into(), "nicht-hex".into());

        let neu = Keychain::new();
        neu.setzen("alt", generate_sym_key());
        neu.wiederherstellen(abbild);

        assert_eq!(neu.len(), 2);
        assert!(!neu.hat("alt"));
        assert!(!neu.hat("kaputt"));
        assert_eq!(neu.holen("a").unwrap(), kc.holen("a").unwrap());
    }
}
