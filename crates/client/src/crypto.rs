//! Crypto – Schluesselverwaltung und Umschlag-Kodierung des Clients
//!
//! Verbindet den Schluesselbund aus `tandem-crypto` mit dem Key-Value-
//! Speicher. Jede Aenderung am Bund wird sofort persistiert. Alle
//! Operationen vor `init()` schlagen mit `NichtInitialisiert` fehl.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_core::{TandemError, TandemResult, Topic};
use tandem_crypto::envelope::{self, Envelope, EnvelopeTyp};
use tandem_crypto::{
    derive_sym_key, generate_key_pair, generate_sym_key, hash_key, public_key_aus_hex, Keychain,
    SecretKey,
};

use crate::storage::KeyValueStorage;

/// Optionen fuer `encode`
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Typ 1: eigener oeffentlicher Schluessel (muss im Bund liegen)
    pub sender_public_key: Option<String>,
    /// Typ 1: oeffentlicher Schluessel des Empfaengers
    pub receiver_public_key: Option<String>,
}

impl EncodeOptions {
    /// Bootstrap-Umschlag (Typ 1)
    pub fn bootstrap(sender: impl Into<String>, empfaenger: impl Into<String>) -> Self {
        Self {
            sender_public_key: Some(sender.into()),
            receiver_public_key: Some(empfaenger.into()),
        }
    }

    fn typ(&self) -> EnvelopeTyp {
        if self.sender_public_key.is_some() {
            EnvelopeTyp::Bootstrap
        } else {
            EnvelopeTyp::Symmetrisch
        }
    }
}

/// Optionen fuer `decode`
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Typ 1: eigener oeffentlicher Schluessel, dessen privater Teil im Bund liegt
    pub receiver_public_key: Option<String>,
}

/// Krypto-Fassade eines Clients
#[derive(Clone)]
pub struct Crypto {
    inner: Arc<CryptoInner>,
}

struct CryptoInner {
    keychain: Keychain,
    speicher: Arc<dyn KeyValueStorage>,
    schluessel: String,
    initialisiert: AtomicBool,
}

impl Crypto {
    /// Neue Fassade; `schluessel` ist der Speicherschluessel des Bundes
    pub fn neu(speicher: Arc<dyn KeyValueStorage>, schluessel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CryptoInner {
                keychain: Keychain::new(),
                speicher,
                schluessel: schluessel.into(),
                initialisiert: AtomicBool::new(false),
            }),
        }
    }

    /// Laedt den Schluesselbund aus dem Speicher
    pub async fn init(&self) -> TandemResult<()> {
        if self.inner.initialisiert.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(wert) = self.inner.speicher.get_item(&self.inner.schluessel).await? {
            let abbild: BTreeMap<String, String> = serde_json::from_value(wert)?;
            self.inner.keychain.wiederherstellen(abbild);
        }
        self.inner.initialisiert.store(true, Ordering::Release);
        tracing::debug!(eintraege = self.inner.keychain.len(), "Schluesselbund geladen");
        Ok(())
    }

    fn pruefe_init(&self) -> TandemResult<()> {
        if self.inner.initialisiert.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TandemError::NichtInitialisiert("Crypto".into()))
        }
    }

    async fn persistieren(&self) -> TandemResult<()> {
        let abbild = serde_json::to_value(self.inner.keychain.snapshot())?;
        self.inner
            .speicher
            .set_item(&self.inner.schluessel, abbild)
            .await
    }

    // -----------------------------------------------------------------------
    // Schluessel
    // -----------------------------------------------------------------------

    /// Erzeugt ein Schluesselpaar und gibt den oeffentlichen Schluessel (Hex) zurueck
    pub async fn generate_key_pair(&self) -> TandemResult<String> {
        self.pruefe_init()?;
        let paar = generate_key_pair();
        let public_hex = paar.public_hex();
        self.inner
            .keychain
            .setzen(public_hex.clone(), paar.private_key.clone());
        self.persistieren().await?;
        Ok(public_hex)
    }

    /// ECDH mit dem fremden Schluessel, installiert den Ergebnis-Schluessel
    /// und gibt dessen Topic zurueck
    pub async fn generate_shared_key(
        &self,
        self_public_key: &str,
        peer_public_key: &str,
        override_topic: Option<Topic>,
    ) -> TandemResult<Topic> {
        self.pruefe_init()?;
        let privat = self.inner.keychain.holen(self_public_key)?;
        let peer = public_key_aus_hex(peer_public_key)?;
        let sym = derive_sym_key(&privat, &peer)?;
        self.sym_key_installieren(sym, override_topic).await
    }

    /// Erzeugt einen zufaelligen symmetrischen Schluessel und installiert ihn
    ///
    /// Gibt Topic und Schluessel (Hex, fuer die Pairing-URI) zurueck.
    pub async fn generate_sym_key(&self) -> TandemResult<(Topic, String)> {
        self.pruefe_init()?;
        let sym = generate_sym_key();
        let hex_key = sym.to_hex();
        let topic = self.sym_key_installieren(sym, None).await?;
        Ok((topic, hex_key))
    }

    /// Installiert einen symmetrischen Schluessel (Hex)
    ///
    /// Ohne `override_topic` ist das Topic `sha256(key)`.
    pub async fn set_sym_key(
        &self,
        sym_key_hex: &str,
        override_topic: Option<Topic>,
    ) -> TandemResult<Topic> {
        self.pruefe_init()?;
        let sym = SecretKey::aus_hex(sym_key_hex)?;
        self.sym_key_installieren(sym, override_topic).await
    }

    async fn sym_key_installieren(
        &self,
        sym: SecretKey,
        override_topic: Option<Topic>,
    ) -> TandemResult<Topic> {
        let topic = override_topic.unwrap_or_else(|| hash_key(&sym));
        self.inner.keychain.setzen(topic.as_str(), sym);
        self.persistieren().await?;
        Ok(topic)
    }

    /// Gibt true zurueck wenn zu `tag` (Topic oder oeffentlicher Schluessel) ein Geheimnis existiert
    pub fn has_keys(&self, tag: &str) -> TandemResult<bool> {
        self.pruefe_init()?;
        Ok(self.inner.keychain.hat(tag))
    }

    pub async fn delete_sym_key(&self, topic: &Topic) -> TandemResult<()> {
        self.pruefe_init()?;
        if self.inner.keychain.entfernen(topic.as_str()) {
            self.persistieren().await?;
        }
        Ok(())
    }

    pub async fn delete_key_pair(&self, public_key: &str) -> TandemResult<()> {
        self.pruefe_init()?;
        if self.inner.keychain.entfernen(public_key) {
            self.persistieren().await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Umschlaege
    // -----------------------------------------------------------------------

    /// Verschluesselt eine JSON-Nutzlast fuer ein Topic
    pub fn encode(&self, topic: &Topic, payload: &Value, opts: &EncodeOptions) -> TandemResult<String> {
        self.pruefe_init()?;
        let klartext = serde_json::to_vec(payload)?;

        match opts.typ() {
            EnvelopeTyp::Symmetrisch => {
                let key = self.inner.keychain.holen(topic.as_str())?;
                Ok(envelope::encrypt(&key, &klartext, EnvelopeTyp::Symmetrisch, None)?)
            }
            EnvelopeTyp::Bootstrap => {
                let sender = opts.sender_public_key.as_deref().unwrap_or_default();
                let empfaenger = opts.receiver_public_key.as_deref().ok_or_else(|| {
                    TandemError::validierung("Typ 1 benoetigt receiver_public_key")
                })?;
                let privat = self.inner.keychain.holen(sender)?;
                let key = derive_sym_key(&privat, &public_key_aus_hex(empfaenger)?)?;
                Ok(envelope::encrypt(
                    &key,
                    &klartext,
                    EnvelopeTyp::Bootstrap,
                    Some(public_key_aus_hex(sender)?),
                )?)
            }
        }
    }

    /// Entschluesselt einen Umschlag
    ///
    /// Fehler werden protokolliert; das Ergebnis ist dann `None`.
    pub fn decode(&self, topic: &Topic, encoded: &str, opts: &DecodeOptions) -> Option<Value> {
        match self.decode_intern(topic, encoded, opts) {
            Ok(wert) => Some(wert),
            Err(e) => {
                tracing::warn!(topic = %topic, fehler = %e, "Nachricht nicht entschluesselbar");
                None
            }
        }
    }

    fn decode_intern(&self, topic: &Topic, encoded: &str, opts: &DecodeOptions) -> TandemResult<Value> {
        self.pruefe_init()?;
        let env = Envelope::parsen(encoded)?;
        let key = match (env.typ, env.sender_public_key) {
            (EnvelopeTyp::Bootstrap, Some(sender)) => {
                let empfaenger = opts.receiver_public_key.as_deref().ok_or_else(|| {
                    TandemError::validierung("Typ 1 benoetigt receiver_public_key")
                })?;
                let privat = self.inner.keychain.holen(empfaenger)?;
                derive_sym_key(&privat, &sender)?
            }
            _ => self.inner.keychain.holen(topic.as_str())?,
        };
        let klartext = envelope::decrypt(&key, &env)?;
        Ok(serde_json::from_slice(&klartext)?)
    }

    /// Typ-Byte eines Umschlags
    pub fn get_payload_type(&self, encoded: &str) -> TandemResult<EnvelopeTyp> {
        Ok(envelope::envelope_typ(encoded)?)
    }

    /// Oeffentlicher Absenderschluessel eines Typ-1-Umschlags (Hex)
    pub fn get_payload_sender_public_key(&self, encoded: &str) -> TandemResult<Option<String>> {
        Ok(Envelope::parsen(encoded)?.sender_public_key.map(hex::encode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    async fn crypto_mit(speicher: Arc<dyn KeyValueStorage>) -> Crypto {
        let c = Crypto::neu(speicher, "test:keychain");
        c.init().await.unwrap();
        c
    }

    #[tokio::test]
    async fn vor_init_nicht_nutzbar() {
        let c = Crypto::neu(Arc::new(MemoryStorage::new()), "k");
        assert!(matches!(
            c.generate_key_pair().await,
            Err(TandemError::NichtInitialisiert(_))
        ));
    }

    #[tokio::test]
    async fn geteilter_schluessel_ergibt_gleiches_topic() {
        let a = crypto_mit(Arc::new(MemoryStorage::new())).await;
        let b = crypto_mit(Arc::new(MemoryStorage::new())).await;

        let pub_a = a.generate_key_pair().await.unwrap();
        let pub_b = b.generate_key_pair().await.unwrap();

        let t_a = a.generate_shared_key(&pub_a, &pub_b, None).await.unwrap();
        let t_b = b.generate_shared_key(&pub_b, &pub_a, None).await.unwrap();
        assert_eq!(t_a, t_b);

        let kodiert = a.encode(&t_a, &json!({"hallo": "welt"}), &EncodeOptions::default()).unwrap();
        assert_eq!(
            b.decode(&t_b, &kodiert, &DecodeOptions::default()),
            Some(json!({"hallo": "welt"}))
        );
    }

    #[tokio::test]
    async fn sym_key_mit_override_topic() {
        let c = crypto_mit(Arc::new(MemoryStorage::new())).await;
        let eigenes = Topic::aus_bytes(&[3; 32]);
        let t = c.set_sym_key(&"11".repeat(32), Some(eigenes.clone())).await.unwrap();
        assert_eq!(t, eigenes);
        assert!(c.has_keys(eigenes.as_str()).unwrap());

        c.delete_sym_key(&eigenes).await.unwrap();
        assert!(!c.has_keys(eigenes.as_str()).unwrap());
    }

    #[tokio::test]
    async fn bootstrap_umschlag() {
        let a = crypto_mit(Arc::new(MemoryStorage::new())).await;
        let b = crypto_mit(Arc::new(MemoryStorage::new())).await;
        let pub_a = a.generate_key_pair().await.unwrap();
        let pub_b = b.generate_key_pair().await.unwrap();
        let topic = Topic::aus_bytes(&[9; 32]);

        let kodiert = a
            .encode(&topic, &json!([1, 2]), &EncodeOptions::bootstrap(&pub_a, &pub_b))
            .unwrap();

        assert_eq!(a.get_payload_type(&kodiert).unwrap(), EnvelopeTyp::Bootstrap);
        assert_eq!(a.get_payload_sender_public_key(&kodiert).unwrap(), Some(pub_a));

        let opts = DecodeOptions {
            receiver_public_key: Some(pub_b),
        };
        assert_eq!(b.decode(&topic, &kodiert, &opts), Some(json!([1, 2])));
        // Ohne Empfaengerschluessel nicht lesbar
        assert_eq!(b.decode(&topic, &kodiert, &DecodeOptions::default()), None);
    }

    #[tokio::test]
    async fn decode_ohne_schluessel_ist_none() {
        let c = crypto_mit(Arc::new(MemoryStorage::new())).await;
        let (topic, _) = c.generate_sym_key().await.unwrap();
        let kodiert = c.encode(&topic, &json!(1), &EncodeOptions::default()).unwrap();
        c.delete_sym_key(&topic).await.unwrap();
        assert_eq!(c.decode(&topic, &kodiert, &DecodeOptions::default()), None);
        assert_eq!(c.decode(&topic, "kein-umschlag", &DecodeOptions::default()), None);
    }

    #[tokio::test]
    async fn schluesselbund_wird_persistiert() {
        let speicher: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let erste = crypto_mit(Arc::clone(&speicher)).await;
        let (topic, _) = erste.generate_sym_key().await.unwrap();
        let public = erste.generate_key_pair().await.unwrap();

        let zweite = crypto_mit(speicher).await;
        assert!(zweite.has_keys(topic.as_str()).unwrap());
        assert!(zweite.has_keys(&public).unwrap());

        zweite.delete_key_pair(&public).await.unwrap();
        assert!(!zweite.has_keys(&public).unwrap());
    }
}
