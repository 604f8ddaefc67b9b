//! Pairing – kurzlebiger Bootstrap-Kanal zwischen zwei Clients
//!
//! ## Lebenszyklus
//! ```text
//! create()/pair() --> erstellt (5 min, inaktiv) --activate()--> aktiv (30 Tage)
//!        |                     |                                   |
//!        +---------------------+---- Ablauf / disconnect() --------+--> geloescht
//! ```
//!
//! Der symmetrische Schluessel liegt im Schluesselbund unter dem
//! Pairing-Topic. Geloescht wird in fester Reihenfolge: Subscription
//! beenden, Schluessel entfernen, Datensatz entfernen.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tandem_core::{zeit, ExpiryTarget, TandemError, TandemResult, Topic};
use tandem_protocol::params::DeleteParams;
use tandem_protocol::{
    ErrorCode, JsonRpcError, JsonRpcRequest, Metadata, PairingUri, RelayOptions, WireMethod,
};
use tokio::sync::broadcast;

use crate::crypto::Crypto;
use crate::events::ClientEvent;
use crate::expirer::Expirer;
use crate::messenger::Messenger;
use crate::relayer::Relayer;
use crate::storage::KeyValueStorage;
use crate::store::{Ablaufend, Store};
use crate::subscriber::SubscribeOptions;

/// Persistierter Pairing-Datensatz
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRecord {
    pub topic: Topic,
    pub relay: RelayOptions,
    pub expiry: i64,
    pub active: bool,
    #[serde(default)]
    pub peer_metadata: Option<Metadata>,
}

impl Ablaufend for PairingRecord {
    fn ablauf(&self) -> Option<i64> {
        Some(self.expiry)
    }
}

/// Ergebnis von `create()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeuesPairing {
    pub topic: Topic,
    pub uri: PairingUri,
}

/// Pairing-Verwaltung
#[derive(Clone)]
pub struct Pairing {
    inner: Arc<PairingInner>,
}

struct PairingInner {
    eintraege: Store<PairingRecord>,
    crypto: Crypto,
    relayer: Relayer,
    messenger: Messenger,
    expirer: Expirer,
    events: broadcast::Sender<ClientEvent>,
    relay: RelayOptions,
    registriert: RwLock<HashSet<String>>,
}

impl Pairing {
    #[allow(clippy::too_many_arguments)]
    pub fn neu(
        speicher: Arc<dyn KeyValueStorage>,
        schluessel: impl Into<String>,
        crypto: Crypto,
        relayer: Relayer,
        messenger: Messenger,
        expirer: Expirer,
        events: broadcast::Sender<ClientEvent>,
        relay: RelayOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PairingInner {
                eintraege: Store::mit_nachlass(speicher, "Pairing", schluessel),
                crypto,
                relayer,
                messenger,
                expirer,
                events,
                relay,
                registriert: RwLock::new(HashSet::new()),
            }),
        }
    }

    /// Laedt persistierte Pairings; abgelaufene werden samt Schluessel verworfen
    pub async fn init(&self) -> TandemResult<()> {
        for key in self.inner.eintraege.init().await? {
            self.inner.eintraege.delete(&key).await?;
            let Ok(topic) = Topic::neu(&key) else { continue };
            self.inner.crypto.delete_sym_key(&topic).await?;
            self.inner.expirer.del(&ExpiryTarget::Topic(topic)).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Anlegen
    // -----------------------------------------------------------------------

    /// Legt ein neues Pairing an und liefert die URI fuer die Gegenstelle
    pub async fn create(&self) -> TandemResult<NeuesPairing> {
        let (topic, sym_key) = self.inner.crypto.generate_sym_key().await?;
        let record = PairingRecord {
            topic: topic.clone(),
            relay: self.inner.relay.clone(),
            expiry: zeit::ab_jetzt(zeit::FUENF_MINUTEN),
            active: false,
            peer_metadata: None,
        };
        self.anlegen(record).await?;
        let uri = PairingUri::neu(topic.clone(), sym_key, self.inner.relay.clone());
        tracing::info!(topic = %topic, "Pairing erstellt");
        Ok(NeuesPairing { topic, uri })
    }

    /// Uebernimmt ein Pairing aus der URI der Gegenstelle
    ///
    /// Schlaegt mit `BereitsVorhanden` fehl, wenn Datensatz oder Schluessel
    /// fuer das Topic schon existieren.
    pub async fn pair(&self, uri: &str, aktivieren: bool) -> TandemResult<PairingRecord> {
        let uri = PairingUri::parsen(uri)?;
        let topic = uri.topic.clone();

        if self.inner.eintraege.has(topic.as_str()).await?
            || self.inner.crypto.has_keys(topic.as_str())?
        {
            return Err(TandemError::BereitsVorhanden(format!("Pairing {topic}")));
        }

        self.inner
            .crypto
            .set_sym_key(&uri.sym_key, Some(topic.clone()))
            .await?;
        let record = PairingRecord {
            topic: topic.clone(),
            relay: uri.relay,
            expiry: zeit::ab_jetzt(zeit::FUENF_MINUTEN),
            active: false,
            peer_metadata: None,
        };
        self.anlegen(record.clone()).await?;
        tracing::info!(topic = %topic, "Pairing uebernommen");

        if aktivieren {
            return self.activate(&topic).await;
        }
        Ok(record)
    }

    /// Abonniert, speichert und startet den Ablauf-Timer
    ///
    /// Scheitert ein Schritt, wird alles zum Topic wieder entfernt,
    /// auch der bereits installierte Schluessel.
    async fn anlegen(&self, record: PairingRecord) -> TandemResult<()> {
        let topic = record.topic.clone();
        if let Err(e) = self.einrichten(record).await {
            tracing::warn!(topic = %topic, fehler = %e, "Pairing nicht angelegt");
            self.zuruecknehmen(&topic).await;
            return Err(e);
        }
        let _ = self.inner.events.send(ClientEvent::PairingErstellt { topic });
        Ok(())
    }

    async fn einrichten(&self, record: PairingRecord) -> TandemResult<()> {
        let topic = record.topic.clone();
        let expiry = record.expiry;
        self.inner
            .relayer
            .subscribe(
                &topic,
                SubscribeOptions {
                    relay: record.relay.clone(),
                    expiry: None,
                },
            )
            .await?;
        self.inner.eintraege.set(topic.as_str(), record).await?;
        self.inner
            .expirer
            .set(ExpiryTarget::Topic(topic), expiry)
            .await
    }

    async fn zuruecknehmen(&self, topic: &Topic) {
        let subscriber = self.inner.relayer.subscriber();
        if subscriber.is_subscribed(topic) {
            if let Err(e) = self.inner.relayer.unsubscribe(topic).await {
                tracing::warn!(topic = %topic, fehler = %e, "Unsubscribe beim Zuruecknehmen fehlgeschlagen");
            }
        } else {
            subscriber.ausstehend_verwerfen(topic);
        }
        let schritte = [
            self.inner.crypto.delete_sym_key(topic).await,
            self.inner.eintraege.delete(topic.as_str()).await.map(|_| ()),
            self.inner.expirer.del(&ExpiryTarget::Topic(topic.clone())).await,
        ];
        for fehler in schritte.into_iter().filter_map(Result::err) {
            tracing::warn!(topic = %topic, fehler = %fehler, "Aufraeumen unvollstaendig");
        }
    }

    // -----------------------------------------------------------------------
    // Aendern
    // -----------------------------------------------------------------------

    /// Aktiviert ein Pairing und verlaengert es auf 30 Tage
    pub async fn activate(&self, topic: &Topic) -> TandemResult<PairingRecord> {
        let expiry = zeit::ab_jetzt(zeit::DREISSIG_TAGE);
        let record = self
            .inner
            .eintraege
            .update(topic.as_str(), |r| {
                r.active = true;
                r.expiry = expiry;
            })
            .await?;
        self.inner
            .expirer
            .set(ExpiryTarget::Topic(topic.clone()), expiry)
            .await?;
        let _ = self
            .inner
            .events
            .send(ClientEvent::PairingAktiviert { topic: topic.clone() });
        Ok(record)
    }

    pub async fn update_expiry(&self, topic: &Topic, expiry: i64) -> TandemResult<()> {
        self.inner
            .eintraege
            .update(topic.as_str(), |r| r.expiry = expiry)
            .await?;
        self.inner
            .expirer
            .set(ExpiryTarget::Topic(topic.clone()), expiry)
            .await
    }

    pub async fn update_metadata(&self, topic: &Topic, metadata: Metadata) -> TandemResult<()> {
        self.inner
            .eintraege
            .update(topic.as_str(), |r| r.peer_metadata = Some(metadata))
            .await
            .map(|_| ())
    }

    /// Anwendungseigene Methoden, die auf Pairing-Topics angenommen werden
    pub fn register_methods<I, S>(&self, namen: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .registriert
            .write()
            .extend(namen.into_iter().map(Into::into));
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub async fn get(&self, topic: &Topic) -> TandemResult<PairingRecord> {
        self.inner.eintraege.get(topic.as_str()).await
    }

    pub async fn has(&self, topic: &Topic) -> TandemResult<bool> {
        self.inner.eintraege.has(topic.as_str()).await
    }

    /// Gibt true zurueck wenn ein Datensatz existiert, auch wenn er abgelaufen ist
    pub fn kennt(&self, topic: &Topic) -> bool {
        self.inner.eintraege.kennt(topic.as_str())
    }

    pub async fn list(&self) -> TandemResult<Vec<PairingRecord>> {
        Ok(self
            .inner
            .eintraege
            .values()
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Peer-Operationen
    // -----------------------------------------------------------------------

    /// Prueft die Erreichbarkeit der Gegenstelle
    pub async fn ping(&self, topic: &Topic) -> TandemResult<()> {
        self.get(topic).await?;
        self.inner
            .messenger
            .anfrage(topic, WireMethod::PairingPing, json!({}))
            .await
            .map(|_| ())
    }

    /// Trennt das Pairing
    ///
    /// Wartet auf die Bestaetigung der Gegenstelle. Lokal wird auch dann
    /// geloescht, wenn sie ausbleibt; Zeitlimit oder Fehlerantwort gehen
    /// danach an den Aufrufer.
    pub async fn disconnect(&self, topic: &Topic) -> TandemResult<()> {
        self.get(topic).await?;
        let antwort = self
            .inner
            .messenger
            .anfrage(topic, WireMethod::PairingDelete, DeleteParams::benutzer_getrennt())
            .await;
        if let Err(e) = &antwort {
            tracing::warn!(topic = %topic, fehler = %e, "Gegenstelle hat Trennung nicht bestaetigt");
        }
        self.loeschen(topic).await?;
        let _ = self
            .inner
            .events
            .send(ClientEvent::PairingGeloescht { topic: topic.clone() });
        antwort.map(|_| ())
    }

    /// Entfernt ein Pairing lokal
    ///
    /// Toleriert fehlende Teile, damit auch halb abgebaute Pairings
    /// vollstaendig verschwinden.
    pub async fn loeschen(&self, topic: &Topic) -> TandemResult<()> {
        if let Err(e) = self.inner.relayer.unsubscribe(topic).await {
            tracing::warn!(topic = %topic, fehler = %e, "Unsubscribe beim Loeschen fehlgeschlagen");
        }
        self.inner.crypto.delete_sym_key(topic).await?;
        self.inner.eintraege.delete(topic.as_str()).await?;
        self.inner
            .expirer
            .del(&ExpiryTarget::Topic(topic.clone()))
            .await?;
        self.inner.messenger.topic_vergessen(topic).await?;
        tracing::info!(topic = %topic, "Pairing geloescht");
        Ok(())
    }

    /// Reagiert auf einen abgelaufenen Timer
    pub async fn abgelaufen(&self, topic: &Topic) -> TandemResult<()> {
        self.loeschen(topic).await?;
        let _ = self
            .inner
            .events
            .send(ClientEvent::PairingAbgelaufen { topic: topic.clone() });
        Ok(())
    }

    /// Verarbeitet eine eingehende Anfrage auf einem Pairing-Topic
    pub async fn anfrage_verarbeiten(&self, topic: &Topic, anfrage: JsonRpcRequest) -> TandemResult<()> {
        let messenger = &self.inner.messenger;
        match WireMethod::parsen(&anfrage.method) {
            WireMethod::PairingPing => {
                messenger.antworten(topic, anfrage.id, true).await?;
                let _ = self
                    .inner
                    .events
                    .send(ClientEvent::PairingPing { topic: topic.clone() });
            }
            WireMethod::PairingDelete => {
                messenger.antworten(topic, anfrage.id, true).await?;
                self.loeschen(topic).await?;
                let _ = self
                    .inner
                    .events
                    .send(ClientEvent::PairingGeloescht { topic: topic.clone() });
            }
            WireMethod::Unknown(name) if self.inner.registriert.read().contains(&name) => {
                let _ = self.inner.events.send(ClientEvent::PairingAnfrage {
                    topic: topic.clone(),
                    request: anfrage,
                });
            }
            andere => {
                tracing::debug!(topic = %topic, methode = %andere, "Methode auf Pairing-Topic unbekannt");
                messenger
                    .fehler_antworten(
                        topic,
                        anfrage.id,
                        JsonRpcError::neu(
                            ErrorCode::MethodNotFound,
                            format!("Unbekannte Methode: {andere}"),
                        ),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
