//! Registry – Subscriptions, Sende-Queues und Backlog
//!
//! Alle Zustandsaenderungen laufen durch einen `tokio::sync::Mutex`.
//! Dadurch werden Nachrichten eines Topics in Empfangsreihenfolge
//! weitergereicht, und die Backlog-Auslieferung beim `subscribe` liegt
//! vollstaendig vor jeder spaeter eintreffenden Nachricht.

use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::legacy::LegacyMessage;
use tandem_protocol::relay::RelayMethod;
use tandem_protocol::JsonRpcRequest;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::backlog::MessageStore;
use crate::error::{RelayError, RelayResult};

// ---------------------------------------------------------------------------
// ConnectionId
// ---------------------------------------------------------------------------

/// Undurchsichtige Kennung einer WebSocket-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Wie Nachrichten an einen Abonnenten ausgeliefert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustellformat {
    /// `subscription`-Anfrage mit `{id, data{topic, message}}`
    JsonRpc,
    /// `{topic, type: "pub", payload}`
    Legacy,
}

/// Eintrag des Relays fuer ein abonniertes Topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySubscription {
    pub id: String,
    pub topic: String,
    pub verbindung: ConnectionId,
    pub format: Zustellformat,
}

impl RelaySubscription {
    /// Serialisiert die Zustellung einer Nachricht im Format des Abonnenten
    fn zustellung(&self, message: &str) -> RelayResult<String> {
        let wert = match self.format {
            Zustellformat::JsonRpc => serde_json::to_value(JsonRpcRequest::neu(
                RelayMethod::Subscription.as_str(),
                json!({
                    "id": self.id,
                    "data": { "topic": self.topic, "message": message },
                }),
            )),
            Zustellformat::Legacy => {
                serde_json::to_value(LegacyMessage::zustellung(self.topic.as_str(), message))
            }
        };
        wert.map(|w| w.to_string())
            .map_err(|e| RelayError::intern(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die ausgehende Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientSender {
    /// Reiht einen Text-Frame ein; `false` wenn die Verbindung schon weg ist
    pub fn senden(&self, text: String) -> bool {
        if self.tx.send(text).is_err() {
            tracing::debug!(verbindung = %self.verbindung, "Send-Queue geschlossen (Client getrennt)");
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ergebnis eines `publish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Veroeffentlichung {
    /// An wie viele Abonnenten zugestellt wurde
    pub zugestellt: usize,
    /// Nachricht liegt im Backlog
    pub zurueckgehalten: bool,
}

/// Zentrale Subscription-Verwaltung des Relays
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    zustand: Mutex<Zustand>,
    backlog: Arc<dyn MessageStore>,
}

#[derive(Default)]
struct Zustand {
    topics: HashMap<String, Vec<RelaySubscription>>,
    verbindungen: HashMap<ConnectionId, ClientSender>,
}

impl Zustand {
    fn sender(&self, verbindung: &ConnectionId) -> Option<&ClientSender> {
        self.verbindungen.get(verbindung)
    }
}

impl Registry {
    pub fn neu(backlog: Arc<dyn MessageStore>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                zustand: Mutex::new(Zustand::default()),
                backlog,
            }),
        }
    }

    pub fn backlog(&self) -> &Arc<dyn MessageStore> {
        &self.inner.backlog
    }

    /// Meldet eine Verbindung an und liefert ihre ausgehende Queue
    pub async fn verbindung_registrieren(
        &self,
        verbindung: ConnectionId,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut zustand = self.inner.zustand.lock().await;
        zustand
            .verbindungen
            .insert(verbindung, ClientSender { verbindung, tx });
        tracing::debug!(verbindung = %verbindung, gesamt = zustand.verbindungen.len(), "Verbindung registriert");
        rx
    }

    /// Entfernt eine Verbindung samt aller ihrer Subscriptions
    ///
    /// Gibt die Anzahl entfernter Subscriptions zurueck.
    pub async fn verbindung_entfernen(&self, verbindung: ConnectionId) -> usize {
        let mut zustand = self.inner.zustand.lock().await;
        zustand.verbindungen.remove(&verbindung);

        let mut entfernt = 0;
        zustand.topics.retain(|_, subs| {
            let vorher = subs.len();
            subs.retain(|s| s.verbindung != verbindung);
            entfernt += vorher - subs.len();
            !subs.is_empty()
        });
        tracing::debug!(verbindung = %verbindung, subscriptions = entfernt, "Verbindung entfernt");
        entfernt
    }

    /// Reiht einen Text-Frame fuer eine Verbindung ein
    pub async fn senden(&self, verbindung: ConnectionId, text: String) -> bool {
        let zustand = self.inner.zustand.lock().await;
        match zustand.sender(&verbindung) {
            Some(sender) => sender.senden(text),
            None => false,
        }
    }

    /// Registriert eine Subscription und spielt das Backlog des Topics ab
    ///
    /// `antwort` erzeugt aus der Subscription-Id optional eine Antwort an den
    /// Abonnenten. Sie wird vor dem Backlog eingereiht; alles geschieht unter
    /// dem Registry-Lock.
    pub async fn abonnieren<F>(
        &self,
        verbindung: ConnectionId,
        topic: &str,
        format: Zustellformat,
        antwort: F,
    ) -> RelayResult<String>
    where
        F: FnOnce(&str) -> Option<String> + Send,
    {
        let mut zustand = self.inner.zustand.lock().await;
        let sender = zustand
            .sender(&verbindung)
            .cloned()
            .ok_or_else(|| RelayError::intern(format!("Verbindung {verbindung} unbekannt")))?;

        let subs = zustand.topics.entry(topic.to_string()).or_default();
        let subscription = match subs
            .iter()
            .find(|s| s.verbindung == verbindung && s.format == format)
        {
            Some(vorhanden) => vorhanden.clone(),
            None => {
                let neu = RelaySubscription {
                    id: Uuid::new_v4().simple().to_string(),
                    topic: topic.to_string(),
                    verbindung,
                    format,
                };
                subs.push(neu.clone());
                neu
            }
        };

        if let Some(text) = antwort(&subscription.id) {
            sender.senden(text);
        }

        let nachgeholt = self.inner.backlog.entnehmen(topic).await?;
        for message in &nachgeholt {
            sender.senden(subscription.zustellung(message)?);
        }

        tracing::debug!(
            verbindung = %verbindung,
            topic = %topic,
            id = %subscription.id,
            backlog = nachgeholt.len(),
            "Subscription angelegt"
        );
        Ok(subscription.id)
    }

    /// Entfernt die Subscription einer Verbindung
    ///
    /// Ohne `id` fallen alle Subscriptions der Verbindung auf dem Topic weg.
    pub async fn abbestellen(&self, verbindung: ConnectionId, topic: &str, id: Option<&str>) -> bool {
        let mut zustand = self.inner.zustand.lock().await;
        let Some(subs) = zustand.topics.get_mut(topic) else {
            return false;
        };
        let vorher = subs.len();
        subs.retain(|s| !(s.verbindung == verbindung && id.map_or(true, |id| s.id == id)));
        let entfernt = subs.len() < vorher;
        if subs.is_empty() {
            zustand.topics.remove(topic);
        }
        if entfernt {
            tracing::debug!(verbindung = %verbindung, topic = %topic, "Subscription entfernt");
        }
        entfernt
    }

    /// Leitet eine Nachricht an alle Abonnenten ausser dem Absender weiter
    ///
    /// Erreicht die Nachricht niemanden, landet sie im Backlog.
    pub async fn veroeffentlichen(
        &self,
        von: ConnectionId,
        topic: &str,
        message: &str,
        ttl: Duration,
    ) -> RelayResult<Veroeffentlichung> {
        let zustand = self.inner.zustand.lock().await;
        let mut zugestellt = 0;

        if let Some(subs) = zustand.topics.get(topic) {
            for sub in subs.iter().filter(|s| s.verbindung != von) {
                let Some(sender) = zustand.sender(&sub.verbindung) else {
                    continue;
                };
                if sender.senden(sub.zustellung(message)?) {
                    zugestellt += 1;
                }
            }
        }

        let zurueckgehalten = zugestellt == 0;
        if zurueckgehalten {
            self.inner
                .backlog
                .anhaengen(topic, message.to_string(), ttl)
                .await?;
        }
        tracing::trace!(topic = %topic, zugestellt, zurueckgehalten, "Nachricht veroeffentlicht");
        Ok(Veroeffentlichung {
            zugestellt,
            zurueckgehalten,
        })
    }

    /// Anzahl der Subscriptions auf einem Topic
    pub async fn abonnenten(&self, topic: &str) -> usize {
        let zustand = self.inner.zustand.lock().await;
        zustand.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    /// Anzahl verbundener Clients
    pub async fn verbindungen(&self) -> usize {
        self.inner.zustand.lock().await.verbindungen.len()
    }
}
