//! Relayer – Pub/Sub-Zugang eines Clients
//!
//! Bindet Transport, JSON-RPC-Provider und Subscriber zusammen. Ein
//! Hintergrund-Task uebersetzt Transport-Zustaende in Subscriber-Zustaende
//! und bestaetigt jede `subscription`-Zustellung des Relays. Jede
//! Zustellung wird genau einmal als `RelayerEvent::Nachricht` gemeldet.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_core::{TandemResult, Topic};
use tandem_crypto::hash_message;
use tandem_protocol::relay::{PublishParams, RelayMethod, SubscriptionParams, STANDARD_TTL_SEK};
use tandem_protocol::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::provider::{JsonRpcProvider, ProviderEvent};
use crate::storage::KeyValueStorage;
use crate::subscriber::{SubscribeOptions, Subscriber};
use crate::transport::RelayTransport;

const EVENT_KAPAZITAET: usize = 1024;

/// Wie viele Nachrichten-Hashes pro Topic fuer die Duplikaterkennung gehalten werden
const GESEHEN_LIMIT: usize = 256;

/// Zuletzt gemeldete Nachrichten eines Topics; die aeltesten fallen heraus
#[derive(Default)]
struct Gesehen {
    reihenfolge: VecDeque<String>,
    menge: HashSet<String>,
}

impl Gesehen {
    /// true, wenn der Hash neu ist
    fn merken(&mut self, hash: String) -> bool {
        if self.menge.contains(&hash) {
            return false;
        }
        if self.reihenfolge.len() >= GESEHEN_LIMIT {
            if let Some(alt) = self.reihenfolge.pop_front() {
                self.menge.remove(&alt);
            }
        }
        self.reihenfolge.push_back(hash.clone());
        self.menge.insert(hash);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.reihenfolge.len()
    }
}

/// Ereignisse des Relayers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayerEvent {
    Verbunden,
    Getrennt,
    /// Zugestellte Nachricht auf einem abonnierten Topic
    Nachricht { topic: Topic, message: String },
}

/// Optionen fuer `publish`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub ttl: u64,
    pub prompt: bool,
    pub tag: u32,
    /// Auf die Bestaetigung des Relays warten
    pub ack: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            ttl: STANDARD_TTL_SEK,
            prompt: false,
            tag: 0,
            ack: true,
        }
    }
}

/// Pub/Sub-Zugang zum Relay
#[derive(Clone)]
pub struct Relayer {
    inner: Arc<RelayerInner>,
}

struct RelayerInner {
    provider: JsonRpcProvider,
    subscriber: Subscriber,
    /// Zuletzt gemeldete Nachrichten pro Topic (Hash)
    gesehen: DashMap<Topic, Gesehen>,
    events: broadcast::Sender<RelayerEvent>,
    rpc_timeout: Duration,
    subscribe_intervall: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RelayerInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl Relayer {
    pub fn neu(
        transport: Arc<dyn RelayTransport>,
        speicher: Arc<dyn KeyValueStorage>,
        config: &ClientConfig,
    ) -> Self {
        let provider = JsonRpcProvider::neu(transport);
        let subscriber = Subscriber::neu(
            provider.clone(),
            speicher,
            config.speicher_schluessel("subscription"),
            config.rpc_timeout,
        );
        let (events, _) = broadcast::channel(EVENT_KAPAZITAET);
        let relayer = Self {
            inner: Arc::new(RelayerInner {
                provider,
                subscriber,
                gesehen: DashMap::new(),
                events,
                rpc_timeout: config.rpc_timeout,
                subscribe_intervall: config.subscribe_intervall,
                task: Mutex::new(None),
            }),
        };
        relayer.ereignisse_starten();
        relayer
    }

    /// Stellt Subscriptions wieder her und startet das Nachsenden
    pub async fn init(&self) -> TandemResult<()> {
        self.inner.subscriber.init().await?;
        self.inner.subscriber.starten(self.inner.subscribe_intervall);
        Ok(())
    }

    fn ereignisse_starten(&self) {
        let mut provider_rx = self.inner.provider.abonnieren();
        let schwach: Weak<RelayerInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let ereignis = match provider_rx.recv().await {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Relayer hinkt dem Provider hinterher");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = schwach.upgrade() else { break };
                Relayer { inner }.ereignis_verarbeiten(ereignis).await;
            }
        });
        *self.inner.task.lock() = Some(task);
    }

    async fn ereignis_verarbeiten(&self, ereignis: ProviderEvent) {
        match ereignis {
            ProviderEvent::Verbunden => {
                self.inner.subscriber.verbunden().await;
                let _ = self.inner.events.send(RelayerEvent::Verbunden);
            }
            ProviderEvent::Getrennt => {
                self.inner.subscriber.getrennt().await;
                let _ = self.inner.events.send(RelayerEvent::Getrennt);
            }
            ProviderEvent::Anfrage(anfrage) => self.anfrage_verarbeiten(anfrage).await,
        }
    }

    async fn anfrage_verarbeiten(&self, anfrage: JsonRpcRequest) {
        let antwort = match RelayMethod::parsen(&anfrage.method) {
            Some(RelayMethod::Subscription) => match anfrage.params_als::<SubscriptionParams>() {
                Ok(params) => {
                    self.zustellen(params);
                    JsonRpcResponse::ergebnis(anfrage.id, serde_json::Value::Bool(true))
                }
                Err(e) => JsonRpcResponse::fehler(
                    anfrage.id,
                    JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string()),
                ),
            },
            _ => {
                tracing::debug!(methode = %anfrage.method, "Unbekannte Relay-Anfrage");
                JsonRpcResponse::fehler(anfrage.id, JsonRpcError::aus_code(ErrorCode::MethodNotFound))
            }
        };
        if let Err(e) = self.inner.provider.respond(&antwort).await {
            tracing::warn!(fehler = %e, "Bestaetigung an das Relay fehlgeschlagen");
        }
    }

    /// Meldet eine Zustellung, sofern sie fuer dieses Topic neu ist
    fn zustellen(&self, params: SubscriptionParams) {
        let topic = params.data.topic;
        let message = params.data.message;
        let hash = hash_message(&message);
        let neu = self
            .inner
            .gesehen
            .entry(topic.clone())
            .or_default()
            .merken(hash);
        if !neu {
            tracing::debug!(topic = %topic, "Doppelte Zustellung verworfen");
            return;
        }
        let _ = self
            .inner
            .events
            .send(RelayerEvent::Nachricht { topic, message });
    }

    // -----------------------------------------------------------------------
    // Oeffentliche API
    // -----------------------------------------------------------------------

    pub fn abonnieren(&self) -> broadcast::Receiver<RelayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.inner.subscriber
    }

    pub fn provider(&self) -> &JsonRpcProvider {
        &self.inner.provider
    }

    pub fn is_connected(&self) -> bool {
        self.inner.provider.is_connected()
    }

    pub async fn connect(&self) -> TandemResult<()> {
        self.inner.provider.connect().await
    }

    pub async fn disconnect(&self) -> TandemResult<()> {
        self.inner.provider.disconnect().await
    }

    /// Veroeffentlicht eine Nachricht auf einem Topic
    pub async fn publish(&self, topic: &Topic, message: &str, opts: PublishOptions) -> TandemResult<()> {
        let params = PublishParams {
            topic: topic.clone(),
            message: message.to_string(),
            ttl: opts.ttl,
            prompt: opts.prompt,
            tag: opts.tag,
        };
        let params = serde_json::to_value(params)?;
        if opts.ack {
            self.inner
                .provider
                .request(RelayMethod::Publish.as_str(), params, self.inner.rpc_timeout)
                .await?;
        } else {
            self.inner
                .provider
                .notify(RelayMethod::Publish.as_str(), params)
                .await?;
        }
        tracing::trace!(topic = %topic, "Nachricht veroeffentlicht");
        Ok(())
    }

    pub async fn subscribe(&self, topic: &Topic, opts: SubscribeOptions) -> TandemResult<String> {
        self.inner.subscriber.subscribe(topic, opts).await
    }

    /// Beendet alle Subscriptions eines Topics und vergisst dessen Nachrichten
    pub async fn unsubscribe(&self, topic: &Topic) -> TandemResult<()> {
        self.inner.subscriber.unsubscribe(topic, None).await?;
        self.inner.gesehen.remove(topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::subscriber::SubscriberZustand;
    use crate::testutil::MockTransport;
    use serde_json::json;

    fn topic() -> Topic {
        Topic::aus_bytes(&[4; 32])
    }

    async fn aufbau() -> (Arc<MockTransport>, Relayer) {
        let transport = Arc::new(MockTransport::neu());
        let config = ClientConfig {
            rpc_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let relayer = Relayer::neu(transport.clone(), Arc::new(MemoryStorage::new()), &config);
        relayer.init().await.unwrap();
        let mut events = relayer.abonnieren();
        relayer.connect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), RelayerEvent::Verbunden);
        (transport, relayer)
    }

    fn zustellung(id: u64, message: &str) -> serde_json::Value {
        json!({
            "id": id,
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {"id": "sub-0", "data": {"topic": topic(), "message": message}}
        })
    }

    #[tokio::test]
    async fn zustellung_genau_einmal_gemeldet_und_bestaetigt() {
        let (transport, relayer) = aufbau().await;
        let mut events = relayer.abonnieren();

        transport.einspeisen(zustellung(1, "hallo"));
        transport.einspeisen(zustellung(2, "hallo"));
        transport.einspeisen(zustellung(3, "welt"));

        assert_eq!(
            events.recv().await.unwrap(),
            RelayerEvent::Nachricht { topic: topic(), message: "hallo".into() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RelayerEvent::Nachricht { topic: topic(), message: "welt".into() }
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let antworten = transport.antworten();
        assert_eq!(antworten.len(), 3);
        assert!(antworten.iter().all(|a| a.result == Some(json!(true))));
    }

    #[test]
    fn duplikaterkennung_ist_begrenzt() {
        let mut gesehen = Gesehen::default();
        assert!(gesehen.merken("erste".into()));
        assert!(!gesehen.merken("erste".into()));

        for n in 0..GESEHEN_LIMIT {
            assert!(gesehen.merken(format!("m-{n}")));
        }
        assert_eq!(gesehen.len(), GESEHEN_LIMIT);
        assert_eq!(gesehen.menge.len(), GESEHEN_LIMIT);

        // Die aelteste ist verdraengt, die juengste noch bekannt
        assert!(gesehen.merken("erste".into()));
        assert!(!gesehen.merken(format!("m-{}", GESEHEN_LIMIT - 1)));
        assert_eq!(gesehen.len(), GESEHEN_LIMIT);
    }

    #[tokio::test]
    async fn publish_sendet_parameter() {
        let (transport, relayer) = aufbau().await;
        relayer
            .publish(&topic(), "nachricht", PublishOptions { tag: 1100, ..Default::default() })
            .await
            .unwrap();

        let anfrage = transport.anfragen().pop().unwrap();
        assert_eq!(anfrage.method, "publish");
        let p: PublishParams = anfrage.params_als().unwrap();
        assert_eq!(p.message, "nachricht");
        assert_eq!(p.tag, 1100);
        assert_eq!(p.ttl, STANDARD_TTL_SEK);
    }

    #[tokio::test]
    async fn trennung_deaktiviert_subscriber() {
        let (transport, relayer) = aufbau().await;
        relayer.subscribe(&topic(), SubscribeOptions::default()).await.unwrap();
        let mut events = relayer.abonnieren();

        transport.trennen();
        assert_eq!(events.recv().await.unwrap(), RelayerEvent::Getrennt);
        assert_eq!(relayer.subscriber().zustand(), SubscriberZustand::Deaktiviert);

        transport.verbinden();
        assert_eq!(events.recv().await.unwrap(), RelayerEvent::Verbunden);
        assert_eq!(relayer.subscriber().zustand(), SubscriberZustand::Aktiviert);
        assert!(relayer.subscriber().is_subscribed(&topic()));
    }

    #[tokio::test]
    async fn unbekannte_relay_methode_abgelehnt() {
        let (transport, _relayer) = aufbau().await;
        transport.einspeisen(json!({"id": 9, "jsonrpc": "2.0", "method": "irgendwas", "params": {}}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let antwort = transport.antworten().pop().unwrap();
        assert_eq!(antwort.error.unwrap().code, ErrorCode::MethodNotFound.code());
    }
}
