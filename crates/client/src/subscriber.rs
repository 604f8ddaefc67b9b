//! Subscriber – Topic-Subscriptions beim Relay
//!
//! ## Zustaende
//! ```text
//!            Transport getrennt               Transport verbunden
//! Aktiviert ------------------> Deaktiviert ------------------> Nachholend
//!     ^                          (aktive Subscriptions           |
//!     |                           werden zwischengespeichert)    |
//!     +-------------------- alle erneut abonniert ---------------+
//! ```
//!
//! Oeffentliche Operationen warten, bis der Zustand `Aktiviert` ist.
//! Beim Nachholen bekommt jede Subscription eine neue Id; die neue Id wird
//! eingetragen, bevor die alte mit Grund "resubscribed" entfernt wird.
//! Haengende Subscriptions (RPC fehlgeschlagen) werden periodisch erneut
//! gesendet.
//!
//! Pro Topic laeuft hoechstens ein Subscribe-RPC; gleichzeitige Aufrufe
//! warten auf den ersten und bekommen dessen Id. Eine Antwort, die erst
//! nach einer Trennung eintrifft, gilt als verloren: das Topic bleibt
//! ausstehend.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_core::{TandemError, TandemResult, Topic};
use tandem_protocol::relay::RelayMethod;
use tandem_protocol::RelayOptions;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::provider::JsonRpcProvider;
use crate::storage::KeyValueStorage;

/// Grund beim Entfernen nach erneutem Abonnieren
pub const GRUND_RESUBSCRIBED: &str = "resubscribed";
/// Grund beim Entfernen durch `unsubscribe`
pub const GRUND_UNSUBSCRIBED: &str = "unsubscribed";

const EVENT_KAPAZITAET: usize = 256;

/// Lebenszyklus des Subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberZustand {
    /// Keine Verbindung; aktive Subscriptions liegen im Zwischenspeicher
    Deaktiviert,
    /// Verbindung steht wieder; Zwischenspeicher wird abgearbeitet
    Nachholend,
    Aktiviert,
}

/// Aktive Subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Vom Relay vergebene Id; aendert sich bei jedem erneuten Abonnieren
    pub id: String,
    pub topic: Topic,
    pub relay: RelayOptions,
    #[serde(default)]
    pub expiry: Option<i64>,
}

/// Optionen fuer `subscribe`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub relay: RelayOptions,
    pub expiry: Option<i64>,
}

/// Ereignisse des Subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    Erstellt(Subscription),
    Geloescht {
        subscription: Subscription,
        grund: String,
    },
    /// Alle zwischengespeicherten Subscriptions wurden erneut abonniert
    Nachgeholt,
}

/// Noch nicht vom Relay bestaetigte Subscription
#[derive(Debug, Clone)]
struct Ausstehend {
    opts: SubscribeOptions,
    in_arbeit: bool,
}

/// Verwaltung aller Subscriptions eines Clients
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

struct SubscriberInner {
    provider: JsonRpcProvider,
    aktiv: DashMap<String, Subscription>,
    themen: DashMap<Topic, Vec<String>>,
    ausstehend: DashMap<Topic, Ausstehend>,
    zwischenspeicher: Mutex<Vec<Subscription>>,
    /// Ein Subscribe-RPC pro Topic
    sperren: DashMap<Topic, Arc<tokio::sync::Mutex<()>>>,
    /// Zaehlt Trennungen; Antworten aus einer frueheren Verbindung sind ungueltig
    generation: AtomicU64,
    zustand: watch::Sender<SubscriberZustand>,
    umschalten: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SubscriberEvent>,
    speicher: Arc<dyn KeyValueStorage>,
    schluessel: String,
    rpc_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SubscriberInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl Subscriber {
    pub fn neu(
        provider: JsonRpcProvider,
        speicher: Arc<dyn KeyValueStorage>,
        schluessel: impl Into<String>,
        rpc_timeout: Duration,
    ) -> Self {
        let (zustand, _) = watch::channel(SubscriberZustand::Deaktiviert);
        let (events, _) = broadcast::channel(EVENT_KAPAZITAET);
        Self {
            inner: Arc::new(SubscriberInner {
                provider,
                aktiv: DashMap::new(),
                themen: DashMap::new(),
                ausstehend: DashMap::new(),
                zwischenspeicher: Mutex::new(Vec::new()),
                sperren: DashMap::new(),
                generation: AtomicU64::new(0),
                zustand,
                umschalten: tokio::sync::Mutex::new(()),
                events,
                speicher,
                schluessel: schluessel.into(),
                rpc_timeout,
                task: Mutex::new(None),
            }),
        }
    }

    /// Stellt persistierte Subscriptions wieder her
    ///
    /// Nur erlaubt solange keine Subscription aktiv ist. Die geladenen
    /// Eintraege werden beim naechsten Verbindungsaufbau erneut abonniert.
    pub async fn init(&self) -> TandemResult<()> {
        if !self.inner.aktiv.is_empty() {
            return Err(TandemError::intern(
                "Wiederherstellung nur ohne aktive Subscriptions moeglich",
            ));
        }
        let Some(wert) = self.inner.speicher.get_item(&self.inner.schluessel).await? else {
            return Ok(());
        };
        let gespeichert: Vec<Subscription> = serde_json::from_value(wert)?;
        tracing::debug!(anzahl = gespeichert.len(), "Subscriptions wiederhergestellt");
        self.inner.zwischenspeicher.lock().extend(gespeichert);

        if self.inner.provider.is_connected() {
            self.verbunden().await;
        }
        Ok(())
    }

    /// Startet das periodische Nachsenden haengender Subscriptions
    pub fn starten(&self, intervall: Duration) {
        let schwach: Weak<SubscriberInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut takt = tokio::time::interval(intervall);
            takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                takt.tick().await;
                let Some(inner) = schwach.upgrade() else { break };
                let subscriber = Subscriber { inner };
                if subscriber.zustand() == SubscriberZustand::Aktiviert {
                    subscriber.ausstehende_senden().await;
                }
            }
        });
        if let Some(alt) = self.inner.task.lock().replace(task) {
            alt.abort();
        }
    }

    pub fn abonnieren(&self) -> broadcast::Receiver<SubscriberEvent> {
        self.inner.events.subscribe()
    }

    pub fn zustand(&self) -> SubscriberZustand {
        *self.inner.zustand.borrow()
    }

    // -----------------------------------------------------------------------
    // Oeffentliche Operationen
    // -----------------------------------------------------------------------

    /// Abonniert ein Topic und gibt die Subscription-Id zurueck
    ///
    /// Ist das Topic bereits aktiv, wird die vorhandene Id geliefert.
    /// Schlaegt der RPC wegen Verbindung oder Zeitlimit fehl, bleibt das
    /// Topic ausstehend und wird spaeter erneut gesendet.
    pub async fn subscribe(&self, topic: &Topic, opts: SubscribeOptions) -> TandemResult<String> {
        self.warten_bis_aktiviert().await?;

        let sperre = self.topic_sperre(topic);
        let _gesperrt = sperre.lock().await;

        if let Some(id) = self.ids_for(topic).into_iter().next() {
            return Ok(id);
        }

        self.inner.ausstehend.insert(
            topic.clone(),
            Ausstehend {
                opts: opts.clone(),
                in_arbeit: true,
            },
        );

        let generation = self.generation();
        let ergebnis = match self.rpc_subscribe(topic).await {
            Ok(id) => self.gleiche_verbindung(generation).map(|_| id),
            Err(e) => Err(e),
        };
        match ergebnis {
            Ok(id) => {
                self.inner.ausstehend.remove(topic);
                let sub = Subscription {
                    id: id.clone(),
                    topic: topic.clone(),
                    relay: opts.relay,
                    expiry: opts.expiry,
                };
                self.aktiv_setzen(sub.clone());
                self.persistieren().await?;
                let _ = self.inner.events.send(SubscriberEvent::Erstellt(sub));
                tracing::debug!(topic = %topic, id = %id, "Topic abonniert");
                Ok(id)
            }
            Err(e) if e.ist_wiederholbar() => {
                if let Some(mut eintrag) = self.inner.ausstehend.get_mut(topic) {
                    eintrag.in_arbeit = false;
                }
                tracing::warn!(topic = %topic, fehler = %e, "Subscribe haengt, wird wiederholt");
                Err(e)
            }
            Err(e) => {
                self.inner.ausstehend.remove(topic);
                Err(e)
            }
        }
    }

    /// Beendet Subscriptions eines Topics
    ///
    /// Ohne `id` werden alle Subscriptions des Topics beendet.
    pub async fn unsubscribe(&self, topic: &Topic, id: Option<&str>) -> TandemResult<()> {
        self.warten_bis_aktiviert().await?;
        self.inner.ausstehend.remove(topic);
        if id.is_none() {
            self.inner.sperren.remove(topic);
        }

        let ids = match id {
            Some(id) => vec![id.to_string()],
            None => self.ids_for(topic),
        };

        for id in ids {
            let params = json!({ "id": id, "topic": topic });
            if let Err(e) = self
                .inner
                .provider
                .request(RelayMethod::Unsubscribe.as_str(), params, self.inner.rpc_timeout)
                .await
            {
                tracing::warn!(topic = %topic, id = %id, fehler = %e, "Unsubscribe beim Relay fehlgeschlagen");
            }
            if let Some(sub) = self.aktiv_entfernen(&id) {
                let _ = self.inner.events.send(SubscriberEvent::Geloescht {
                    subscription: sub,
                    grund: GRUND_UNSUBSCRIBED.into(),
                });
            }
        }
        self.persistieren().await
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Alle aktiv abonnierten Topics
    pub fn topics(&self) -> Vec<Topic> {
        self.inner.themen.iter().map(|e| e.key().clone()).collect()
    }

    pub fn ids_for(&self, topic: &Topic) -> Vec<String> {
        self.inner
            .themen
            .get(topic)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.inner.themen.contains_key(topic)
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.inner.aktiv.get(id).map(|e| e.value().clone())
    }

    pub fn aktive(&self) -> Vec<Subscription> {
        self.inner.aktiv.iter().map(|e| e.value().clone()).collect()
    }

    /// Gibt ein ausstehendes Topic auf, ohne das Relay zu fragen
    pub fn ausstehend_verwerfen(&self, topic: &Topic) {
        if self.inner.ausstehend.remove(topic).is_some() {
            tracing::debug!(topic = %topic, "Ausstehendes Subscribe verworfen");
        }
    }

    /// Topics, deren Subscribe noch nicht bestaetigt ist
    pub fn ausstehende_topics(&self) -> Vec<Topic> {
        self.inner.ausstehend.iter().map(|e| e.key().clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Transport-Zustand
    // -----------------------------------------------------------------------

    /// Transport getrennt: aktive Subscriptions zwischenspeichern
    pub async fn getrennt(&self) {
        let _sperre = self.inner.umschalten.lock().await;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.zustand.send_replace(SubscriberZustand::Deaktiviert);

        let aktive = self.aktive();
        self.inner.aktiv.clear();
        self.inner.themen.clear();
        for mut eintrag in self.inner.ausstehend.iter_mut() {
            eintrag.in_arbeit = false;
        }
        tracing::debug!(anzahl = aktive.len(), "Subscriber deaktiviert");
        self.inner.zwischenspeicher.lock().extend(aktive);
    }

    /// Transport verbunden: Zwischenspeicher erneut abonnieren
    pub async fn verbunden(&self) {
        let _sperre = self.inner.umschalten.lock().await;
        self.inner.zustand.send_replace(SubscriberZustand::Nachholend);

        let zwischen = std::mem::take(&mut *self.inner.zwischenspeicher.lock());
        let anzahl = zwischen.len();

        for alt in zwischen {
            match self.rpc_subscribe(&alt.topic).await {
                Ok(neue_id) => {
                    let neu = Subscription {
                        id: neue_id,
                        ..alt.clone()
                    };
                    // Neue Id zuerst eintragen, dann die alte verwerfen
                    self.aktiv_setzen(neu.clone());
                    let _ = self.inner.events.send(SubscriberEvent::Erstellt(neu));
                    let _ = self.inner.events.send(SubscriberEvent::Geloescht {
                        subscription: alt,
                        grund: GRUND_RESUBSCRIBED.into(),
                    });
                }
                Err(e) => {
                    tracing::warn!(topic = %alt.topic, fehler = %e, "Erneutes Abonnieren fehlgeschlagen");
                    self.inner.ausstehend.insert(
                        alt.topic.clone(),
                        Ausstehend {
                            opts: SubscribeOptions {
                                relay: alt.relay,
                                expiry: alt.expiry,
                            },
                            in_arbeit: false,
                        },
                    );
                }
            }
        }

        self.ausstehende_senden().await;

        if let Err(e) = self.persistieren().await {
            tracing::warn!(fehler = %e, "Subscriptions nicht persistiert");
        }
        self.inner.zustand.send_replace(SubscriberZustand::Aktiviert);
        let _ = self.inner.events.send(SubscriberEvent::Nachgeholt);
        tracing::info!(anzahl, aktiv = self.inner.aktiv.len(), "Subscriptions nachgeholt");
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    async fn warten_bis_aktiviert(&self) -> TandemResult<()> {
        let mut rx = self.inner.zustand.subscribe();
        let ergebnis = match tokio::time::timeout(
            self.inner.rpc_timeout,
            rx.wait_for(|z| *z == SubscriberZustand::Aktiviert),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TandemError::intern("Subscriber beendet")),
            Err(_) => Err(TandemError::Zeitlimit(
                "Subscriber nicht aktiviert (keine Relay-Verbindung)".into(),
            )),
        };
        ergebnis
    }

    fn topic_sperre(&self, topic: &Topic) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inner.sperren.entry(topic.clone()).or_default().value())
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Fehler, wenn seit `generation` eine Trennung stattgefunden hat
    fn gleiche_verbindung(&self, generation: u64) -> TandemResult<()> {
        if self.generation() != generation || self.zustand() == SubscriberZustand::Deaktiviert {
            return Err(TandemError::Transport(
                "Verbindung waehrend subscribe getrennt".into(),
            ));
        }
        Ok(())
    }

    async fn rpc_subscribe(&self, topic: &Topic) -> TandemResult<String> {
        let antwort = self
            .inner
            .provider
            .request(
                RelayMethod::Subscribe.as_str(),
                json!({ "topic": topic }),
                self.inner.rpc_timeout,
            )
            .await?;
        antwort
            .as_str()
            .map(String::from)
            .ok_or_else(|| TandemError::intern("Relay lieferte keine Subscription-Id"))
    }

    /// Sendet alle haengenden Subscriptions, die gerade nicht bearbeitet werden
    async fn ausstehende_senden(&self) {
        let offen: Vec<(Topic, SubscribeOptions)> = self
            .inner
            .ausstehend
            .iter_mut()
            .filter(|e| !e.in_arbeit)
            .map(|mut e| {
                e.in_arbeit = true;
                (e.key().clone(), e.opts.clone())
            })
            .collect();

        if offen.is_empty() {
            return;
        }

        let mut geaendert = false;
        for (topic, opts) in offen {
            let sperre = self.topic_sperre(&topic);
            let _gesperrt = sperre.lock().await;
            if self.is_subscribed(&topic) {
                self.inner.ausstehend.remove(&topic);
                continue;
            }
            if !self.inner.ausstehend.contains_key(&topic) {
                // inzwischen abbestellt
                continue;
            }
            let generation = self.generation();
            let ergebnis = match self.rpc_subscribe(&topic).await {
                Ok(id) => self.gleiche_verbindung(generation).map(|_| id),
                Err(e) => Err(e),
            };
            match ergebnis {
                Ok(id) => {
                    if self.inner.ausstehend.remove(&topic).is_none() {
                        tracing::debug!(topic = %topic, "Subscribe inzwischen verworfen");
                        continue;
                    }
                    let sub = Subscription {
                        id,
                        topic,
                        relay: opts.relay,
                        expiry: opts.expiry,
                    };
                    self.aktiv_setzen(sub.clone());
                    let _ = self.inner.events.send(SubscriberEvent::Erstellt(sub));
                    geaendert = true;
                }
                Err(e) => {
                    tracing::debug!(topic = %topic, fehler = %e, "Ausstehendes Subscribe weiter offen");
                    if let Some(mut eintrag) = self.inner.ausstehend.get_mut(&topic) {
                        eintrag.in_arbeit = false;
                    }
                }
            }
        }

        if geaendert && self.zustand() != SubscriberZustand::Deaktiviert {
            if let Err(e) = self.persistieren().await {
                tracing::warn!(fehler = %e, "Subscriptions nicht persistiert");
            }
        }
    }

    fn aktiv_setzen(&self, sub: Subscription) {
        self.inner
            .themen
            .entry(sub.topic.clone())
            .or_default()
            .push(sub.id.clone());
        self.inner.aktiv.insert(sub.id.clone(), sub);
    }

    fn aktiv_entfernen(&self, id: &str) -> Option<Subscription> {
        let (_, sub) = self.inner.aktiv.remove(id)?;
        if let Some(mut ids) = self.inner.themen.get_mut(&sub.topic) {
            ids.retain(|i| i != id);
        }
        self.inner.themen.remove_if(&sub.topic, |_, ids| ids.is_empty());
        Some(sub)
    }

    async fn persistieren(&self) -> TandemResult<()> {
        let mut aktive = self.aktive();
        aktive.sort_by(|a, b| a.topic.cmp(&b.topic));
        self.inner
            .speicher
            .set_item(&self.inner.schluessel, serde_json::to_value(aktive)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testutil::MockTransport;

    fn topic(n: u8) -> Topic {
        Topic::aus_bytes(&[n; 32])
    }

    async fn aufbau() -> (Arc<MockTransport>, Subscriber) {
        let transport = Arc::new(MockTransport::neu());
        let provider = JsonRpcProvider::neu(transport.clone());
        let sub = Subscriber::neu(
            provider,
            Arc::new(MemoryStorage::new()),
            "test:subscription",
            Duration::from_millis(500),
        );
        transport.verbinden();
        sub.verbunden().await;
        (transport, sub)
    }

    #[tokio::test]
    async fn subscribe_und_unsubscribe() {
        let (transport, sub) = aufbau().await;
        let id = sub.subscribe(&topic(1), SubscribeOptions::default()).await.unwrap();

        assert!(sub.is_subscribed(&topic(1)));
        assert_eq!(sub.ids_for(&topic(1)), vec![id.clone()]);
        assert_eq!(sub.get(&id).unwrap().topic, topic(1));
        assert_eq!(transport.methoden(), vec!["subscribe"]);

        sub.unsubscribe(&topic(1), None).await.unwrap();
        assert!(!sub.is_subscribed(&topic(1)));
        assert!(sub.get(&id).is_none());
        assert_eq!(transport.methoden(), vec!["subscribe", "unsubscribe"]);
    }

    #[tokio::test]
    async fn doppeltes_subscribe_liefert_gleiche_id() {
        let (transport, sub) = aufbau().await;
        let a = sub.subscribe(&topic(1), SubscribeOptions::default()).await.unwrap();
        let b = sub.subscribe(&topic(1), SubscribeOptions::default()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(transport.methoden().len(), 1);
    }

    #[tokio::test]
    async fn trennung_und_nachholen_vergibt_neue_ids() {
        let (_transport, sub) = aufbau().await;
        let mut events = sub.abonnieren();
        let alt_a = sub.subscribe(&topic(1), SubscribeOptions::default()).await.unwrap();
        let alt_b = sub.subscribe(&topic(2), SubscribeOptions::default()).await.unwrap();

        sub.getrennt().await;
        assert_eq!(sub.zustand(), SubscriberZustand::Deaktiviert);
        assert!(sub.topics().is_empty());

        sub.verbunden().await;
        assert_eq!(sub.zustand(), SubscriberZustand::Aktiviert);

        let mut topics = sub.topics();
        topics.sort();
        assert_eq!(topics, vec![topic(1), topic(2)]);
        // Keine Duplikate, neue Ids
        assert_eq!(sub.aktive().len(), 2);
        assert_ne!(sub.ids_for(&topic(1)), vec![alt_a.clone()]);
        assert_ne!(sub.ids_for(&topic(2)), vec![alt_b.clone()]);

        let mut resubscribed = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let SubscriberEvent::Geloescht { subscription, grund } = ev {
                assert_eq!(grund, GRUND_RESUBSCRIBED);
                resubscribed.push(subscription.id);
            }
        }
        resubscribed.sort();
        let mut erwartet = vec![alt_a, alt_b];
        erwartet.sort();
        assert_eq!(resubscribed, erwartet);
    }

    #[tokio::test]
    async fn subscribe_wartet_bis_aktiviert() {
        let (_transport, sub) = aufbau().await;
        sub.getrennt().await;

        let s = sub.clone();
        let wartend = tokio::spawn(async move {
            s.subscribe(&topic(3), SubscribeOptions::default()).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!wartend.is_finished());

        sub.verbunden().await;
        assert!(wartend.await.unwrap().is_ok());
        assert!(sub.is_subscribed(&topic(3)));
    }

    #[tokio::test]
    async fn ohne_verbindung_zeitlimit() {
        let (_transport, sub) = aufbau().await;
        sub.getrennt().await;
        assert!(matches!(
            sub.subscribe(&topic(1), SubscribeOptions::default()).await,
            Err(TandemError::Zeitlimit(_))
        ));
    }

    #[tokio::test]
    async fn haengendes_subscribe_wird_nachgesendet() {
        let (transport, sub) = aufbau().await;
        transport.antworten_aus();
        assert!(sub
            .subscribe(&topic(5), SubscribeOptions::default())
            .await
            .is_err());
        assert_eq!(sub.ausstehende_topics(), vec![topic(5)]);

        transport.antworten_an();
        sub.starten(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(2), async {
            while !sub.is_subscribed(&topic(5)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(sub.ausstehende_topics().is_empty());
    }

    #[tokio::test]
    async fn gleichzeitige_subscribes_teilen_einen_rpc() {
        let (transport, sub) = aufbau().await;
        let (t1, t2) = (topic(6), topic(6));
        let (a, b) = tokio::join!(
            sub.subscribe(&t1, SubscribeOptions::default()),
            sub.subscribe(&t2, SubscribeOptions::default()),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(sub.ids_for(&topic(6)).len(), 1);
        let subscribes = transport
            .methoden()
            .into_iter()
            .filter(|m| m == "subscribe")
            .count();
        assert_eq!(subscribes, 1);
    }

    #[tokio::test]
    async fn spaete_antwort_nach_trennung_wird_verworfen() {
        let (transport, sub) = aufbau().await;
        transport.antworten_aus();

        let s = sub.clone();
        let laufend = tokio::spawn(async move {
            s.subscribe(&topic(8), SubscribeOptions::default()).await
        });
        tokio::time::timeout(Duration::from_secs(1), async {
            while transport.anfragen().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let anfrage_id = transport.anfragen()[0].id;

        sub.getrennt().await;
        transport.einspeisen(json!({"id": anfrage_id, "jsonrpc": "2.0", "result": "sub-spaet"}));

        assert!(matches!(laufend.await.unwrap(), Err(TandemError::Transport(_))));
        assert!(sub.get("sub-spaet").is_none());
        assert_eq!(sub.ausstehende_topics(), vec![topic(8)]);

        transport.antworten_an();
        sub.verbunden().await;
        assert!(sub.is_subscribed(&topic(8)));
        assert!(sub.get("sub-spaet").is_none());
        assert_eq!(sub.aktive().len(), 1);
    }

    #[tokio::test]
    async fn init_stellt_wieder_her() {
        let speicher: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let transport = Arc::new(MockTransport::neu());
        transport.verbinden();

        let erste = Subscriber::neu(
            JsonRpcProvider::neu(transport.clone()),
            Arc::clone(&speicher),
            "k",
            Duration::from_millis(500),
        );
        erste.verbunden().await;
        erste.subscribe(&topic(7), SubscribeOptions::default()).await.unwrap();

        let zweite = Subscriber::neu(
            JsonRpcProvider::neu(transport.clone()),
            speicher,
            "k",
            Duration::from_millis(500),
        );
        zweite.init().await.unwrap();
        assert!(zweite.is_subscribed(&topic(7)));
        assert_eq!(zweite.zustand(), SubscriberZustand::Aktiviert);

        // Zweites init mit aktiven Subscriptions ist nicht erlaubt
        assert!(zweite.init().await.is_err());
    }
}
