//! Client – Zusammenbau aller Komponenten
//!
//! Reihenfolge beim Start: Schluesselbund, Verlauf, Expirer, Relayer
//! (Subscriptions), Pairings, Sessions, Engine; danach Ablauf-Task und
//! Relay-Verbindung.

use std::sync::Arc;
use std::time::Duration;
use tandem_core::TandemResult;
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::crypto::Crypto;
use crate::engine::Engine;
use crate::events::{ClientEvent, EVENT_KAPAZITAET};
use crate::expirer::Expirer;
use crate::history::JsonRpcHistory;
use crate::messenger::Messenger;
use crate::pairing::Pairing;
use crate::relayer::Relayer;
use crate::session::Sessions;
use crate::storage::KeyValueStorage;
use crate::transport::{RelayTransport, WebSocketTransport};

/// Tandem-Client
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    crypto: Crypto,
    relayer: Relayer,
    expirer: Expirer,
    engine: Engine,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    /// Startet einen Client mit WebSocket-Transport zu `config.relay_url`
    pub async fn starten(
        config: ClientConfig,
        speicher: Arc<dyn KeyValueStorage>,
    ) -> TandemResult<Self> {
        let transport = Arc::new(WebSocketTransport::neu(
            config.relay_url.clone(),
            config.max_backoff,
        ));
        Self::initialisieren(config, speicher, transport).await
    }

    /// Startet einen Client mit beliebigem Transport
    pub async fn initialisieren(
        config: ClientConfig,
        speicher: Arc<dyn KeyValueStorage>,
        transport: Arc<dyn RelayTransport>,
    ) -> TandemResult<Self> {
        let (events, _) = broadcast::channel(EVENT_KAPAZITAET);

        let crypto = Crypto::neu(Arc::clone(&speicher), config.speicher_schluessel("keychain"));
        crypto.init().await?;

        let history = JsonRpcHistory::neu(Arc::clone(&speicher), config.speicher_schluessel("history"));
        history.init().await?;

        let expirer = Expirer::neu(Arc::clone(&speicher), config.speicher_schluessel("expirer"));
        expirer.init().await?;

        let relayer = Relayer::neu(transport, Arc::clone(&speicher), &config);
        relayer.init().await?;

        let messenger = Messenger::neu(
            relayer.clone(),
            crypto.clone(),
            history,
            config.anfrage_timeout,
        );

        let pairing = Pairing::neu(
            Arc::clone(&speicher),
            config.speicher_schluessel("pairing"),
            crypto.clone(),
            relayer.clone(),
            messenger.clone(),
            expirer.clone(),
            events.clone(),
            config.relay.clone(),
        );
        pairing.init().await?;

        let sessions = Sessions::neu(
            Arc::clone(&speicher),
            config.speicher_schluessel("session"),
            crypto.clone(),
            relayer.clone(),
            messenger.clone(),
            expirer.clone(),
            events.clone(),
        );
        sessions.init().await?;

        let engine = Engine::neu(
            speicher,
            config.speicher_schluessel("proposal"),
            crypto.clone(),
            relayer.clone(),
            messenger,
            expirer.clone(),
            pairing,
            sessions,
            events.clone(),
            config.metadata.clone(),
            config.relay.clone(),
        );
        engine.init().await?;

        expirer.starten(config.ablauf_intervall);
        relayer.connect().await?;
        tracing::info!(relay = %config.relay_url, name = %config.metadata.name, "Client gestartet");

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                crypto,
                relayer,
                expirer,
                engine,
                events,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub fn pairing(&self) -> &Pairing {
        self.inner.engine.pairing()
    }

    pub fn sessions(&self) -> &Sessions {
        self.inner.engine.sessions()
    }

    pub fn relayer(&self) -> &Relayer {
        &self.inner.relayer
    }

    pub fn crypto(&self) -> &Crypto {
        &self.inner.crypto
    }

    pub fn expirer(&self) -> &Expirer {
        &self.inner.expirer
    }

    /// Abonniert Client-Ereignisse
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Wartet bis der Subscriber nach einem Verbindungsaufbau wieder aktiv ist
    pub async fn bereit(&self, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();
        loop {
            if self.inner.relayer.subscriber().zustand()
                == crate::subscriber::SubscriberZustand::Aktiviert
            {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Trennt die Relay-Verbindung und stoppt die Ablaufpruefung
    pub async fn beenden(&self) -> TandemResult<()> {
        self.inner.expirer.stoppen();
        self.inner.relayer.disconnect().await?;
        tracing::info!("Client beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testutil::MockTransport;
    use crate::session::SessionRecord;
    use tandem_core::{zeit, ExpiryTarget, TandemError, Topic};
    use tandem_protocol::params::DeleteParams;
    use tandem_protocol::{Metadata, Permissions, RelayOptions};

    async fn client() -> (Arc<MockTransport>, Client) {
        let transport = Arc::new(MockTransport::neu());
        let config = ClientConfig {
            rpc_timeout: Duration::from_millis(500),
            anfrage_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let c = Client::initialisieren(config, Arc::new(MemoryStorage::new()), transport.clone())
            .await
            .unwrap();
        assert!(c.bereit(Duration::from_secs(1)).await);
        (transport, c)
    }

    #[tokio::test]
    async fn pairing_anlegen_abonniert_topic() {
        let (transport, c) = client().await;
        let neu = c.pairing().create().await.unwrap();

        assert!(c.relayer().subscriber().is_subscribed(&neu.topic));
        assert!(c.crypto().has_keys(neu.topic.as_str()).unwrap());
        let record = c.pairing().get(&neu.topic).await.unwrap();
        assert!(!record.active);
        assert!(transport.methoden().contains(&"subscribe".to_string()));
        assert_eq!(neu.uri.topic, neu.topic);
    }

    #[tokio::test]
    async fn gleiche_uri_zweimal_abgelehnt() {
        let (_ta, a) = client().await;
        let (_tb, b) = client().await;
        let neu = a.pairing().create().await.unwrap();
        let uri = neu.uri.to_string();

        b.pairing().pair(&uri, false).await.unwrap();
        assert!(matches!(
            b.pairing().pair(&uri, false).await,
            Err(TandemError::BereitsVorhanden(_))
        ));
    }

    #[tokio::test]
    async fn aktivieren_verlaengert_ablauf() {
        let (_t, c) = client().await;
        let neu = c.pairing().create().await.unwrap();
        let vorher = c.pairing().get(&neu.topic).await.unwrap().expiry;
        let record = c.pairing().activate(&neu.topic).await.unwrap();
        assert!(record.active);
        assert!(record.expiry > vorher);
    }

    fn session_record(topic: Topic, self_public_key: String, expiry: i64) -> SessionRecord {
        SessionRecord {
            pairing_topic: topic.clone(),
            topic,
            relay: RelayOptions::default(),
            expiry,
            permissions: Permissions::default(),
            accounts: Vec::new(),
            controller: self_public_key.clone(),
            is_controller: true,
            self_public_key,
            self_metadata: Metadata::default(),
            peer_metadata: Metadata::default(),
            acknowledged: true,
        }
    }

    /// Session ohne Gegenstelle: Schluesselpaar, Topic, Subscription
    async fn lokale_session(c: &Client, expiry: i64) -> (Topic, String) {
        let self_pub = c.crypto().generate_key_pair().await.unwrap();
        let peer_pub = c.crypto().generate_key_pair().await.unwrap();
        let topic = c
            .crypto()
            .generate_shared_key(&self_pub, &peer_pub, None)
            .await
            .unwrap();
        c.relayer()
            .subscribe(&topic, Default::default())
            .await
            .unwrap();
        c.sessions()
            .einrichten(session_record(topic.clone(), self_pub.clone(), expiry))
            .await
            .unwrap();
        (topic, self_pub)
    }

    async fn warte_auf(events: &mut broadcast::Receiver<ClientEvent>, erwartet: ClientEvent) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if events.recv().await.unwrap() == erwartet {
                    return;
                }
            }
        })
        .await
        .expect("Ereignis nicht eingetroffen");
    }

    #[tokio::test]
    async fn fehlgeschlagenes_pair_laesst_nichts_zurueck() {
        let (_ta, a) = client().await;
        let (tb, b) = client().await;
        let neu = a.pairing().create().await.unwrap();
        let uri = neu.uri.to_string();

        tb.antworten_aus();
        assert!(matches!(
            b.pairing().pair(&uri, false).await,
            Err(TandemError::Zeitlimit(_))
        ));
        assert!(!b.pairing().has(&neu.topic).await.unwrap());
        assert!(!b.crypto().has_keys(neu.topic.as_str()).unwrap());
        assert!(!b.expirer().has(&ExpiryTarget::Topic(neu.topic.clone())));
        assert!(b.relayer().subscriber().ausstehende_topics().is_empty());

        tb.antworten_an();
        b.pairing().pair(&uri, false).await.unwrap();
        assert!(b.pairing().has(&neu.topic).await.unwrap());
        assert!(b.relayer().subscriber().is_subscribed(&neu.topic));
    }

    #[tokio::test]
    async fn disconnect_ohne_antwort_loescht_lokal_und_meldet_zeitlimit() {
        let (_t, c) = client().await;
        let mut events = c.events();
        let neu = c.pairing().create().await.unwrap();
        assert!(matches!(
            c.pairing().disconnect(&neu.topic).await,
            Err(TandemError::Zeitlimit(_))
        ));

        assert!(!c.pairing().has(&neu.topic).await.unwrap());
        assert!(!c.crypto().has_keys(neu.topic.as_str()).unwrap());
        assert!(!c.relayer().subscriber().is_subscribed(&neu.topic));

        let mut geloescht = false;
        while let Ok(ev) = events.try_recv() {
            if ev == (ClientEvent::PairingGeloescht { topic: neu.topic.clone() }) {
                geloescht = true;
            }
        }
        assert!(geloescht);
    }

    #[tokio::test]
    async fn session_disconnect_ohne_antwort_raeumt_auf() {
        let (_t, c) = client().await;
        let mut events = c.events();
        let (topic, self_pub) = lokale_session(&c, zeit::ab_jetzt(3600)).await;

        let r = c
            .sessions()
            .disconnect(&topic, DeleteParams::benutzer_getrennt())
            .await;
        assert!(matches!(r, Err(TandemError::Zeitlimit(_))));
        assert!(!c.sessions().has(&topic).await.unwrap());
        assert!(!c.crypto().has_keys(&self_pub).unwrap());
        assert!(!c.crypto().has_keys(topic.as_str()).unwrap());
        warte_auf(&mut events, ClientEvent::SessionGeloescht { topic }).await;
    }

    #[tokio::test]
    async fn bereinigte_session_verliert_beim_ablauf_ihre_schluessel() {
        let (_t, c) = client().await;
        c.expirer().stoppen();
        let mut events = c.events();
        let (topic, self_pub) = lokale_session(&c, zeit::jetzt_sek() - 1).await;

        // Lesen verschiebt den Datensatz aus dem Bestand
        assert!(matches!(
            c.sessions().get(&topic).await,
            Err(TandemError::Abgelaufen(_))
        ));
        assert!(c.crypto().has_keys(&self_pub).unwrap());

        c.expirer().pruefen().await.unwrap();
        warte_auf(&mut events, ClientEvent::SessionAbgelaufen { topic: topic.clone() }).await;
        assert!(!c.crypto().has_keys(&self_pub).unwrap());
        assert!(!c.crypto().has_keys(topic.as_str()).unwrap());
        assert!(!c.sessions().kennt(&topic));
    }

    #[tokio::test]
    async fn ping_ohne_antwort_zeitlimit() {
        let (_t, c) = client().await;
        let neu = c.pairing().create().await.unwrap();
        assert!(matches!(
            c.engine().ping(&neu.topic).await,
            Err(TandemError::Zeitlimit(_))
        ));
    }

    #[tokio::test]
    async fn unbekanntes_topic_nicht_gefunden() {
        let (_t, c) = client().await;
        let topic = Topic::aus_bytes(&[9; 32]);
        assert!(matches!(
            c.engine().disconnect(&topic, None).await,
            Err(TandemError::NichtGefunden(_))
        ));
    }

    #[tokio::test]
    async fn connect_ohne_chain_abgelehnt() {
        let (_t, c) = client().await;
        let r = c.engine().connect(Default::default()).await;
        assert!(matches!(r, Err(TandemError::Validierung(_))));
    }
}
