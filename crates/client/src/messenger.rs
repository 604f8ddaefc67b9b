//! Peer-Messenger – verschluesselter JSON-RPC-Kanal zur Gegenstelle
//!
//! Anfragen werden verschluesselt auf ein Topic veroeffentlicht und im
//! Verlauf abgelegt. Antworten kommen ueber den Engine-Router zurueck und
//! werden ueber den Verlauf ihrer Anfrage zugeordnet. Der Warteplatz wird
//! vor dem Veroeffentlichen eingetragen, damit keine Antwort verloren geht.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{TandemError, TandemResult, Topic};
use tandem_protocol::{JsonRpcError, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, WireMethod};
use tokio::sync::oneshot;

use crate::crypto::{Crypto, DecodeOptions, EncodeOptions};
use crate::history::JsonRpcHistory;
use crate::relayer::{PublishOptions, Relayer};

/// Wartet auf die Antwort einer Anfrage
pub type AntwortEmpfaenger = oneshot::Receiver<JsonRpcResponse>;

/// Verschluesselter Anfrage/Antwort-Kanal
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

struct MessengerInner {
    relayer: Relayer,
    crypto: Crypto,
    history: JsonRpcHistory,
    wartend: DashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    anfrage_timeout: Duration,
}

impl Messenger {
    pub fn neu(
        relayer: Relayer,
        crypto: Crypto,
        history: JsonRpcHistory,
        anfrage_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                relayer,
                crypto,
                history,
                wartend: DashMap::new(),
                anfrage_timeout,
            }),
        }
    }

    pub fn history(&self) -> &JsonRpcHistory {
        &self.inner.history
    }

    pub fn anfrage_timeout(&self) -> Duration {
        self.inner.anfrage_timeout
    }

    /// Sendet eine Anfrage; die Antwort kommt ueber den Empfaenger
    pub async fn senden(
        &self,
        topic: &Topic,
        method: WireMethod,
        params: impl Serialize,
    ) -> TandemResult<(u64, AntwortEmpfaenger)> {
        let anfrage = JsonRpcRequest::neu(method.as_str(), serde_json::to_value(params)?);
        let id = anfrage.id;
        let nachricht = self.inner.crypto.encode(
            topic,
            &serde_json::to_value(&anfrage)?,
            &EncodeOptions::default(),
        )?;

        self.inner.history.set(topic, &anfrage).await?;
        let (tx, rx) = oneshot::channel();
        self.inner.wartend.insert(id, tx);

        if let Err(e) = self
            .inner
            .relayer
            .publish(topic, &nachricht, PublishOptions::default())
            .await
        {
            self.inner.wartend.remove(&id);
            if let Err(loeschfehler) = self.inner.history.delete(id).await {
                tracing::warn!(id, fehler = %loeschfehler, "Verlaufseintrag nicht entfernt");
            }
            return Err(e);
        }
        tracing::debug!(topic = %topic, id, methode = %method, "Anfrage gesendet");
        Ok((id, rx))
    }

    /// Sendet eine Anfrage und wartet auf das Ergebnis
    ///
    /// Fehlerantworten werden zu `TandemError::Peer`, ausbleibende Antworten
    /// nach `anfrage_timeout` zu `Zeitlimit`.
    pub async fn anfrage(
        &self,
        topic: &Topic,
        method: WireMethod,
        params: impl Serialize,
    ) -> TandemResult<Value> {
        let name = method.to_string();
        let (id, rx) = self.senden(topic, method, params).await?;
        self.warten(id, rx, self.inner.anfrage_timeout)
            .await
            .map_err(|e| match e {
                TandemError::Zeitlimit(_) => TandemError::Zeitlimit(format!("'{name}' auf {topic}")),
                anders => anders,
            })
    }

    /// Wartet auf eine bereits gesendete Anfrage
    pub async fn warten(
        &self,
        id: u64,
        rx: AntwortEmpfaenger,
        timeout: Duration,
    ) -> TandemResult<Value> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(antwort)) => antwort.in_result().map_err(|e| TandemError::Peer {
                code: e.code,
                nachricht: e.message,
            }),
            Ok(Err(_)) => Err(TandemError::intern(format!("Warteplatz {id} verworfen"))),
            Err(_) => {
                self.inner.wartend.remove(&id);
                Err(TandemError::Zeitlimit(format!("Antwort auf {id}")))
            }
        }
    }

    /// Beantwortet eine Anfrage der Gegenstelle mit einem Ergebnis
    pub async fn antworten(&self, topic: &Topic, id: u64, result: impl Serialize) -> TandemResult<()> {
        let antwort = JsonRpcResponse::ergebnis(id, serde_json::to_value(result)?);
        self.antwort_senden(topic, &antwort).await
    }

    /// Beantwortet eine Anfrage der Gegenstelle mit einem Fehler
    pub async fn fehler_antworten(&self, topic: &Topic, id: u64, fehler: JsonRpcError) -> TandemResult<()> {
        let antwort = JsonRpcResponse::fehler(id, fehler);
        self.antwort_senden(topic, &antwort).await
    }

    async fn antwort_senden(&self, topic: &Topic, antwort: &JsonRpcResponse) -> TandemResult<()> {
        let nachricht = self.inner.crypto.encode(
            topic,
            &serde_json::to_value(antwort)?,
            &EncodeOptions::default(),
        )?;
        self.inner
            .relayer
            .publish(topic, &nachricht, PublishOptions::default())
            .await
    }

    /// Ordnet eine eingehende Antwort ihrer Anfrage zu
    ///
    /// Verirrte und doppelte Antworten werden verworfen.
    pub async fn antwort_zustellen(&self, topic: &Topic, antwort: JsonRpcResponse) {
        match self.inner.history.resolve(&antwort).await {
            Ok(record) if &record.topic != topic => {
                tracing::warn!(topic = %topic, id = antwort.id, "Antwort auf fremdem Topic verworfen");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(topic = %topic, id = antwort.id, fehler = %e, "Antwort verworfen");
                return;
            }
        }
        match self.inner.wartend.remove(&antwort.id) {
            Some((_, tx)) => {
                let _ = tx.send(antwort);
            }
            None => tracing::debug!(id = antwort.id, "Niemand wartet auf die Antwort"),
        }
    }

    /// Entschluesselt und klassifiziert eine Zustellung
    pub fn entschluesseln(&self, topic: &Topic, nachricht: &str) -> Option<JsonRpcPayload> {
        let wert = self
            .inner
            .crypto
            .decode(topic, nachricht, &DecodeOptions::default())?;
        match JsonRpcPayload::aus_wert(wert) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(topic = %topic, fehler = %e, "Kein gueltiges JSON-RPC im Umschlag");
                None
            }
        }
    }

    /// Verwirft Verlauf und Warteplaetze eines Topics
    pub async fn topic_vergessen(&self, topic: &Topic) -> TandemResult<()> {
        for record in self.inner.history.pending().await? {
            if &record.topic == topic {
                self.inner.wartend.remove(&record.id);
            }
        }
        self.inner.history.delete_topic(topic).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use crate::testutil::MockTransport;
    use serde_json::json;
    use tandem_protocol::relay::PublishParams;

    async fn aufbau() -> (Arc<MockTransport>, Messenger, Crypto, Topic) {
        let speicher: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let transport = Arc::new(MockTransport::neu());
        let config = ClientConfig {
            rpc_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let relayer = Relayer::neu(transport.clone(), Arc::clone(&speicher), &config);
        relayer.connect().await.unwrap();
        let crypto = Crypto::neu(Arc::clone(&speicher), "k");
        crypto.init().await.unwrap();
        let history = JsonRpcHistory::neu(speicher, "h");
        history.init().await.unwrap();
        let (topic, _) = crypto.generate_sym_key().await.unwrap();
        let messenger = Messenger::neu(relayer, crypto.clone(), history, Duration::from_millis(300));
        (transport, messenger, crypto, topic)
    }

    fn letzte_nachricht(transport: &MockTransport) -> String {
        let anfrage = transport.anfragen().pop().unwrap();
        anfrage.params_als::<PublishParams>().unwrap().message
    }

    #[tokio::test]
    async fn anfrage_verschluesselt_und_zugeordnet() {
        let (transport, messenger, _crypto, topic) = aufbau().await;
        let (id, rx) = messenger
            .senden(&topic, WireMethod::PairingPing, json!({}))
            .await
            .unwrap();

        // Die veroeffentlichte Nachricht ist ein Umschlag, kein Klartext
        let umschlag = letzte_nachricht(&transport);
        assert!(!umschlag.contains("wc_pairingPing"));
        match messenger.entschluesseln(&topic, &umschlag).unwrap() {
            JsonRpcPayload::Request(r) => assert_eq!(r.method, "wc_pairingPing"),
            anders => panic!("unerwartet: {anders:?}"),
        }

        let antwort = JsonRpcResponse::ergebnis(id, json!(true));
        messenger.antwort_zustellen(&topic, antwort.clone()).await;
        let wert = messenger.warten(id, rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(wert, json!(true));

        // Zweite Zustellung derselben Antwort wird verworfen
        messenger.antwort_zustellen(&topic, antwort).await;
    }

    #[tokio::test]
    async fn ohne_antwort_zeitlimit() {
        let (_transport, messenger, _crypto, topic) = aufbau().await;
        assert!(matches!(
            messenger.anfrage(&topic, WireMethod::SessionPing, json!({})).await,
            Err(TandemError::Zeitlimit(_))
        ));
    }

    #[tokio::test]
    async fn fehlerantwort_wird_peer_fehler() {
        let (_transport, messenger, _crypto, topic) = aufbau().await;
        let (id, rx) = messenger
            .senden(&topic, WireMethod::SessionRequest, json!({}))
            .await
            .unwrap();
        messenger
            .antwort_zustellen(
                &topic,
                JsonRpcResponse::fehler(id, JsonRpcError::aus_code(tandem_protocol::ErrorCode::Unauthorized)),
            )
            .await;
        assert!(matches!(
            messenger.warten(id, rx, Duration::from_secs(1)).await,
            Err(TandemError::Peer { code: 3000, .. })
        ));
    }

    #[tokio::test]
    async fn fehlgeschlagenes_senden_hinterlaesst_keinen_verlauf() {
        let (transport, messenger, _crypto, topic) = aufbau().await;
        transport.trennen();

        assert!(matches!(
            messenger.senden(&topic, WireMethod::PairingPing, json!({})).await,
            Err(TandemError::Transport(_))
        ));
        assert!(messenger.history().pending().await.unwrap().is_empty());
        assert!(messenger.inner.wartend.is_empty());
    }

    #[tokio::test]
    async fn fremder_umschlag_nicht_entschluesselbar() {
        let (_transport, messenger, _crypto, topic) = aufbau().await;
        assert!(messenger.entschluesseln(&topic, "kein-umschlag").is_none());
    }
}
