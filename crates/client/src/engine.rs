//! Engine – Vorschlag, Zustimmung und Routing eingehender Nachrichten
//!
//! ## Handshake
//! ```text
//! A (Vorschlagender)                              B (Antwortender)
//! connect() -- wc_sessionPropose{pubA} ------------> SessionVorschlag
//!                                                    approve():
//!           <-- Antwort {responderPublicKey: pubB} -- topic = ECDH(pubB, pubA)
//! topic = ECDH(pubA, pubB), subscribe                subscribe, Session (unbestaetigt)
//!           <-- wc_sessionSettle (Session-Topic) ---
//! Session speichern, Pairing aktivieren
//!           --- true ------------------------------> bestaetigt, SessionVerbunden
//! approval erfuellt
//! ```
//!
//! Alle Zustellungen des Relayers laufen durch einen einzigen Router-Task:
//! entschluesseln, als Anfrage oder Antwort einordnen, an Pairing- oder
//! Session-Verarbeitung weitergeben.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_core::{zeit, ExpiryTarget, TandemError, TandemResult, Topic};
use tandem_protocol::params::{
    DeleteParams, EventBody, RequestBody, SessionProposeParams, SessionProposeResult,
    SessionSettleParams,
};
use tandem_protocol::{
    ErrorCode, JsonRpcError, JsonRpcPayload, JsonRpcRequest, Metadata, PairingUri, Participant,
    Permissions, RelayOptions, WireMethod,
};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::crypto::Crypto;
use crate::events::ClientEvent;
use crate::expirer::{Expirer, ExpirerEvent};
use crate::messenger::{AntwortEmpfaenger, Messenger};
use crate::pairing::Pairing;
use crate::relayer::{Relayer, RelayerEvent};
use crate::session::{SessionRecord, Sessions};
use crate::storage::KeyValueStorage;
use crate::store::{Ablaufend, Store};
use crate::subscriber::SubscribeOptions;

/// Ergebnis eines Vorschlags bzw. einer Zustimmung
pub type SessionErgebnis = oneshot::Receiver<TandemResult<SessionRecord>>;

/// Persistierter Vorschlag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub id: u64,
    pub pairing_topic: Topic,
    pub proposer: Participant,
    pub permissions: Permissions,
    pub relay: RelayOptions,
    pub expiry: i64,
}

impl Ablaufend for ProposalRecord {
    fn ablauf(&self) -> Option<i64> {
        Some(self.expiry)
    }
}

/// Parameter von `connect`
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub permissions: Permissions,
    /// Vorhandenes Pairing verwenden statt ein neues anzulegen
    pub pairing_topic: Option<Topic>,
    /// Ueberschreibt die Metadaten aus der Client-Konfiguration
    pub metadata: Option<Metadata>,
}

/// Ergebnis von `connect`
#[derive(Debug)]
pub struct Verbindungsaufbau {
    /// Nur gesetzt, wenn ein neues Pairing angelegt wurde
    pub uri: Option<PairingUri>,
    pub pairing_topic: Topic,
    pub approval: SessionErgebnis,
}

/// Parameter von `approve`
#[derive(Debug, Clone, Default)]
pub struct ApproveParams {
    pub id: u64,
    pub accounts: Vec<String>,
    /// Ohne Angabe gelten die vorgeschlagenen Berechtigungen
    pub permissions: Option<Permissions>,
}

/// Ergebnis von `approve`
#[derive(Debug)]
pub struct Zustimmung {
    pub topic: Topic,
    /// Erfuellt, sobald die Gegenstelle den Settle bestaetigt
    pub acknowledged: SessionErgebnis,
}

/// Erwarteter Settle auf einem abgeleiteten Session-Topic
#[derive(Debug, Clone)]
struct SettleErwartung {
    proposal_id: u64,
    pairing_topic: Topic,
    self_public_key: String,
    self_metadata: Metadata,
    permissions: Permissions,
}

/// Protokoll-Engine eines Clients
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    crypto: Crypto,
    relayer: Relayer,
    messenger: Messenger,
    expirer: Expirer,
    pairing: Pairing,
    sessions: Sessions,
    vorschlaege: Store<ProposalRecord>,
    /// Offene eigene Vorschlaege: Id -> Ergebnis
    approvals: DashMap<u64, oneshot::Sender<TandemResult<SessionRecord>>>,
    /// Session-Topic -> erwarteter Settle
    settle_erwartet: DashMap<Topic, SettleErwartung>,
    events: broadcast::Sender<ClientEvent>,
    metadata: Metadata,
    relay: RelayOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn neu(
        speicher: Arc<dyn KeyValueStorage>,
        schluessel: impl Into<String>,
        crypto: Crypto,
        relayer: Relayer,
        messenger: Messenger,
        expirer: Expirer,
        pairing: Pairing,
        sessions: Sessions,
        events: broadcast::Sender<ClientEvent>,
        metadata: Metadata,
        relay: RelayOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                crypto,
                relayer,
                messenger,
                expirer,
                pairing,
                sessions,
                vorschlaege: Store::neu(speicher, "Vorschlag", schluessel),
                approvals: DashMap::new(),
                settle_erwartet: DashMap::new(),
                events,
                metadata,
                relay,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Laedt offene Vorschlaege und startet Router und Ablauf-Verarbeitung
    pub async fn init(&self) -> TandemResult<()> {
        for key in self.inner.vorschlaege.init().await? {
            if let Ok(id) = key.parse::<u64>() {
                self.inner.expirer.del(&ExpiryTarget::Id(id)).await?;
            }
        }
        self.router_starten();
        self.ablauf_starten();
        Ok(())
    }

    fn router_starten(&self) {
        let mut rx = self.inner.relayer.abonnieren();
        let schwach: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let ereignis = match rx.recv().await {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Router hinkt dem Relayer hinterher");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let RelayerEvent::Nachricht { topic, message } = ereignis else {
                    continue;
                };
                let Some(inner) = schwach.upgrade() else { break };
                let engine = Engine { inner };
                if let Err(e) = engine.nachricht_verarbeiten(&topic, &message).await {
                    tracing::warn!(topic = %topic, fehler = %e, "Nachricht nicht verarbeitet");
                }
            }
        });
        self.inner.tasks.lock().push(task);
    }

    fn ablauf_starten(&self) {
        let mut rx = self.inner.expirer.abonnieren();
        let schwach: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let ereignis = match rx.recv().await {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Ablauf-Ereignisse verpasst");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let ExpirerEvent::Abgelaufen { target, .. } = ereignis else {
                    continue;
                };
                let Some(inner) = schwach.upgrade() else { break };
                let engine = Engine { inner };
                if let Err(e) = engine.ablauf_verarbeiten(&target).await {
                    tracing::warn!(ziel = %target, fehler = %e, "Ablauf nicht verarbeitet");
                }
            }
        });
        self.inner.tasks.lock().push(task);
    }

    pub fn pairing(&self) -> &Pairing {
        &self.inner.pairing
    }

    pub fn sessions(&self) -> &Sessions {
        &self.inner.sessions
    }

    // -----------------------------------------------------------------------
    // Vorschlagen (Seite A)
    // -----------------------------------------------------------------------

    /// Schlaegt eine Session vor
    ///
    /// Ohne `pairing_topic` wird ein neues Pairing angelegt und dessen URI
    /// zurueckgegeben. `approval` wird erfuellt, sobald der Settle eintrifft.
    pub async fn connect(&self, params: ConnectParams) -> TandemResult<Verbindungsaufbau> {
        params
            .permissions
            .pruefen()
            .map_err(TandemError::Validierung)?;

        let (pairing_topic, uri) = match params.pairing_topic {
            Some(topic) => {
                self.inner.pairing.get(&topic).await?;
                (topic, None)
            }
            None => {
                let neu = self.inner.pairing.create().await?;
                (neu.topic, Some(neu.uri))
            }
        };

        let metadata = params.metadata.unwrap_or_else(|| self.inner.metadata.clone());
        let self_public_key = self.inner.crypto.generate_key_pair().await?;
        let proposer = Participant {
            public_key: self_public_key.clone(),
            metadata: metadata.clone(),
        };
        let vorschlag = SessionProposeParams {
            relay: self.inner.relay.clone(),
            proposer: proposer.clone(),
            permissions: params.permissions.clone(),
        };

        let (id, rx) = self
            .inner
            .messenger
            .senden(&pairing_topic, WireMethod::SessionPropose, &vorschlag)
            .await?;

        let record = ProposalRecord {
            id,
            pairing_topic: pairing_topic.clone(),
            proposer,
            permissions: params.permissions.clone(),
            relay: self.inner.relay.clone(),
            expiry: zeit::ab_jetzt(zeit::FUENF_MINUTEN),
        };
        self.vorschlag_ablegen(record).await?;

        let (tx, approval) = oneshot::channel();
        self.inner.approvals.insert(id, tx);

        let erwartung = SettleErwartung {
            proposal_id: id,
            pairing_topic: pairing_topic.clone(),
            self_public_key,
            self_metadata: metadata,
            permissions: params.permissions,
        };
        let engine = self.clone();
        tokio::spawn(async move {
            engine.vorschlag_antwort_abwarten(id, rx, erwartung).await;
        });

        tracing::info!(topic = %pairing_topic, id, "Session vorgeschlagen");
        Ok(Verbindungsaufbau {
            uri,
            pairing_topic,
            approval,
        })
    }

    async fn vorschlag_ablegen(&self, record: ProposalRecord) -> TandemResult<()> {
        let id = record.id;
        let expiry = record.expiry;
        self.inner.vorschlaege.set(id.to_string(), record).await?;
        self.inner.expirer.set(ExpiryTarget::Id(id), expiry).await
    }

    async fn vorschlag_entfernen(&self, id: u64) -> TandemResult<()> {
        self.inner.vorschlaege.delete(&id.to_string()).await?;
        self.inner.expirer.del(&ExpiryTarget::Id(id)).await
    }

    /// Wartet auf die Antwort der Gegenstelle und abonniert das Session-Topic
    async fn vorschlag_antwort_abwarten(
        &self,
        id: u64,
        rx: AntwortEmpfaenger,
        erwartung: SettleErwartung,
    ) {
        let frist = Duration::from_secs(zeit::FUENF_MINUTEN as u64);
        let ausgang = match self.inner.messenger.warten(id, rx, frist).await {
            Ok(wert) => self.session_topic_vorbereiten(wert, erwartung.clone()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = ausgang {
            tracing::info!(id, fehler = %e, "Vorschlag nicht angenommen");
            if let Err(e) = self.vorschlag_entfernen(id).await {
                tracing::warn!(id, fehler = %e, "Vorschlag nicht entfernt");
            }
            if let Err(e) = self
                .inner
                .crypto
                .delete_key_pair(&erwartung.self_public_key)
                .await
            {
                tracing::warn!(id, fehler = %e, "Schluesselpaar nicht entfernt");
            }
            if let Some((_, tx)) = self.inner.approvals.remove(&id) {
                let _ = tx.send(Err(e));
            }
        }
    }

    async fn session_topic_vorbereiten(
        &self,
        antwort: serde_json::Value,
        erwartung: SettleErwartung,
    ) -> TandemResult<()> {
        let antwort: SessionProposeResult = serde_json::from_value(antwort)?;
        let topic = self
            .inner
            .crypto
            .generate_shared_key(&erwartung.self_public_key, &antwort.responder_public_key, None)
            .await?;
        tracing::debug!(topic = %topic, id = erwartung.proposal_id, "Settle wird erwartet");
        self.inner.settle_erwartet.insert(topic.clone(), erwartung);
        if let Err(e) = self
            .inner
            .relayer
            .subscribe(
                &topic,
                SubscribeOptions {
                    relay: antwort.relay,
                    expiry: None,
                },
            )
            .await
        {
            self.inner.settle_erwartet.remove(&topic);
            self.inner.crypto.delete_sym_key(&topic).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Eingehender Settle auf einem erwarteten Session-Topic
    async fn settle_verarbeiten(&self, topic: &Topic, anfrage: JsonRpcRequest) -> TandemResult<()> {
        let messenger = &self.inner.messenger;
        let Some((_, erwartung)) = self.inner.settle_erwartet.remove(topic) else {
            return messenger
                .fehler_antworten(
                    topic,
                    anfrage.id,
                    JsonRpcError::neu(ErrorCode::Unauthorized, "Kein Settle erwartet"),
                )
                .await;
        };
        let id = erwartung.proposal_id;

        let ergebnis = self.settle_pruefen(topic, &anfrage, &erwartung).await;
        let record = match ergebnis {
            Ok(record) => record,
            Err(fehler) => {
                messenger.fehler_antworten(topic, anfrage.id, fehler.clone()).await?;
                self.vorschlag_entfernen(id).await?;
                self.inner.relayer.unsubscribe(topic).await?;
                self.inner.crypto.delete_sym_key(topic).await?;
                if let Some((_, tx)) = self.inner.approvals.remove(&id) {
                    let _ = tx.send(Err(TandemError::Peer {
                        code: fehler.code,
                        nachricht: fehler.message,
                    }));
                }
                return Ok(());
            }
        };

        self.inner.sessions.einrichten(record.clone()).await?;
        if let Err(e) = self.inner.pairing.activate(&erwartung.pairing_topic).await {
            tracing::warn!(topic = %erwartung.pairing_topic, fehler = %e, "Pairing nicht aktiviert");
        } else {
            let _ = self
                .inner
                .pairing
                .update_metadata(&erwartung.pairing_topic, record.peer_metadata.clone())
                .await;
        }
        messenger.antworten(topic, anfrage.id, true).await?;
        self.vorschlag_entfernen(id).await?;

        tracing::info!(topic = %topic, "Session verbunden");
        let _ = self.inner.events.send(ClientEvent::SessionVerbunden {
            session: record.clone(),
        });
        if let Some((_, tx)) = self.inner.approvals.remove(&id) {
            let _ = tx.send(Ok(record));
        }
        Ok(())
    }

    async fn settle_pruefen(
        &self,
        topic: &Topic,
        anfrage: &JsonRpcRequest,
        erwartung: &SettleErwartung,
    ) -> Result<SessionRecord, JsonRpcError> {
        let params: SessionSettleParams = anfrage
            .params_als()
            .map_err(|e| JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string()))?;

        if self
            .inner
            .vorschlaege
            .get(&erwartung.proposal_id.to_string())
            .await
            .is_err()
        {
            return Err(JsonRpcError::aus_code(ErrorCode::Expired));
        }
        if !params.permissions.umfasst(&erwartung.permissions) {
            return Err(JsonRpcError::neu(
                ErrorCode::InvalidParams,
                "Settle enthaelt nicht alle vorgeschlagenen Berechtigungen",
            ));
        }
        if zeit::ist_abgelaufen(params.expiry) {
            return Err(JsonRpcError::aus_code(ErrorCode::Expired));
        }

        Ok(SessionRecord {
            topic: topic.clone(),
            pairing_topic: erwartung.pairing_topic.clone(),
            relay: params.relay,
            expiry: params.expiry,
            permissions: params.permissions,
            accounts: params.accounts,
            controller: params.controller.public_key,
            is_controller: false,
            self_public_key: erwartung.self_public_key.clone(),
            self_metadata: erwartung.self_metadata.clone(),
            peer_metadata: params.controller.metadata,
            acknowledged: true,
        })
    }

    // -----------------------------------------------------------------------
    // Antworten (Seite B)
    // -----------------------------------------------------------------------

    /// Uebernimmt ein Pairing aus einer URI (ohne Aktivierung)
    pub async fn pair(&self, uri: &str) -> TandemResult<Topic> {
        Ok(self.inner.pairing.pair(uri, false).await?.topic)
    }

    /// Offene eingegangene Vorschlaege
    pub async fn vorschlaege(&self) -> TandemResult<Vec<ProposalRecord>> {
        Ok(self
            .inner
            .vorschlaege
            .values()
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !self.inner.approvals.contains_key(&r.id))
            .collect())
    }

    async fn vorschlag_empfangen(&self, topic: &Topic, anfrage: JsonRpcRequest) -> TandemResult<()> {
        let params: SessionProposeParams = match anfrage.params_als() {
            Ok(p) => p,
            Err(e) => {
                return self
                    .inner
                    .messenger
                    .fehler_antworten(
                        topic,
                        anfrage.id,
                        JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string()),
                    )
                    .await
            }
        };
        let record = ProposalRecord {
            id: anfrage.id,
            pairing_topic: topic.clone(),
            proposer: params.proposer,
            permissions: params.permissions,
            relay: params.relay,
            expiry: zeit::ab_jetzt(zeit::FUENF_MINUTEN),
        };
        self.vorschlag_ablegen(record.clone()).await?;
        tracing::info!(topic = %topic, id = anfrage.id, "Session-Vorschlag eingegangen");
        let _ = self.inner.events.send(ClientEvent::SessionVorschlag {
            id: anfrage.id,
            proposal: record,
        });
        Ok(())
    }

    /// Nimmt einen Vorschlag an
    ///
    /// Die Session ist sofort gespeichert, aber erst nach der Bestaetigung
    /// des Settles durch die Gegenstelle `acknowledged`.
    pub async fn approve(&self, params: ApproveParams) -> TandemResult<Zustimmung> {
        let vorschlag = self.inner.vorschlaege.get(&params.id.to_string()).await?;
        let permissions = params
            .permissions
            .unwrap_or_else(|| vorschlag.permissions.clone());
        permissions.pruefen().map_err(TandemError::Validierung)?;
        if !permissions.umfasst(&vorschlag.permissions) {
            return Err(TandemError::validierung(
                "Zustimmung muss alle vorgeschlagenen Berechtigungen enthalten",
            ));
        }

        let self_public_key = self.inner.crypto.generate_key_pair().await?;
        let topic = self
            .inner
            .crypto
            .generate_shared_key(&self_public_key, &vorschlag.proposer.public_key, None)
            .await?;
        self.inner
            .relayer
            .subscribe(
                &topic,
                SubscribeOptions {
                    relay: vorschlag.relay.clone(),
                    expiry: None,
                },
            )
            .await?;

        self.inner
            .messenger
            .antworten(
                &vorschlag.pairing_topic,
                vorschlag.id,
                SessionProposeResult {
                    relay: vorschlag.relay.clone(),
                    responder_public_key: self_public_key.clone(),
                },
            )
            .await?;

        let controller = Participant {
            public_key: self_public_key.clone(),
            metadata: self.inner.metadata.clone(),
        };
        let record = SessionRecord {
            topic: topic.clone(),
            pairing_topic: vorschlag.pairing_topic.clone(),
            relay: vorschlag.relay.clone(),
            expiry: zeit::ab_jetzt(zeit::SIEBEN_TAGE),
            permissions: permissions.clone(),
            accounts: params.accounts.clone(),
            controller: self_public_key.clone(),
            is_controller: true,
            self_public_key,
            self_metadata: self.inner.metadata.clone(),
            peer_metadata: vorschlag.proposer.metadata.clone(),
            acknowledged: false,
        };
        self.inner.sessions.einrichten(record.clone()).await?;

        let settle = SessionSettleParams {
            relay: record.relay.clone(),
            permissions,
            accounts: params.accounts,
            controller,
            expiry: record.expiry,
        };
        let (settle_id, rx) = self
            .inner
            .messenger
            .senden(&topic, WireMethod::SessionSettle, &settle)
            .await?;
        self.vorschlag_entfernen(vorschlag.id).await?;

        let (tx, acknowledged) = oneshot::channel();
        let engine = self.clone();
        let pairing_topic = vorschlag.pairing_topic;
        tokio::spawn(async move {
            let ergebnis = engine
                .settle_bestaetigung_abwarten(settle_id, rx, &pairing_topic, record)
                .await;
            let _ = tx.send(ergebnis);
        });

        tracing::info!(topic = %topic, id = params.id, "Vorschlag angenommen");
        Ok(Zustimmung { topic, acknowledged })
    }

    async fn settle_bestaetigung_abwarten(
        &self,
        settle_id: u64,
        rx: AntwortEmpfaenger,
        pairing_topic: &Topic,
        record: SessionRecord,
    ) -> TandemResult<SessionRecord> {
        let timeout = self.inner.messenger.anfrage_timeout();
        if let Err(e) = self.inner.messenger.warten(settle_id, rx, timeout).await {
            tracing::warn!(topic = %record.topic, fehler = %e, "Settle nicht bestaetigt");
            self.inner.sessions.loeschen(&record.topic).await?;
            return Err(e);
        }

        let record = self.inner.sessions.bestaetigen(&record.topic).await?;
        if let Err(e) = self.inner.pairing.activate(pairing_topic).await {
            tracing::warn!(topic = %pairing_topic, fehler = %e, "Pairing nicht aktiviert");
        } else {
            let _ = self
                .inner
                .pairing
                .update_metadata(pairing_topic, record.peer_metadata.clone())
                .await;
        }
        tracing::info!(topic = %record.topic, "Session verbunden");
        let _ = self.inner.events.send(ClientEvent::SessionVerbunden {
            session: record.clone(),
        });
        Ok(record)
    }

    /// Lehnt einen Vorschlag ab
    pub async fn reject(&self, id: u64, grund: Option<String>) -> TandemResult<()> {
        let vorschlag = self.inner.vorschlaege.get(&id.to_string()).await?;
        let fehler = match grund {
            Some(text) => JsonRpcError::neu(ErrorCode::UserRejected, text),
            None => JsonRpcError::aus_code(ErrorCode::UserRejected),
        };
        self.inner
            .messenger
            .fehler_antworten(&vorschlag.pairing_topic, id, fehler)
            .await?;
        self.vorschlag_entfernen(id).await?;
        tracing::info!(id, "Vorschlag abgelehnt");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session-Operationen
    // -----------------------------------------------------------------------

    pub async fn update(&self, topic: &Topic, permissions: Permissions) -> TandemResult<SessionRecord> {
        self.inner.sessions.update(topic, permissions).await
    }

    pub async fn extend(&self, topic: &Topic) -> TandemResult<i64> {
        self.inner.sessions.extend(topic).await
    }

    pub async fn request(
        &self,
        topic: &Topic,
        chain_id: &str,
        request: RequestBody,
    ) -> TandemResult<serde_json::Value> {
        self.inner.sessions.request(topic, chain_id, request).await
    }

    pub async fn respond(
        &self,
        topic: &Topic,
        id: u64,
        ergebnis: Result<serde_json::Value, JsonRpcError>,
    ) -> TandemResult<()> {
        self.inner.sessions.respond(topic, id, ergebnis).await
    }

    pub async fn emit(&self, topic: &Topic, chain_id: &str, event: EventBody) -> TandemResult<()> {
        self.inner.sessions.emit(topic, chain_id, event).await
    }

    /// Pingt eine Session oder ein Pairing
    pub async fn ping(&self, topic: &Topic) -> TandemResult<()> {
        if self.inner.sessions.has(topic).await? {
            self.inner.sessions.ping(topic).await
        } else if self.inner.pairing.has(topic).await? {
            self.inner.pairing.ping(topic).await
        } else {
            Err(TandemError::nicht_gefunden(format!(
                "Weder Session noch Pairing: {topic}"
            )))
        }
    }

    /// Trennt eine Session oder ein Pairing
    ///
    /// Lokal wird immer geloescht; bleibt die Bestaetigung der Gegenstelle
    /// aus, kommt danach `Zeitlimit` zurueck.
    pub async fn disconnect(&self, topic: &Topic, grund: Option<DeleteParams>) -> TandemResult<()> {
        if self.inner.sessions.has(topic).await? {
            self.inner
                .sessions
                .disconnect(topic, grund.unwrap_or_else(DeleteParams::benutzer_getrennt))
                .await
        } else if self.inner.pairing.has(topic).await? {
            self.inner.pairing.disconnect(topic).await
        } else {
            Err(TandemError::nicht_gefunden(format!(
                "Weder Session noch Pairing: {topic}"
            )))
        }
    }

    pub async fn find(&self, permissions: &Permissions) -> TandemResult<Vec<SessionRecord>> {
        self.inner.sessions.find(permissions).await
    }

    // -----------------------------------------------------------------------
    // Router
    // -----------------------------------------------------------------------

    /// Verarbeitet eine Zustellung des Relayers
    async fn nachricht_verarbeiten(&self, topic: &Topic, nachricht: &str) -> TandemResult<()> {
        let Some(payload) = self.inner.messenger.entschluesseln(topic, nachricht) else {
            return Ok(());
        };

        let anfrage = match payload {
            JsonRpcPayload::Response(antwort) => {
                self.inner.messenger.antwort_zustellen(topic, antwort).await;
                return Ok(());
            }
            JsonRpcPayload::Request(anfrage) => anfrage,
        };

        let methode = WireMethod::parsen(&anfrage.method);
        tracing::debug!(topic = %topic, id = anfrage.id, methode = %methode, "Anfrage empfangen");

        if self.inner.pairing.has(topic).await? {
            match methode {
                WireMethod::SessionPropose => self.vorschlag_empfangen(topic, anfrage).await,
                _ => self.inner.pairing.anfrage_verarbeiten(topic, anfrage).await,
            }
        } else if methode == WireMethod::SessionSettle {
            self.settle_verarbeiten(topic, anfrage).await
        } else if self.inner.sessions.kennt(topic) {
            self.inner.sessions.anfrage_verarbeiten(topic, anfrage).await
        } else {
            tracing::warn!(topic = %topic, methode = %methode, "Anfrage auf unbekanntem Topic");
            Ok(())
        }
    }

    /// Reagiert auf einen abgelaufenen Timer
    async fn ablauf_verarbeiten(&self, ziel: &ExpiryTarget) -> TandemResult<()> {
        match ziel {
            ExpiryTarget::Topic(topic) => {
                if self.inner.sessions.kennt(topic) {
                    self.inner.sessions.abgelaufen(topic).await
                } else if self.inner.pairing.kennt(topic) {
                    self.inner.pairing.abgelaufen(topic).await
                } else {
                    // Weder Pairing noch Session bekannt: Reste aufraeumen
                    self.inner.pairing.loeschen(topic).await
                }
            }
            ExpiryTarget::Id(id) => {
                self.inner.vorschlaege.delete(&id.to_string()).await?;
                self.inner
                    .settle_erwartet
                    .retain(|_, e| e.proposal_id != *id);
                if let Some((_, tx)) = self.inner.approvals.remove(id) {
                    let _ = tx.send(Err(TandemError::Abgelaufen(format!("Vorschlag {id}"))));
                }
                tracing::debug!(id, "Vorschlag abgelaufen");
                let _ = self
                    .inner
                    .events
                    .send(ClientEvent::VorschlagAbgelaufen { id: *id });
                Ok(())
            }
        }
    }
}
