//! Session – langlebige, berechtigte Verbindung zwischen zwei Clients
//!
//! Eine Session entsteht aus einem angenommenen Vorschlag (siehe
//! `engine`). Berechtigungen duerfen nur erweitert werden; Aenderungen
//! und Verlaengerungen darf nur der Controller anstossen.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tandem_core::{zeit, ExpiryTarget, TandemError, TandemResult, Topic};
use tandem_protocol::params::{
    DeleteParams, EventBody, RequestBody, SessionEventParams, SessionExtendParams,
    SessionRequestParams, SessionUpdateParams,
};
use tandem_protocol::{
    ErrorCode, JsonRpcError, JsonRpcRequest, Metadata, Permissions, RelayOptions, WireMethod,
};
use tokio::sync::broadcast;

use crate::crypto::Crypto;
use crate::events::ClientEvent;
use crate::expirer::Expirer;
use crate::messenger::Messenger;
use crate::relayer::Relayer;
use crate::storage::KeyValueStorage;
use crate::store::{Ablaufend, Store};

/// Persistierter Session-Datensatz
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub topic: Topic,
    pub pairing_topic: Topic,
    pub relay: RelayOptions,
    pub expiry: i64,
    pub permissions: Permissions,
    pub accounts: Vec<String>,
    /// Oeffentlicher Schluessel des Controllers
    pub controller: String,
    pub is_controller: bool,
    /// Eigener oeffentlicher Schluessel dieser Session
    pub self_public_key: String,
    pub self_metadata: Metadata,
    pub peer_metadata: Metadata,
    pub acknowledged: bool,
}

impl Ablaufend for SessionRecord {
    fn ablauf(&self) -> Option<i64> {
        Some(self.expiry)
    }
}

/// Session-Verwaltung
#[derive(Clone)]
pub struct Sessions {
    inner: Arc<SessionsInner>,
}

struct SessionsInner {
    eintraege: Store<SessionRecord>,
    crypto: Crypto,
    relayer: Relayer,
    messenger: Messenger,
    expirer: Expirer,
    events: broadcast::Sender<ClientEvent>,
}

fn unautorisiert(nachricht: impl Into<String>) -> JsonRpcError {
    JsonRpcError::neu(ErrorCode::Unauthorized, nachricht)
}

impl Sessions {
    pub fn neu(
        speicher: Arc<dyn KeyValueStorage>,
        schluessel: impl Into<String>,
        crypto: Crypto,
        relayer: Relayer,
        messenger: Messenger,
        expirer: Expirer,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionsInner {
                eintraege: Store::mit_nachlass(speicher, "Session", schluessel),
                crypto,
                relayer,
                messenger,
                expirer,
                events,
            }),
        }
    }

    /// Laedt persistierte Sessions; abgelaufene werden samt Schluessel verworfen
    pub async fn init(&self) -> TandemResult<()> {
        for key in self.inner.eintraege.init().await? {
            if let Some(record) = self.inner.eintraege.delete(&key).await? {
                self.inner
                    .crypto
                    .delete_key_pair(&record.self_public_key)
                    .await?;
            }
            let Ok(topic) = Topic::neu(&key) else { continue };
            self.inner.crypto.delete_sym_key(&topic).await?;
            self.inner.expirer.del(&ExpiryTarget::Topic(topic)).await?;
        }
        Ok(())
    }

    /// Speichert eine neue Session und startet ihren Ablauf-Timer
    ///
    /// Das Topic muss bereits abonniert sein.
    pub async fn einrichten(&self, record: SessionRecord) -> TandemResult<()> {
        let topic = record.topic.clone();
        let expiry = record.expiry;
        self.inner.eintraege.set(topic.as_str(), record).await?;
        self.inner
            .expirer
            .set(ExpiryTarget::Topic(topic), expiry)
            .await
    }

    /// Markiert die Session als von der Gegenstelle bestaetigt
    pub async fn bestaetigen(&self, topic: &Topic) -> TandemResult<SessionRecord> {
        self.inner
            .eintraege
            .update(topic.as_str(), |r| r.acknowledged = true)
            .await
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub async fn get(&self, topic: &Topic) -> TandemResult<SessionRecord> {
        self.inner.eintraege.get(topic.as_str()).await
    }

    pub async fn has(&self, topic: &Topic) -> TandemResult<bool> {
        self.inner.eintraege.has(topic.as_str()).await
    }

    /// Gibt true zurueck wenn ein Datensatz existiert, auch wenn er abgelaufen ist
    pub fn kennt(&self, topic: &Topic) -> bool {
        self.inner.eintraege.kennt(topic.as_str())
    }

    pub async fn list(&self) -> TandemResult<Vec<SessionRecord>> {
        Ok(self
            .inner
            .eintraege
            .values()
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    /// Alle bestaetigten Sessions, deren Berechtigungen `gesucht` umfassen
    pub async fn find(&self, gesucht: &Permissions) -> TandemResult<Vec<SessionRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.acknowledged && s.permissions.umfasst(gesucht))
            .collect())
    }

    async fn als_controller(&self, topic: &Topic) -> TandemResult<SessionRecord> {
        let record = self.get(topic).await?;
        if !record.is_controller {
            return Err(TandemError::NichtAutorisiert(format!(
                "Nur der Controller darf Session {topic} aendern"
            )));
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Peer-Operationen
    // -----------------------------------------------------------------------

    /// Erweitert die Berechtigungen (nur hinzufuegen)
    pub async fn update(&self, topic: &Topic, permissions: Permissions) -> TandemResult<SessionRecord> {
        let record = self.als_controller(topic).await?;
        permissions.pruefen().map_err(TandemError::Validierung)?;
        if !permissions.umfasst(&record.permissions) {
            return Err(TandemError::validierung(
                "Berechtigungen duerfen nur erweitert werden",
            ));
        }

        self.inner
            .messenger
            .anfrage(
                topic,
                WireMethod::SessionUpdate,
                SessionUpdateParams {
                    permissions: permissions.clone(),
                },
            )
            .await?;

        let record = self
            .inner
            .eintraege
            .update(topic.as_str(), |r| r.permissions = permissions)
            .await?;
        let _ = self.inner.events.send(ClientEvent::SessionAktualisiert {
            topic: topic.clone(),
            session: record.clone(),
        });
        Ok(record)
    }

    /// Verlaengert die Session auf jetzt + 7 Tage
    pub async fn extend(&self, topic: &Topic) -> TandemResult<i64> {
        self.als_controller(topic).await?;
        let expiry = zeit::ab_jetzt(zeit::SIEBEN_TAGE);

        self.inner
            .messenger
            .anfrage(topic, WireMethod::SessionExtend, SessionExtendParams { expiry })
            .await?;

        self.ablauf_setzen(topic, expiry).await?;
        let _ = self.inner.events.send(ClientEvent::SessionVerlaengert {
            topic: topic.clone(),
            expiry,
        });
        Ok(expiry)
    }

    async fn ablauf_setzen(&self, topic: &Topic, expiry: i64) -> TandemResult<()> {
        self.inner
            .eintraege
            .update(topic.as_str(), |r| r.expiry = expiry)
            .await?;
        self.inner
            .expirer
            .set(ExpiryTarget::Topic(topic.clone()), expiry)
            .await
    }

    /// Sendet eine Anfrage an die Gegenstelle und wartet auf die Antwort
    pub async fn request(
        &self,
        topic: &Topic,
        chain_id: &str,
        request: RequestBody,
    ) -> TandemResult<Value> {
        let record = self.get(topic).await?;
        if !record.permissions.chains.contains(chain_id) {
            return Err(TandemError::NichtAutorisiert(format!(
                "Chain '{chain_id}' nicht freigegeben"
            )));
        }
        if !record.permissions.methods.contains(&request.method) {
            return Err(TandemError::NichtAutorisiert(format!(
                "Methode '{}' nicht freigegeben",
                request.method
            )));
        }
        self.inner
            .messenger
            .anfrage(
                topic,
                WireMethod::SessionRequest,
                SessionRequestParams {
                    chain_id: chain_id.to_string(),
                    request,
                },
            )
            .await
    }

    /// Beantwortet eine Anfrage der Gegenstelle
    pub async fn respond(
        &self,
        topic: &Topic,
        id: u64,
        ergebnis: Result<Value, JsonRpcError>,
    ) -> TandemResult<()> {
        self.get(topic).await?;
        match ergebnis {
            Ok(wert) => self.inner.messenger.antworten(topic, id, wert).await,
            Err(fehler) => self.inner.messenger.fehler_antworten(topic, id, fehler).await,
        }
    }

    /// Sendet ein Ereignis; die Bestaetigung wird nicht abgewartet
    pub async fn emit(&self, topic: &Topic, chain_id: &str, event: EventBody) -> TandemResult<()> {
        let record = self.get(topic).await?;
        if !record.permissions.events.contains(&event.name) {
            return Err(TandemError::NichtAutorisiert(format!(
                "Ereignis '{}' nicht freigegeben",
                event.name
            )));
        }
        self.inner
            .messenger
            .senden(
                topic,
                WireMethod::SessionEvent,
                SessionEventParams {
                    chain_id: chain_id.to_string(),
                    event,
                },
            )
            .await
            .map(|_| ())
    }

    pub async fn ping(&self, topic: &Topic) -> TandemResult<()> {
        self.get(topic).await?;
        self.inner
            .messenger
            .anfrage(topic, WireMethod::SessionPing, json!({}))
            .await
            .map(|_| ())
    }

    /// Beendet die Session
    ///
    /// Lokal wird in jedem Fall geloescht, auch wenn die Gegenstelle nicht
    /// antwortet. Ihr Zeitlimit oder Fehler wird danach zurueckgegeben.
    pub async fn disconnect(&self, topic: &Topic, grund: DeleteParams) -> TandemResult<()> {
        self.get(topic).await?;
        let antwort = self
            .inner
            .messenger
            .anfrage(topic, WireMethod::SessionDelete, grund)
            .await;
        if let Err(e) = &antwort {
            tracing::warn!(topic = %topic, fehler = %e, "Gegenstelle hat Trennung nicht bestaetigt");
        }
        self.loeschen(topic).await?;
        let _ = self
            .inner
            .events
            .send(ClientEvent::SessionGeloescht { topic: topic.clone() });
        antwort.map(|_| ())
    }

    /// Entfernt eine Session lokal: Subscription, Schluessel, Datensatz
    pub async fn loeschen(&self, topic: &Topic) -> TandemResult<()> {
        if let Err(e) = self.inner.relayer.unsubscribe(topic).await {
            tracing::warn!(topic = %topic, fehler = %e, "Unsubscribe beim Loeschen fehlgeschlagen");
        }
        self.inner.crypto.delete_sym_key(topic).await?;
        if let Some(record) = self.inner.eintraege.delete(topic.as_str()).await? {
            self.inner
                .crypto
                .delete_key_pair(&record.self_public_key)
                .await?;
        }
        self.inner
            .expirer
            .del(&ExpiryTarget::Topic(topic.clone()))
            .await?;
        self.inner.messenger.topic_vergessen(topic).await?;
        tracing::info!(topic = %topic, "Session geloescht");
        Ok(())
    }

    /// Reagiert auf einen abgelaufenen Timer
    pub async fn abgelaufen(&self, topic: &Topic) -> TandemResult<()> {
        self.loeschen(topic).await?;
        let _ = self
            .inner
            .events
            .send(ClientEvent::SessionAbgelaufen { topic: topic.clone() });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Eingehende Anfragen
    // -----------------------------------------------------------------------

    /// Verarbeitet eine eingehende Anfrage auf einem Session-Topic
    pub async fn anfrage_verarbeiten(&self, topic: &Topic, anfrage: JsonRpcRequest) -> TandemResult<()> {
        let record = match self.get(topic).await {
            Ok(r) => r,
            Err(e) if e.ist_abgelaufen() => {
                return self
                    .inner
                    .messenger
                    .fehler_antworten(topic, anfrage.id, JsonRpcError::aus_code(ErrorCode::Expired))
                    .await;
            }
            Err(e) => return Err(e),
        };

        let ausgang = match WireMethod::parsen(&anfrage.method) {
            WireMethod::SessionUpdate => self.update_empfangen(&record, &anfrage).await?,
            WireMethod::SessionExtend => self.extend_empfangen(&record, &anfrage).await?,
            WireMethod::SessionDelete => {
                self.inner.messenger.antworten(topic, anfrage.id, true).await?;
                self.loeschen(topic).await?;
                let _ = self
                    .inner
                    .events
                    .send(ClientEvent::SessionGeloescht { topic: topic.clone() });
                return Ok(());
            }
            WireMethod::SessionPing => {
                let _ = self
                    .inner
                    .events
                    .send(ClientEvent::SessionPing { topic: topic.clone() });
                Some(Ok(Value::Bool(true)))
            }
            WireMethod::SessionRequest => self.request_empfangen(&record, &anfrage)?,
            WireMethod::SessionEvent => self.event_empfangen(&record, &anfrage)?,
            andere => Some(Err(JsonRpcError::neu(
                ErrorCode::MethodNotFound,
                format!("Unbekannte Methode: {andere}"),
            ))),
        };

        match ausgang {
            Some(Ok(wert)) => self.inner.messenger.antworten(topic, anfrage.id, wert).await,
            Some(Err(fehler)) => {
                tracing::debug!(topic = %topic, code = fehler.code, "Anfrage abgelehnt");
                self.inner
                    .messenger
                    .fehler_antworten(topic, anfrage.id, fehler)
                    .await
            }
            // Antwort kommt spaeter von der Anwendung
            None => Ok(()),
        }
    }

    async fn update_empfangen(
        &self,
        record: &SessionRecord,
        anfrage: &JsonRpcRequest,
    ) -> TandemResult<Option<Result<Value, JsonRpcError>>> {
        if record.is_controller {
            return Ok(Some(Err(unautorisiert("Gegenstelle ist nicht Controller"))));
        }
        let params: SessionUpdateParams = match anfrage.params_als() {
            Ok(p) => p,
            Err(e) => return Ok(Some(Err(JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string())))),
        };
        if params.permissions.pruefen().is_err() || !params.permissions.umfasst(&record.permissions) {
            return Ok(Some(Err(JsonRpcError::neu(
                ErrorCode::InvalidParams,
                "Berechtigungen duerfen nur erweitert werden",
            ))));
        }
        let neu = self
            .inner
            .eintraege
            .update(record.topic.as_str(), |r| r.permissions = params.permissions)
            .await?;
        let _ = self.inner.events.send(ClientEvent::SessionAktualisiert {
            topic: record.topic.clone(),
            session: neu,
        });
        Ok(Some(Ok(Value::Bool(true))))
    }

    async fn extend_empfangen(
        &self,
        record: &SessionRecord,
        anfrage: &JsonRpcRequest,
    ) -> TandemResult<Option<Result<Value, JsonRpcError>>> {
        if record.is_controller {
            return Ok(Some(Err(unautorisiert("Gegenstelle ist nicht Controller"))));
        }
        let params: SessionExtendParams = match anfrage.params_als() {
            Ok(p) => p,
            Err(e) => return Ok(Some(Err(JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string())))),
        };
        let grenze = zeit::ab_jetzt(zeit::SIEBEN_TAGE) + 60;
        if params.expiry <= zeit::jetzt_sek() || params.expiry > grenze {
            return Ok(Some(Err(JsonRpcError::neu(
                ErrorCode::InvalidParams,
                "Ungueltiger Ablaufzeitpunkt",
            ))));
        }
        self.ablauf_setzen(&record.topic, params.expiry).await?;
        let _ = self.inner.events.send(ClientEvent::SessionVerlaengert {
            topic: record.topic.clone(),
            expiry: params.expiry,
        });
        Ok(Some(Ok(Value::Bool(true))))
    }

    fn request_empfangen(
        &self,
        record: &SessionRecord,
        anfrage: &JsonRpcRequest,
    ) -> TandemResult<Option<Result<Value, JsonRpcError>>> {
        let params: SessionRequestParams = match anfrage.params_als() {
            Ok(p) => p,
            Err(e) => return Ok(Some(Err(JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string())))),
        };
        if !record.permissions.chains.contains(&params.chain_id)
            || !record.permissions.methods.contains(&params.request.method)
        {
            return Ok(Some(Err(unautorisiert(format!(
                "Methode '{}' auf '{}' nicht freigegeben",
                params.request.method, params.chain_id
            )))));
        }
        let _ = self.inner.events.send(ClientEvent::SessionAnfrage {
            topic: record.topic.clone(),
            id: anfrage.id,
            chain_id: params.chain_id,
            request: params.request,
        });
        Ok(None)
    }

    fn event_empfangen(
        &self,
        record: &SessionRecord,
        anfrage: &JsonRpcRequest,
    ) -> TandemResult<Option<Result<Value, JsonRpcError>>> {
        let params: SessionEventParams = match anfrage.params_als() {
            Ok(p) => p,
            Err(e) => return Ok(Some(Err(JsonRpcError::neu(ErrorCode::InvalidParams, e.to_string())))),
        };
        if !record.permissions.events.contains(&params.event.name) {
            return Ok(Some(Err(unautorisiert(format!(
                "Ereignis '{}' nicht freigegeben",
                params.event.name
            )))));
        }
        let _ = self.inner.events.send(ClientEvent::SessionEreignis {
            topic: record.topic.clone(),
            chain_id: params.chain_id,
            event: params.event,
        });
        Ok(Some(Ok(Value::Bool(true))))
    }
}
