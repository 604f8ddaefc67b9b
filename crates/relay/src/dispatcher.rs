//! Dispatcher – Verarbeitet eingehende Text-Frames einer Verbindung
//!
//! - JSON-RPC-Anfragen: `publish`, `subscribe`, `unsubscribe`
//! - Legacy-Nachrichten: `pub`, `sub`, `ack`
//! - Antworten der Clients auf `subscription`-Zustellungen werden verworfen
//! - Alles andere bekommt einen JSON-RPC-Parse-Fehler
//!
//! Antworten laufen ueber dieselbe Queue wie Zustellungen, damit die
//! Reihenfolge auf der Leitung der Reihenfolge in der Registry entspricht.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tandem_protocol::legacy::{LegacyMessage, LegacyTyp};
use tandem_protocol::relay::{
    PublishParams, RelayMethod, SubscribeParams, UnsubscribeParams, STANDARD_TTL_SEK,
};
use tandem_protocol::{JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};

use crate::error::{RelayError, RelayResult};
use crate::registry::{ConnectionId, Zustellformat};
use crate::server::RelayState;

/// Id fuer Fehlerantworten, wenn die Anfrage keine lesbare Id hat
const OHNE_ID: u64 = 0;

/// Verarbeitet Nachrichten einer einzelnen Verbindung
pub struct Dispatcher {
    state: RelayState,
    verbindung: ConnectionId,
}

impl Dispatcher {
    pub fn neu(state: RelayState, verbindung: ConnectionId) -> Self {
        Self { state, verbindung }
    }

    /// Verarbeitet einen Text-Frame
    pub async fn verarbeiten(&self, text: &str) {
        let wert: Value = match serde_json::from_str(text) {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(verbindung = %self.verbindung, fehler = %e, "Kein JSON");
                self.fehler_senden(OHNE_ID, RelayError::Parse(e.to_string())).await;
                return;
            }
        };

        if LegacyMessage::ist_legacy(&wert) {
            self.legacy(wert).await;
            return;
        }

        if wert.get("jsonrpc").is_none() {
            self.fehler_senden(
                OHNE_ID,
                RelayError::Parse("Unbekanntes Nachrichtenformat".into()),
            )
            .await;
            return;
        }

        let id = wert.get("id").and_then(Value::as_u64).unwrap_or(OHNE_ID);
        match JsonRpcPayload::aus_wert(wert) {
            Ok(JsonRpcPayload::Request(anfrage)) => match self.anfrage(&anfrage).await {
                Ok(Some(ergebnis)) => {
                    self.antwort_senden(JsonRpcResponse::ergebnis(anfrage.id, ergebnis))
                        .await
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(
                        verbindung = %self.verbindung,
                        methode = %anfrage.method,
                        fehler = %e,
                        "Anfrage abgelehnt"
                    );
                    self.fehler_senden(anfrage.id, e).await;
                }
            },
            Ok(JsonRpcPayload::Response(antwort)) => {
                tracing::trace!(verbindung = %self.verbindung, id = antwort.id, "Zustellung bestaetigt");
            }
            Err(e) => {
                self.fehler_senden(id, RelayError::UngueltigeAnfrage(e.to_string()))
                    .await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // JSON-RPC
    // -----------------------------------------------------------------------

    /// Fuehrt eine Anfrage aus; `None` heisst, die Antwort ist schon raus
    async fn anfrage(&self, anfrage: &JsonRpcRequest) -> RelayResult<Option<Value>> {
        match RelayMethod::parsen(&anfrage.method) {
            Some(RelayMethod::Publish) => {
                let p: PublishParams = params(anfrage)?;
                self.publish(p).await.map(Some)
            }
            Some(RelayMethod::Subscribe) => {
                let p: SubscribeParams = params(anfrage)?;
                let id = anfrage.id;
                self.state
                    .registry
                    .abonnieren(
                        self.verbindung,
                        p.topic.as_str(),
                        Zustellformat::JsonRpc,
                        |sub_id| {
                            serde_json::to_string(&JsonRpcResponse::ergebnis(id, json!(sub_id))).ok()
                        },
                    )
                    .await?;
                Ok(None)
            }
            Some(RelayMethod::Unsubscribe) => {
                let p: UnsubscribeParams = params(anfrage)?;
                self.state
                    .registry
                    .abbestellen(self.verbindung, p.topic.as_str(), Some(&p.id))
                    .await;
                Ok(Some(json!(true)))
            }
            Some(RelayMethod::Subscription) | None => {
                Err(RelayError::UnbekannteMethode(anfrage.method.clone()))
            }
        }
    }

    async fn publish(&self, p: PublishParams) -> RelayResult<Value> {
        let topic = p.topic.as_str();
        let ttl = Duration::from_secs(p.ttl);
        if ttl > self.state.config.max_ttl {
            return Err(RelayError::parameter(format!(
                "ttl {} ueberschreitet Maximum {}",
                p.ttl,
                self.state.config.max_ttl.as_secs()
            )));
        }
        let ergebnis = self
            .state
            .registry
            .veroeffentlichen(self.verbindung, topic, &p.message, ttl)
            .await?;
        self.state.webhooks.benachrichtigen(topic, &p.message);

        tracing::debug!(
            verbindung = %self.verbindung,
            topic = %topic,
            zugestellt = ergebnis.zugestellt,
            backlog = ergebnis.zurueckgehalten,
            "publish"
        );
        Ok(json!(true))
    }

    // -----------------------------------------------------------------------
    // Legacy
    // -----------------------------------------------------------------------

    async fn legacy(&self, wert: Value) {
        let nachricht: LegacyMessage = match serde_json::from_value(wert) {
            Ok(n) => n,
            Err(e) => {
                self.fehler_senden(OHNE_ID, RelayError::parameter(e.to_string()))
                    .await;
                return;
            }
        };

        let ergebnis = match nachricht.typ {
            LegacyTyp::Pub => self
                .state
                .registry
                .veroeffentlichen(
                    self.verbindung,
                    &nachricht.topic,
                    &nachricht.payload,
                    Duration::from_secs(STANDARD_TTL_SEK),
                )
                .await
                .map(|_| {
                    if !nachricht.silent {
                        self.state
                            .webhooks
                            .benachrichtigen(&nachricht.topic, &nachricht.payload);
                    }
                }),
            LegacyTyp::Sub => self
                .state
                .registry
                .abonnieren(self.verbindung, &nachricht.topic, Zustellformat::Legacy, |_| None)
                .await
                .map(|_| ()),
            LegacyTyp::Ack => {
                tracing::trace!(verbindung = %self.verbindung, topic = %nachricht.topic, "Legacy-Ack");
                Ok(())
            }
        };

        if let Err(e) = ergebnis {
            tracing::warn!(
                verbindung = %self.verbindung,
                topic = %nachricht.topic,
                fehler = %e,
                "Legacy-Nachricht fehlgeschlagen"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Antworten
    // -----------------------------------------------------------------------

    async fn antwort_senden(&self, antwort: JsonRpcResponse) {
        match serde_json::to_string(&antwort) {
            Ok(text) => {
                self.state.registry.senden(self.verbindung, text).await;
            }
            Err(e) => {
                tracing::error!(verbindung = %self.verbindung, fehler = %e, "Antwort nicht serialisierbar");
            }
        }
    }

    async fn fehler_senden(&self, id: u64, fehler: RelayError) {
        self.antwort_senden(JsonRpcResponse::fehler(id, fehler.als_jsonrpc()))
            .await;
    }
}

fn params<T: DeserializeOwned>(anfrage: &JsonRpcRequest) -> RelayResult<T> {
    anfrage
        .params_als()
        .map_err(|e| RelayError::parameter(e.to_string()))
}
