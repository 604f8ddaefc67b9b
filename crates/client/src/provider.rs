//! JSON-RPC-Provider – Anfrage/Antwort-Zuordnung ueber den Relay-Transport
//!
//! Ausgehende Anfragen werden unter ihrer Id registriert und warten auf die
//! passende Antwort oder ein Zeitlimit. Eingehende Anfragen des Relays
//! (`subscription`) werden als `ProviderEvent::Anfrage` weitergereicht.
//! Reisst die Verbindung ab, schlagen alle offenen Anfragen sofort fehl.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_core::{TandemError, TandemResult};
use tandem_protocol::{JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::transport::{RelayTransport, TransportEvent};

/// Kapazitaet des Ereigniskanals
const EVENT_KAPAZITAET: usize = 1024;

/// Ereignisse des Providers
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Verbunden,
    Getrennt,
    /// Anfrage vom Relay an den Client
    Anfrage(JsonRpcRequest),
}

/// JSON-RPC ueber einen `RelayTransport`
#[derive(Clone)]
pub struct JsonRpcProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    transport: Arc<dyn RelayTransport>,
    ausstehend: DashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    events: broadcast::Sender<ProviderEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl JsonRpcProvider {
    /// Erstellt den Provider und startet den Lese-Task
    pub fn neu(transport: Arc<dyn RelayTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_KAPAZITAET);
        let provider = Self {
            inner: Arc::new(ProviderInner {
                transport,
                ausstehend: DashMap::new(),
                events,
                task: Mutex::new(None),
            }),
        };
        provider.lesen_starten();
        provider
    }

    fn lesen_starten(&self) {
        let mut transport_rx = self.inner.transport.events();
        let schwach: Weak<ProviderInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let ereignis = match transport_rx.recv().await {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Provider hinkt dem Transport hinterher");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = schwach.upgrade() else { break };
                JsonRpcProvider { inner }.ereignis_verarbeiten(ereignis);
            }
        });
        *self.inner.task.lock() = Some(task);
    }

    fn ereignis_verarbeiten(&self, ereignis: TransportEvent) {
        match ereignis {
            TransportEvent::Verbunden => {
                let _ = self.inner.events.send(ProviderEvent::Verbunden);
            }
            TransportEvent::Getrennt => {
                // Offene Anfragen abbrechen: Sender fallen lassen
                let offen = self.inner.ausstehend.len();
                self.inner.ausstehend.clear();
                if offen > 0 {
                    tracing::debug!(offen, "Offene Relay-Anfragen nach Trennung verworfen");
                }
                let _ = self.inner.events.send(ProviderEvent::Getrennt);
            }
            TransportEvent::Nachricht(text) => match JsonRpcPayload::parsen(&text) {
                Ok(JsonRpcPayload::Response(antwort)) => {
                    match self.inner.ausstehend.remove(&antwort.id) {
                        Some((_, tx)) => {
                            let _ = tx.send(antwort);
                        }
                        None => {
                            tracing::debug!(id = antwort.id, "Antwort ohne offene Anfrage");
                        }
                    }
                }
                Ok(JsonRpcPayload::Request(anfrage)) => {
                    let _ = self.inner.events.send(ProviderEvent::Anfrage(anfrage));
                }
                Err(e) => {
                    tracing::warn!(fehler = %e, "Ungueltige Nachricht vom Relay");
                }
            },
        }
    }

    /// Abonniert Provider-Ereignisse
    pub fn abonnieren(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn RelayTransport> {
        &self.inner.transport
    }

    pub async fn connect(&self) -> TandemResult<()> {
        self.inner.transport.connect().await
    }

    pub async fn disconnect(&self) -> TandemResult<()> {
        self.inner.transport.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Sendet eine Anfrage und wartet auf die Antwort
    ///
    /// Fehlerantworten werden zu `TandemError::Peer`.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> TandemResult<Value> {
        let anfrage = JsonRpcRequest::neu(method, params);
        let id = anfrage.id;
        let (tx, rx) = oneshot::channel();
        self.inner.ausstehend.insert(id, tx);

        if let Err(e) = self.senden(&anfrage).await {
            self.inner.ausstehend.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(antwort)) => antwort.in_result().map_err(|e| TandemError::Peer {
                code: e.code,
                nachricht: e.message,
            }),
            Ok(Err(_)) => Err(TandemError::Transport(format!(
                "Verbindung waehrend '{method}' getrennt"
            ))),
            Err(_) => {
                self.inner.ausstehend.remove(&id);
                Err(TandemError::Zeitlimit(format!("Relay-Anfrage '{method}'")))
            }
        }
    }

    /// Sendet eine Anfrage ohne auf die Antwort zu warten
    pub async fn notify(&self, method: &str, params: Value) -> TandemResult<u64> {
        let anfrage = JsonRpcRequest::neu(method, params);
        self.senden(&anfrage).await?;
        Ok(anfrage.id)
    }

    /// Beantwortet eine Anfrage des Relays
    pub async fn respond(&self, antwort: &JsonRpcResponse) -> TandemResult<()> {
        let text = serde_json::to_string(antwort)?;
        self.inner.transport.send(text).await
    }

    async fn senden(&self, anfrage: &JsonRpcRequest) -> TandemResult<()> {
        let text = serde_json::to_string(anfrage)?;
        tracing::trace!(id = anfrage.id, methode = %anfrage.method, "Relay-Anfrage");
        self.inner.transport.send(text).await
    }
}
