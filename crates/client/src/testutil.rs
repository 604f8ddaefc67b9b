//! Test-Hilfen: Transport ohne Netzwerk

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tandem_core::{TandemError, TandemResult};
use tandem_protocol::{JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};
use tokio::sync::broadcast;

use crate::transport::{RelayTransport, TransportEvent};

/// Transport, der Relay-RPCs selbst beantwortet
///
/// `subscribe` liefert fortlaufende Ids, `publish` und `unsubscribe`
/// liefern `true`. Mit `antworten_aus()` bleiben Anfragen unbeantwortet.
pub(crate) struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    verbunden: AtomicBool,
    antworten: AtomicBool,
    zaehler: AtomicU64,
    anfragen: Mutex<Vec<JsonRpcRequest>>,
    antworten_gesendet: Mutex<Vec<JsonRpcResponse>>,
}

impl MockTransport {
    pub(crate) fn neu() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            verbunden: AtomicBool::new(false),
            antworten: AtomicBool::new(true),
            zaehler: AtomicU64::new(0),
            anfragen: Mutex::new(Vec::new()),
            antworten_gesendet: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn verbinden(&self) {
        self.verbunden.store(true, Ordering::Release);
        let _ = self.events.send(TransportEvent::Verbunden);
    }

    pub(crate) fn trennen(&self) {
        self.verbunden.store(false, Ordering::Release);
        let _ = self.events.send(TransportEvent::Getrennt);
    }

    pub(crate) fn antworten_aus(&self) {
        self.antworten.store(false, Ordering::Release);
    }

    pub(crate) fn antworten_an(&self) {
        self.antworten.store(true, Ordering::Release);
    }

    /// Speist einen Rahmen ein, als kaeme er vom Relay
    pub(crate) fn einspeisen(&self, wert: Value) {
        let _ = self
            .events
            .send(TransportEvent::Nachricht(wert.to_string()));
    }

    /// Methoden aller gesendeten Anfragen in Reihenfolge
    pub(crate) fn methoden(&self) -> Vec<String> {
        self.anfragen.lock().iter().map(|a| a.method.clone()).collect()
    }

    pub(crate) fn anfragen(&self) -> Vec<JsonRpcRequest> {
        self.anfragen.lock().clone()
    }

    /// Antworten des Clients auf Anfragen des Relays
    pub(crate) fn antworten(&self) -> Vec<JsonRpcResponse> {
        self.antworten_gesendet.lock().clone()
    }

    fn beantworten(&self, anfrage: &JsonRpcRequest) {
        let ergebnis = match anfrage.method.as_str() {
            "subscribe" => {
                let n = self.zaehler.fetch_add(1, Ordering::Relaxed);
                json!(format!("sub-{n}"))
            }
            _ => json!(true),
        };
        let antwort = JsonRpcResponse::ergebnis(anfrage.id, ergebnis);
        if let Ok(text) = serde_json::to_string(&antwort) {
            let _ = self.events.send(TransportEvent::Nachricht(text));
        }
    }
}

#[async_trait]
impl RelayTransport for MockTransport {
    async fn connect(&self) -> TandemResult<()> {
        self.verbinden();
        Ok(())
    }

    async fn disconnect(&self) -> TandemResult<()> {
        self.trennen();
        Ok(())
    }

    async fn send(&self, text: String) -> TandemResult<()> {
        if !self.verbunden.load(Ordering::Acquire) {
            return Err(TandemError::Transport("Nicht verbunden".into()));
        }
        match JsonRpcPayload::parsen(&text) {
            Ok(JsonRpcPayload::Request(anfrage)) => {
                self.anfragen.lock().push(anfrage.clone());
                if self.antworten.load(Ordering::Acquire) {
                    self.beantworten(&anfrage);
                }
            }
            Ok(JsonRpcPayload::Response(antwort)) => {
                self.antworten_gesendet.lock().push(antwort);
            }
            Err(e) => return Err(TandemError::Protokoll(e.to_string())),
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.verbunden.load(Ordering::Acquire)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
