//! Relay-Transport – Textrahmen zum Relay und zurueck
//!
//! Das `RelayTransport`-Trait trennt den Relayer von der konkreten
//! Verbindung. `WebSocketTransport` verbindet sich per tokio-tungstenite
//! und baut abgerissene Verbindungen mit exponentiellem Backoff neu auf.
//!
//! ## Ereignisse
//! ```text
//! connect() -> Verbunden -> Nachricht* -> Getrennt -> (Backoff) -> Verbunden ...
//!                                             |
//!                     disconnect() -----------+--> Ende
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{TandemError, TandemResult};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Kapazitaet des Ereigniskanals
const EVENT_KAPAZITAET: usize = 1024;
/// Start-Wartezeit des Backoffs
const BACKOFF_START: Duration = Duration::from_millis(100);
/// Zeitlimit fuer den Verbindungsaufbau
const VERBINDUNGS_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ereignisse eines Transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Verbunden,
    Getrennt,
    /// Eingehender Textrahmen
    Nachricht(String),
}

/// Verbindung zum Relay
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    /// Baut die Verbindung auf; kehrt zurueck sobald sie steht
    async fn connect(&self) -> TandemResult<()>;

    /// Trennt die Verbindung ohne erneuten Aufbau
    async fn disconnect(&self) -> TandemResult<()>;

    /// Sendet einen Textrahmen
    async fn send(&self, text: String) -> TandemResult<()>;

    fn is_connected(&self) -> bool;

    /// Abonniert Transport-Ereignisse
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

// ---------------------------------------------------------------------------
// WebSocketTransport
// ---------------------------------------------------------------------------

/// WebSocket-Transport mit automatischem Wiederaufbau
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    url: String,
    max_backoff: Duration,
    events: broadcast::Sender<TransportEvent>,
    ausgang: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    verbunden: AtomicBool,
    stopp: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn neu(url: impl Into<String>, max_backoff: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_KAPAZITAET);
        let (stopp, _) = watch::channel(false);
        Self {
            inner: Arc::new(WsInner {
                url: url.into(),
                max_backoff,
                events,
                ausgang: Mutex::new(None),
                verbunden: AtomicBool::new(false),
                stopp,
                task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    async fn verbindung_oeffnen(url: &str) -> TandemResult<WsStream> {
        match tokio::time::timeout(VERBINDUNGS_TIMEOUT, connect_async(url)).await {
            Ok(Ok((ws, _antwort))) => Ok(ws),
            Ok(Err(e)) => Err(TandemError::Transport(format!("Verbindung zu {url}: {e}"))),
            Err(_) => Err(TandemError::Zeitlimit(format!("Verbindung zu {url}"))),
        }
    }

    /// Wartezeit vor dem n-ten Wiederaufbau
    fn backoff(versuch: u32, max: Duration) -> Duration {
        let faktor = 2u32.saturating_pow(versuch.min(16));
        BACKOFF_START.saturating_mul(faktor).min(max)
    }

    /// Verbindungsschleife: betreibt die Verbindung und baut sie bei Abriss neu auf
    async fn schleife(inner: Arc<WsInner>, mut ws: WsStream) {
        let mut stopp_rx = inner.stopp.subscribe();

        loop {
            let (tx, rx) = mpsc::unbounded_channel();
            *inner.ausgang.lock() = Some(tx);
            inner.verbunden.store(true, Ordering::Release);
            let _ = inner.events.send(TransportEvent::Verbunden);
            tracing::info!(url = %inner.url, "Relay verbunden");

            let beendet = Self::betreiben(&inner, ws, rx, &mut stopp_rx).await;

            *inner.ausgang.lock() = None;
            inner.verbunden.store(false, Ordering::Release);
            let _ = inner.events.send(TransportEvent::Getrennt);

            if beendet {
                tracing::info!(url = %inner.url, "Relay-Verbindung beendet");
                return;
            }
            tracing::warn!(url = %inner.url, "Relay-Verbindung abgerissen");

            // Wiederaufbau mit Backoff
            let mut versuch = 0u32;
            ws = loop {
                let warte = Self::backoff(versuch, inner.max_backoff);
                versuch = versuch.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(warte) => {}
                    Ok(()) = stopp_rx.changed() => {
                        if *stopp_rx.borrow() {
                            return;
                        }
                    }
                }
                match Self::verbindung_oeffnen(&inner.url).await {
                    Ok(neu) => break neu,
                    Err(e) => {
                        tracing::debug!(versuch, fehler = %e, "Wiederaufbau fehlgeschlagen");
                    }
                }
            };
        }
    }

    /// Betreibt eine offene Verbindung. Gibt true zurueck bei gewolltem Ende.
    async fn betreiben(
        inner: &WsInner,
        ws: WsStream,
        mut ausgang_rx: mpsc::UnboundedReceiver<Message>,
        stopp_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                rahmen = stream.next() => {
                    match rahmen {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inner.events.send(TransportEvent::Nachricht(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Close(_))) | None => return false,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "WebSocket-Lesefehler");
                            return false;
                        }
                    }
                }

                Some(nachricht) = ausgang_rx.recv() => {
                    if let Err(e) = sink.send(nachricht).await {
                        tracing::warn!(fehler = %e, "WebSocket-Senden fehlgeschlagen");
                        return false;
                    }
                }

                Ok(()) = stopp_rx.changed() => {
                    if *stopp_rx.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return true;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RelayTransport for WebSocketTransport {
    async fn connect(&self) -> TandemResult<()> {
        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let ws = Self::verbindung_oeffnen(&self.inner.url).await?;
        self.inner.stopp.send_replace(false);
        *task = Some(tokio::spawn(Self::schleife(Arc::clone(&self.inner), ws)));

        // Warten bis die Schleife den Ausgang installiert hat
        let start = tokio::time::Instant::now();
        while !self.is_connected() {
            if start.elapsed() > VERBINDUNGS_TIMEOUT {
                return Err(TandemError::Zeitlimit("Relay-Verbindung".into()));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> TandemResult<()> {
        let mut task = self.inner.task.lock().await;
        let Some(handle) = task.take() else {
            return Ok(());
        };
        self.inner.stopp.send_replace(true);
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            tracing::warn!("Verbindungsschleife reagiert nicht auf Stopp");
        }
        Ok(())
    }

    async fn send(&self, text: String) -> TandemResult<()> {
        let ausgang = self.inner.ausgang.lock().clone();
        match ausgang {
            Some(tx) => tx
                .send(Message::text(text))
                .map_err(|_| TandemError::Transport("Verbindung geschlossen".into())),
            None => Err(TandemError::Transport("Nicht mit dem Relay verbunden".into())),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.verbunden.load(Ordering::Acquire)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}
