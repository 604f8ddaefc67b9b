//! Relay-Server – Listener, Router und Shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backlog::{MemoryMessageStore, MessageStore};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::registry::Registry;
use crate::routes;
use crate::webhook::Webhooks;

/// Gemeinsamer Zustand aller Verbindungen und Handler
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub registry: Registry,
    pub webhooks: Webhooks,
    shutdown_rx: watch::Receiver<bool>,
}

impl RelayState {
    /// Zustand mit In-Memory-Backlog
    pub fn neu(config: RelayConfig, shutdown_rx: watch::Receiver<bool>) -> RelayResult<Self> {
        let backlog = Arc::new(MemoryMessageStore::neu(config.backlog_limit));
        Self::mit_backlog(config, backlog, shutdown_rx)
    }

    /// Zustand mit eigenem Backlog
    pub fn mit_backlog(
        config: RelayConfig,
        backlog: Arc<dyn MessageStore>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> RelayResult<Self> {
        let webhooks = Webhooks::neu(config.webhook_timeout)?;
        Ok(Self {
            config: Arc::new(config),
            registry: Registry::neu(backlog),
            webhooks,
            shutdown_rx,
        })
    }

    /// Empfaenger fuer das Shutdown-Signal
    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

/// Relay-Server
pub struct RelayServer {
    config: RelayConfig,
    backlog: Option<Arc<dyn MessageStore>>,
}

impl RelayServer {
    pub fn neu(config: RelayConfig) -> Self {
        Self {
            config,
            backlog: None,
        }
    }

    /// Ersetzt das In-Memory-Backlog
    pub fn mit_backlog(mut self, backlog: Arc<dyn MessageStore>) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Bindet den Listener und startet den Server im Hintergrund
    ///
    /// Mit Port 0 waehlt das System einen freien Port; die tatsaechliche
    /// Adresse liefert [`LaufenderRelay::addr`].
    pub async fn starten(self, bind_addr: SocketAddr) -> RelayResult<LaufenderRelay> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = match self.backlog {
            Some(backlog) => RelayState::mit_backlog(self.config, backlog, shutdown_rx.clone())?,
            None => RelayState::neu(self.config, shutdown_rx.clone())?,
        };

        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        let app = routes::router(state.clone());
        backlog_bereinigung_starten(&state);

        let mut signal_rx = shutdown_rx;
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = signal_rx.wait_for(|stop| *stop).await;
            })
            .await
        });

        tracing::info!(addr = %addr, "Relay gestartet");
        Ok(LaufenderRelay {
            addr,
            state,
            shutdown_tx,
            task,
        })
    }
}

/// Entfernt periodisch verfallene Backlog-Eintraege bis zum Shutdown
fn backlog_bereinigung_starten(state: &RelayState) {
    let backlog = Arc::clone(state.registry.backlog());
    let takt = state.config.backlog_bereinigung;
    let mut shutdown_rx = state.shutdown();
    tokio::spawn(async move {
        let mut intervall = tokio::time::interval_at(tokio::time::Instant::now() + takt, takt);
        loop {
            tokio::select! {
                _ = intervall.tick() => {
                    backlog.bereinigen().await;
                }
                _ = async { shutdown_rx.wait_for(|stop| *stop).await.map(|_| ()) } => break,
            }
        }
        tracing::debug!("Backlog-Bereinigung beendet");
    });
}

/// Handle auf einen laufenden Relay-Server
///
/// Wird das Handle fallen gelassen, schliessen alle WebSocket-Verbindungen.
pub struct LaufenderRelay {
    addr: SocketAddr,
    state: RelayState,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl LaufenderRelay {
    /// Tatsaechlich gebundene Adresse
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket-URL fuer Clients
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Stoppt den Server und wartet bis der Listener geschlossen ist
    pub async fn beenden(self) -> RelayResult<()> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(ergebnis) => ergebnis?,
            Err(e) => return Err(RelayError::intern(format!("Server-Task: {e}"))),
        }
        tracing::info!(addr = %self.addr, "Relay beendet");
        Ok(())
    }
}
