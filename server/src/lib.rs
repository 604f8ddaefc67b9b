//! tandem-server – Bibliotheks-Root
//!
//! Startet den Relay mit der geladenen Konfiguration und haelt ihn bis zum
//! Shutdown-Signal am Laufen.

pub mod config;
pub mod logging;

use anyhow::Result;
use config::ServerConfig;
use tandem_relay::RelayServer;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet den Relay und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let addr = self.config.bind_adresse()?;
        let relay_config = self.config.relay_config();
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %addr,
            heartbeat_sek = relay_config.heartbeat.as_secs(),
            backlog_limit = relay_config.backlog_limit,
            "Server startet"
        );

        let relay = RelayServer::neu(relay_config).starten(addr).await?;

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        relay.beenden().await?;
        Ok(())
    }
}
