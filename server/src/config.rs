//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, der Relay laeuft also auch ohne Konfigurationsdatei.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tandem_relay::RelayConfig;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerEinstellungen,
    pub netzwerk: NetzwerkEinstellungen,
    pub relay: RelayEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename im Log
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Tandem Relay".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer WebSocket und REST
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 5555,
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Abstand der WebSocket-Pings in Sekunden
    pub heartbeat_sek: u64,
    /// Maximale Backlog-Nachrichten pro Topic
    pub backlog_limit: usize,
    /// Zeitlimit je Webhook-Zustellung in Millisekunden
    pub webhook_timeout_ms: u64,
    /// Groesste erlaubte TTL eines `publish` in Sekunden
    pub max_ttl_sek: u64,
    /// Abstand der Backlog-Bereinigung in Sekunden
    pub backlog_bereinigung_sek: u64,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            heartbeat_sek: 10,
            backlog_limit: 1000,
            webhook_timeout_ms: 5000,
            max_ttl_sek: 30 * 24 * 60 * 60,
            backlog_bereinigung_sek: 60,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Bind-Adresse fuer WebSocket und REST
    pub fn bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port);
        text.parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{text}': {e}"))
    }

    /// Laufzeit-Konfiguration fuer den Relay
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            heartbeat: Duration::from_secs(self.relay.heartbeat_sek.max(1)),
            backlog_limit: self.relay.backlog_limit,
            webhook_timeout: Duration::from_millis(self.relay.webhook_timeout_ms),
            max_ttl: Duration::from_secs(self.relay.max_ttl_sek),
            backlog_bereinigung: Duration::from_secs(self.relay.backlog_bereinigung_sek.max(1)),
        }
    }

    /// Prueft Werte, die der Relay nicht sinnvoll betreiben kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.relay.backlog_limit == 0 {
            anyhow::bail!("relay.backlog_limit muss groesser als 0 sein");
        }
        if self.relay.max_ttl_sek == 0 {
            anyhow::bail!("relay.max_ttl_sek muss groesser als 0 sein");
        }
        if self.relay.webhook_timeout_ms == 0 {
            anyhow::bail!("relay.webhook_timeout_ms muss groesser als 0 sein");
        }
        Ok(())
    }
}
