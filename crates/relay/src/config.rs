//! Relay-Konfiguration

use std::time::Duration;

/// Laufzeit-Konfiguration des Relays
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Abstand der WebSocket-Pings; wer den letzten nicht beantwortet hat, fliegt
    pub heartbeat: Duration,
    /// Maximale Nachrichten im Backlog pro Topic (aelteste fallen heraus)
    pub backlog_limit: usize,
    /// Zeitlimit je Webhook-POST
    pub webhook_timeout: Duration,
    /// Groesste TTL, die ein `publish` verlangen darf
    pub max_ttl: Duration,
    /// Abstand, in dem verfallene Backlog-Eintraege entfernt werden
    pub backlog_bereinigung: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(10),
            backlog_limit: 1000,
            webhook_timeout: Duration::from_secs(5),
            max_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            backlog_bereinigung: Duration::from_secs(60),
        }
    }
}
