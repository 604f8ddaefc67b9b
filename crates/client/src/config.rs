//! Client-Konfiguration
//!
//! Alle Felder haben Standardwerte; fuer Tests genuegt meist
//! `ClientConfig { relay_url, ..Default::default() }`.

use std::time::Duration;
use tandem_protocol::{Metadata, RelayOptions};

/// Konfiguration eines Tandem-Clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket-URL des Relays
    pub relay_url: String,
    /// Eigene Anwendungsbeschreibung fuer Vorschlaege und Settle
    pub metadata: Metadata,
    /// Relay-Angaben fuer neue Pairings
    pub relay: RelayOptions,
    /// Praefix aller Speicherschluessel
    pub speicher_praefix: String,
    /// Zeitlimit fuer Relay-RPCs (publish, subscribe, unsubscribe)
    pub rpc_timeout: Duration,
    /// Zeitlimit fuer Anfragen an die Gegenstelle (ping, update, request)
    pub anfrage_timeout: Duration,
    /// Intervall der Ablaufpruefung
    pub ablauf_intervall: Duration,
    /// Intervall fuer das erneute Senden haengender Subscriptions
    pub subscribe_intervall: Duration,
    /// Obergrenze des Reconnect-Backoffs
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:5555".into(),
            metadata: Metadata {
                name: "Tandem Client".into(),
                ..Default::default()
            },
            relay: RelayOptions::default(),
            speicher_praefix: "tandem@1:client".into(),
            rpc_timeout: Duration::from_secs(10),
            anfrage_timeout: Duration::from_secs(30),
            ablauf_intervall: Duration::from_secs(1),
            subscribe_intervall: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Speicherschluessel einer Komponente: `<praefix>:<name>`
    pub fn speicher_schluessel(&self, name: &str) -> String {
        format!("{}:{name}", self.speicher_praefix)
    }
}
