//! # tandem-client
//!
//! Pairing- und Session-Client fuer Tandem.
//!
//! ## Module
//! - `storage` - Key-Value-Speicher (Speicher, Datei)
//! - `crypto` - Schluesselbund und Umschlaege
//! - `store` - Persistente Tabellen mit Ablaufpruefung
//! - `expirer` - Ablauf-Timer fuer Topics und Ids
//! - `history` - Verlauf der Peer-Anfragen
//! - `transport` - Verbindung zum Relay (WebSocket)
//! - `provider` - JSON-RPC ueber den Transport
//! - `subscriber` - Topic-Subscriptions mit Wiederaufbau
//! - `relayer` - Pub/Sub-Zugang
//! - `messenger` - Verschluesselter Anfrage/Antwort-Kanal
//! - `pairing` - Pairings
//! - `session` - Sessions
//! - `engine` - Vorschlag, Zustimmung, Routing
//! - `client` - Zusammenbau

pub mod client;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod events;
pub mod expirer;
pub mod history;
pub mod messenger;
pub mod pairing;
pub mod provider;
pub mod relayer;
pub mod session;
pub mod storage;
pub mod store;
pub mod subscriber;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Bequeme Re-Exports
pub use client::Client;
pub use config::ClientConfig;
pub use engine::{ApproveParams, ConnectParams, Engine, ProposalRecord, Verbindungsaufbau, Zustimmung};
pub use events::ClientEvent;
pub use pairing::{NeuesPairing, Pairing, PairingRecord};
pub use relayer::{PublishOptions, Relayer, RelayerEvent};
pub use session::{SessionRecord, Sessions};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use subscriber::{SubscribeOptions, Subscriber, SubscriberZustand};
pub use transport::{RelayTransport, TransportEvent, WebSocketTransport};
