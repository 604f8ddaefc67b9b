//! tandem-protocol – Nachrichtenformate
//!
//! Definiert alles, was zwischen Client, Gegenstelle und Relay ueber die
//! Leitung geht:
//!
//! - `jsonrpc`  – JSON-RPC 2.0 Anfragen, Antworten und Fehlercodes
//! - `relay`    – Relay-Methoden `publish`, `subscribe`, `unsubscribe`, `subscription`
//! - `legacy`   – altes `{topic, type, payload}`-Format (nur Durchreichung)
//! - `methods`  – geschlossene Menge der Peer-Methoden (`wc_*`)
//! - `params`   – Parameter der Peer-Methoden
//! - `types`    – Berechtigungen, Metadaten, Relay-Optionen
//! - `uri`      – Pairing-URI formatieren und parsen

pub mod error;
pub mod jsonrpc;
pub mod legacy;
pub mod methods;
pub mod params;
pub mod relay;
pub mod types;
pub mod uri;

pub use error::{ProtocolError, ProtocolResult};
pub use jsonrpc::{ErrorCode, JsonRpcError, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};
pub use methods::WireMethod;
pub use types::{Metadata, Participant, Permissions, RelayOptions};
pub use uri::PairingUri;
