//! tandem-relay – Pub/Sub-Relay fuer Tandem
//!
//! Vermittelt verschluesselte Nachrichten zwischen Clients ueber Topics.
//! Das Relay sieht nur Topics und undurchsichtige Nachrichten.
//!
//! ## Architektur
//!
//! ```text
//! axum Router (RelayServer)
//!     |
//!     +-- GET  /          -> WebSocket-Upgrade -> Verbindung (ein Task je Client)
//!     +-- POST /subscribe -> Webhook-Registrierung
//!     +-- GET  /health, /hello
//!
//! Verbindung
//!     |  Heartbeat: Ping alle `heartbeat`, fehlendes Pong trennt
//!     v
//! Dispatcher
//!     +-- JSON-RPC  (publish, subscribe, unsubscribe)
//!     +-- Legacy    (pub, sub, ack)
//!     |
//!     v
//! Registry (ein Mutex: Subscriptions, Sende-Queues, Backlog)
//!     +-- MessageStore (Backlog fuer Topics ohne Abonnenten)
//! Webhooks (best effort, eigener Task je POST)
//! ```

pub mod backlog;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod routes;
pub mod server;
pub mod webhook;

// Bequeme Re-Exporte
pub use backlog::{MemoryMessageStore, MessageStore};
pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use registry::{ConnectionId, Registry};
pub use server::{LaufenderRelay, RelayServer, RelayState};
pub use webhook::Webhooks;
