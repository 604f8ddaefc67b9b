//! Client-Ereignisse
//!
//! Ein Broadcast-Kanal pro Client. Pairing, Session und Engine senden
//! hinein; die Anwendung abonniert ueber `Client::events()`.

use tandem_core::Topic;
use tandem_protocol::params::{EventBody, RequestBody};
use tandem_protocol::JsonRpcRequest;

use crate::engine::ProposalRecord;
use crate::session::SessionRecord;

/// Kapazitaet des Client-Ereigniskanals
pub const EVENT_KAPAZITAET: usize = 1024;

/// Ereignisse eines Tandem-Clients
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    // Pairing
    PairingErstellt { topic: Topic },
    PairingAktiviert { topic: Topic },
    PairingPing { topic: Topic },
    PairingGeloescht { topic: Topic },
    PairingAbgelaufen { topic: Topic },
    /// Anfrage einer registrierten Methode auf einem Pairing-Topic
    PairingAnfrage { topic: Topic, request: JsonRpcRequest },

    // Session
    /// Eingehender Vorschlag; mit `approve`/`reject` beantworten
    SessionVorschlag { id: u64, proposal: ProposalRecord },
    SessionVerbunden { session: SessionRecord },
    SessionAktualisiert { topic: Topic, session: SessionRecord },
    SessionVerlaengert { topic: Topic, expiry: i64 },
    SessionPing { topic: Topic },
    SessionGeloescht { topic: Topic },
    SessionAbgelaufen { topic: Topic },
    /// Anfrage der Gegenstelle; mit `respond` beantworten
    SessionAnfrage {
        topic: Topic,
        id: u64,
        chain_id: String,
        request: RequestBody,
    },
    SessionEreignis {
        topic: Topic,
        chain_id: String,
        event: EventBody,
    },

    /// Vorschlag abgelaufen, bevor er beantwortet wurde
    VorschlagAbgelaufen { id: u64 },
}

impl ClientEvent {
    /// Topic des Ereignisses, falls vorhanden
    pub fn topic(&self) -> Option<&Topic> {
        match self {
            Self::PairingErstellt { topic }
            | Self::PairingAktiviert { topic }
            | Self::PairingPing { topic }
            | Self::PairingGeloescht { topic }
            | Self::PairingAbgelaufen { topic }
            | Self::PairingAnfrage { topic, .. }
            | Self::SessionAktualisiert { topic, .. }
            | Self::SessionVerlaengert { topic, .. }
            | Self::SessionPing { topic }
            | Self::SessionGeloescht { topic }
            | Self::SessionAbgelaufen { topic }
            | Self::SessionAnfrage { topic, .. }
            | Self::SessionEreignis { topic, .. } => Some(topic),
            Self::SessionVerbunden { session } => Some(&session.topic),
            Self::SessionVorschlag { proposal, .. } => Some(&proposal.pairing_topic),
            Self::VorschlagAbgelaufen { .. } => None,
        }
    }
}

