//! Peer-Methoden – geschlossene Menge der `wc_*`-Anfragen
//!
//! Eingehende Anfragen werden ueber diesen Enum dispatcht statt ueber
//! Strings. Unbekannte Namen landen in `Unknown` und koennen von der
//! Anwendung registriert werden.

use std::fmt;

/// Methoden des verschluesselten Peer-Kanals
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireMethod {
    PairingPing,
    PairingDelete,
    SessionPropose,
    SessionSettle,
    SessionUpdate,
    SessionExtend,
    SessionDelete,
    SessionPing,
    SessionRequest,
    SessionEvent,
    Unknown(String),
}

impl WireMethod {
    /// Name auf der Leitung
    pub fn as_str(&self) -> &str {
        match self {
            Self::PairingPing => "wc_pairingPing",
            Self::PairingDelete => "wc_pairingDelete",
            Self::SessionPropose => "wc_sessionPropose",
            Self::SessionSettle => "wc_sessionSettle",
            Self::SessionUpdate => "wc_sessionUpdate",
            Self::SessionExtend => "wc_sessionExtend",
            Self::SessionDelete => "wc_sessionDelete",
            Self::SessionPing => "wc_sessionPing",
            Self::SessionRequest => "wc_sessionRequest",
            Self::SessionEvent => "wc_sessionEvent",
            Self::Unknown(name) => name,
        }
    }

    /// Ordnet einen Namen zu; nie fehlschlagend
    pub fn parsen(name: &str) -> Self {
        match name {
            "wc_pairingPing" => Self::PairingPing,
            "wc_pairingDelete" => Self::PairingDelete,
            "wc_sessionPropose" => Self::SessionPropose,
            "wc_sessionSettle" => Self::SessionSettle,
            "wc_sessionUpdate" => Self::SessionUpdate,
            "wc_sessionExtend" => Self::SessionExtend,
            "wc_sessionDelete" => Self::SessionDelete,
            "wc_sessionPing" => Self::SessionPing,
            "wc_sessionRequest" => Self::SessionRequest,
            "wc_sessionEvent" => Self::SessionEvent,
            andere => Self::Unknown(andere.to_string()),
        }
    }

    /// Methoden, die auf einem Pairing-Topic laufen
    pub fn ist_pairing_methode(&self) -> bool {
        matches!(
            self,
            Self::PairingPing | Self::PairingDelete | Self::SessionPropose
        )
    }
}

impl fmt::Display for WireMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
