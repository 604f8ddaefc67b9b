//! Fehlertypen fuer das Protokoll-Crate

use tandem_core::TandemError;
use thiserror::Error;

/// Fehler beim Parsen oder Pruefen von Protokollnachrichten
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Kein gueltiges JSON
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON, aber keine gueltige JSON-RPC-Nachricht
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    /// Pairing-URI ist unvollstaendig oder fehlerhaft
    #[error("Ungueltige URI: {0}")]
    UngueltigeUri(String),
}

impl ProtocolError {
    /// Erstellt einen Nachrichtenfehler
    pub fn nachricht(msg: impl Into<String>) -> Self {
        Self::UngueltigeNachricht(msg.into())
    }

    /// Erstellt einen URI-Fehler
    pub fn uri(msg: impl Into<String>) -> Self {
        Self::UngueltigeUri(msg.into())
    }
}

impl From<ProtocolError> for TandemError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UngueltigeUri(msg) => TandemError::Validierung(msg),
            other => TandemError::Protokoll(other.to_string()),
        }
    }
}

/// Result-Typ fuer das Protokoll-Crate
pub type ProtocolResult<T> = Result<T, ProtocolError>;
