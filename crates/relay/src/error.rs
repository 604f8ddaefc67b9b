//! Fehlertypen fuer das Relay

use tandem_protocol::{ErrorCode, JsonRpcError};
use thiserror::Error;

/// Fehlertyp fuer das Relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO-Fehler (Listener, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Kein JSON oder unbekanntes Nachrichtenformat
    #[error("Parse-Fehler: {0}")]
    Parse(String),

    /// JSON, aber keine gueltige Anfrage
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    /// Methode wird vom Relay nicht angeboten
    #[error("Unbekannte Methode: {0}")]
    UnbekannteMethode(String),

    /// Parameter fehlen oder sind fehlerhaft
    #[error("Ungueltige Parameter: {0}")]
    UngueltigeParameter(String),

    /// Webhook konnte nicht zugestellt werden
    #[error("Webhook-Fehler: {0}")]
    Webhook(String),

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RelayError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::UngueltigeParameter(msg.into())
    }

    /// JSON-RPC-Fehlercode
    pub fn jsonrpc_code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::UngueltigeAnfrage(_) => ErrorCode::InvalidRequest,
            Self::UnbekannteMethode(_) => ErrorCode::MethodNotFound,
            Self::UngueltigeParameter(_) => ErrorCode::InvalidParams,
            Self::Io(_) | Self::Webhook(_) | Self::Intern(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP-Statuscode fuer REST-Antworten
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(_) | Self::UngueltigeAnfrage(_) | Self::UngueltigeParameter(_) => 400,
            Self::UnbekannteMethode(_) => 404,
            Self::Webhook(_) => 502,
            Self::Io(_) | Self::Intern(_) => 500,
        }
    }

    /// Fehlerobjekt fuer eine JSON-RPC-Antwort
    pub fn als_jsonrpc(&self) -> JsonRpcError {
        JsonRpcError::neu(self.jsonrpc_code(), self.to_string())
    }
}

/// Result-Typ fuer das Relay
pub type RelayResult<T> = Result<T, RelayError>;
