//! JSON-RPC 2.0 – Anfragen, Antworten, Fehlercodes
//!
//! Sowohl die Relay-Verbindung (`publish`, `subscribe`, ...) als auch der
//! verschluesselte Peer-Kanal (`wc_sessionPropose`, ...) sprechen JSON-RPC.
//! Ids sind `u64` aus Millisekunden-Zeitstempel und Zaehler, damit
//! Anfragen und Antworten ueber beide Seiten eindeutig zugeordnet werden.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ProtocolError, ProtocolResult};

/// Protokollversion im Feld `jsonrpc`
pub const JSONRPC_VERSION: &str = "2.0";

static ID_ZAEHLER: AtomicU64 = AtomicU64::new(0);

/// Erzeugt eine neue Nachrichten-Id: `millis * 1000 + zaehler % 1000`
pub fn payload_id() -> u64 {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let n = ID_ZAEHLER.fetch_add(1, Ordering::Relaxed) % 1000;
    millis * 1000 + n
}

// ---------------------------------------------------------------------------
// Fehlercodes
// ---------------------------------------------------------------------------

/// Fehlercodes fuer JSON-RPC-Fehlerantworten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    // Anwendungsebene
    Unauthorized,
    Expired,
    UserRejected,
    UserDisconnected,
}

impl ErrorCode {
    /// Numerischer Code auf der Leitung
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Unauthorized => 3000,
            Self::Expired => 4100,
            Self::UserRejected => 5000,
            Self::UserDisconnected => 6000,
        }
    }

    /// Gegenrichtung zu [`ErrorCode::code`]
    pub fn aus_code(code: i64) -> Option<Self> {
        Some(match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            3000 => Self::Unauthorized,
            4100 => Self::Expired,
            5000 => Self::UserRejected,
            6000 => Self::UserDisconnected,
            _ => return None,
        })
    }

    /// Standardtext fuer die Fehlermeldung
    pub fn standard_nachricht(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Unauthorized => "Unauthorized",
            Self::Expired => "Expired",
            Self::UserRejected => "User rejected.",
            Self::UserDisconnected => "User disconnected.",
        }
    }
}

/// Fehlerobjekt einer JSON-RPC-Antwort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Fehler mit Standardtext des Codes
    pub fn aus_code(code: ErrorCode) -> Self {
        Self::neu(code, code.standard_nachricht())
    }

    /// Fehler mit eigenem Text
    pub fn neu(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Bekannter Code, falls vorhanden
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::aus_code(self.code)
    }
}

// ---------------------------------------------------------------------------
// Anfrage / Antwort
// ---------------------------------------------------------------------------

/// JSON-RPC-Anfrage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Erstellt eine Anfrage mit frischer Id
    pub fn neu(method: impl Into<String>, params: Value) -> Self {
        Self::mit_id(payload_id(), method, params)
    }

    /// Erstellt eine Anfrage mit vorgegebener Id
    pub fn mit_id(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }

    /// Deserialisiert die Parameter in einen konkreten Typ
    pub fn params_als<T: serde::de::DeserializeOwned>(&self) -> ProtocolResult<T> {
        serde_json::from_value(self.params.clone()).map_err(ProtocolError::from)
    }
}

/// JSON-RPC-Antwort: genau eines von `result` oder `error` ist gesetzt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Erfolgsantwort
    pub fn ergebnis(id: u64, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Fehlerantwort
    pub fn fehler(id: u64, error: JsonRpcError) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Baut eine Antwort aus einem `Result`
    pub fn aus_result(id: u64, ausgang: Result<Value, JsonRpcError>) -> Self {
        match ausgang {
            Ok(wert) => Self::ergebnis(id, wert),
            Err(e) => Self::fehler(id, e),
        }
    }

    /// Gibt true zurueck wenn es eine Fehlerantwort ist
    pub fn ist_fehler(&self) -> bool {
        self.error.is_some()
    }

    /// Zerlegt die Antwort in `Ok(result)` oder `Err(error)`
    pub fn in_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(e)) => Err(e),
            (Some(wert), None) => Ok(wert),
            (None, None) => Ok(Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Eingehende Nutzlast
// ---------------------------------------------------------------------------

/// Eine eingehende JSON-RPC-Nachricht: Anfrage oder Antwort
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcPayload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcPayload {
    /// Parst einen JSON-Text
    pub fn parsen(text: &str) -> ProtocolResult<Self> {
        let wert: Value = serde_json::from_str(text)?;
        Self::aus_wert(wert)
    }

    /// Klassifiziert einen bereits geparsten JSON-Wert
    ///
    /// Anfragen haben `method`, Antworten `result` oder `error`.
    pub fn aus_wert(wert: Value) -> ProtocolResult<Self> {
        let objekt = wert
            .as_object()
            .ok_or_else(|| ProtocolError::nachricht("JSON-RPC-Nachricht ist kein Objekt"))?;

        if objekt.get("id").and_then(Value::as_u64).is_none() {
            return Err(ProtocolError::nachricht("Feld 'id' fehlt oder ist keine Zahl"));
        }

        if objekt.contains_key("method") {
            Ok(Self::Request(serde_json::from_value(wert)?))
        } else if objekt.contains_key("result") || objekt.contains_key("error") {
            Ok(Self::Response(serde_json::from_value(wert)?))
        } else {
            Err(ProtocolError::nachricht(
                "Weder 'method' noch 'result'/'error' vorhanden",
            ))
        }
    }

    /// Id der Nachricht
    pub fn id(&self) -> u64 {
        match self {
            Self::Request(r) => r.id,
            Self::Response(r) => r.id,
        }
    }

    /// Serialisiert als JSON-Wert
    pub fn als_wert(&self) -> ProtocolResult<Value> {
        Ok(match self {
            Self::Request(r) => serde_json::to_value(r)?,
            Self::Response(r) => serde_json::to_value(r)?,
        })
    }
}
