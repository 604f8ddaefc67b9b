//! Parameter und Ergebnisse der Peer-Methoden
//!
//! Feldnamen auf der Leitung sind camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::ErrorCode;
use crate::types::{Participant, Permissions, RelayOptions};

/// Grund einer Trennung (`wc_pairingDelete`, `wc_sessionDelete`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParams {
    pub code: i64,
    pub message: String,
}

impl DeleteParams {
    /// Trennung durch den Benutzer
    pub fn benutzer_getrennt() -> Self {
        Self {
            code: ErrorCode::UserDisconnected.code(),
            message: ErrorCode::UserDisconnected.standard_nachricht().into(),
        }
    }
}

/// `wc_sessionPropose`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProposeParams {
    pub relay: RelayOptions,
    pub proposer: Participant,
    pub permissions: Permissions,
}

/// Antwort auf `wc_sessionPropose`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeResult {
    pub relay: RelayOptions,
    pub responder_public_key: String,
}

/// `wc_sessionSettle`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettleParams {
    pub relay: RelayOptions,
    pub permissions: Permissions,
    pub accounts: Vec<String>,
    pub controller: Participant,
    pub expiry: i64,
}

/// `wc_sessionUpdate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub permissions: Permissions,
}

/// `wc_sessionExtend`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: i64,
}

/// Eingebettete Anfrage in `wc_sessionRequest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// `wc_sessionRequest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub chain_id: String,
    pub request: RequestBody,
}

/// Eingebettetes Ereignis in `wc_sessionEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

/// `wc_sessionEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub chain_id: String,
    pub event: EventBody,
}
