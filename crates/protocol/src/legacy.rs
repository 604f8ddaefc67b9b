//! Legacy-Format – `{topic, type, payload, silent}`
//!
//! Aeltere Clients sprechen kein JSON-RPC mit dem Relay. Das Relay reicht
//! ihre Nachrichten nur durch; Topics sind hier beliebige Strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Art einer Legacy-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyTyp {
    Pub,
    Sub,
    Ack,
}

/// Legacy-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMessage {
    pub topic: String,
    #[serde(rename = "type")]
    pub typ: LegacyTyp,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub silent: bool,
}

impl LegacyMessage {
    /// Zustellung an einen Legacy-Abonnenten
    pub fn zustellung(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            typ: LegacyTyp::Pub,
            payload: payload.into(),
            silent: false,
        }
    }

    /// Erkennt das Legacy-Format an `topic` + `type` ohne `jsonrpc`
    pub fn ist_legacy(wert: &Value) -> bool {
        wert.get("jsonrpc").is_none() && wert.get("topic").is_some() && wert.get("type").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_erkennung() {
        assert!(LegacyMessage::ist_legacy(
            &json!({"topic": "t", "type": "sub", "payload": ""})
        ));
        assert!(!LegacyMessage::ist_legacy(
            &json!({"id": 1, "jsonrpc": "2.0", "method": "subscribe", "topic": "t", "type": "x"})
        ));
    }

    #[test]
    fn typ_in_kleinbuchstaben() {
        let m = LegacyMessage::zustellung("abc", "daten");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["type"], "pub");
        assert_eq!(v["silent"], false);

        let ack: LegacyMessage = serde_json::from_value(json!({"topic": "abc", "type": "ack"})).unwrap();
        assert_eq!(ack.typ, LegacyTyp::Ack);
        assert_eq!(ack.payload, "");
    }
}
