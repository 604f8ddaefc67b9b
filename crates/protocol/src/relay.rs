//! Relay-Methoden – Parameter der Pub/Sub-RPCs zwischen Client und Relay

use serde::{Deserialize, Serialize};
use tandem_core::Topic;

/// Standard-TTL einer veroeffentlichten Nachricht (Sekunden)
pub const STANDARD_TTL_SEK: u64 = 6 * 60 * 60;

/// Methoden, die das Relay versteht oder an Clients schickt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMethod {
    Publish,
    Subscribe,
    Unsubscribe,
    /// Server -> Client: zugestellte Nachricht
    Subscription,
}

impl RelayMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Subscription => "subscription",
        }
    }

    pub fn parsen(name: &str) -> Option<Self> {
        match name {
            "publish" => Some(Self::Publish),
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }
}

fn standard_ttl() -> u64 {
    STANDARD_TTL_SEK
}

/// Parameter von `publish`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishParams {
    pub topic: Topic,
    pub message: String,
    #[serde(default = "standard_ttl")]
    pub ttl: u64,
    #[serde(default)]
    pub prompt: bool,
    #[serde(default)]
    pub tag: u32,
}

impl PublishParams {
    pub fn neu(topic: Topic, message: impl Into<String>) -> Self {
        Self {
            topic,
            message: message.into(),
            ttl: STANDARD_TTL_SEK,
            prompt: false,
            tag: 0,
        }
    }
}

/// Parameter von `subscribe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub topic: Topic,
}

/// Parameter von `unsubscribe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub id: String,
    pub topic: Topic,
}

/// Parameter der Zustellung `subscription` (Relay -> Client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// Id der Subscription, ueber die zugestellt wird
    pub id: String,
    pub data: SubscriptionData,
}

/// Inhalt einer Zustellung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionData {
    pub topic: Topic,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic() -> Topic {
        Topic::aus_bytes(&[7u8; 32])
    }

    #[test]
    fn publish_standardwerte() {
        let p: PublishParams =
            serde_json::from_value(json!({"topic": topic(), "message": "hallo"})).unwrap();
        assert_eq!(p.ttl, STANDARD_TTL_SEK);
        assert!(!p.prompt);
        assert_eq!(p.tag, 0);
    }

    #[test]
    fn publish_mit_kaputtem_topic_abgelehnt() {
        let r: Result<PublishParams, _> =
            serde_json::from_value(json!({"topic": "zu-kurz", "message": "x"}));
        assert!(r.is_err());
    }

    #[test]
    fn methodennamen() {
        for m in [
            RelayMethod::Publish,
            RelayMethod::Subscribe,
            RelayMethod::Unsubscribe,
            RelayMethod::Subscription,
        ] {
            assert_eq!(RelayMethod::parsen(m.as_str()), Some(m));
        }
        assert_eq!(RelayMethod::parsen("iridium_publish"), None);
    }
}
