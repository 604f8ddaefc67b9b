//! Gemeinsame Identifikationstypen fuer Tandem
//!
//! Topics und Ablaufziele verwenden das Newtype-Pattern, damit ein
//! beliebiger String nicht versehentlich als Topic durchgereicht wird.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TandemError, TandemResult};

/// Laenge eines Topics in Bytes (hex-kodiert doppelt so viele Zeichen)
pub const TOPIC_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// Kanal-Bezeichner: 32 Bytes, als 64 Zeichen Kleinbuchstaben-Hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Prueft und uebernimmt einen Hex-String als Topic
    pub fn neu(wert: impl Into<String>) -> TandemResult<Self> {
        let wert = wert.into().to_ascii_lowercase();
        if wert.len() != TOPIC_BYTES * 2 || !wert.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TandemError::validierung(format!(
                "Topic muss {} Hex-Zeichen lang sein: '{wert}'",
                TOPIC_BYTES * 2
            )));
        }
        Ok(Self(wert))
    }

    /// Erstellt ein Topic aus 32 Rohbytes
    pub fn aus_bytes(bytes: &[u8; TOPIC_BYTES]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Gibt den Hex-String zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = TandemError;

    fn try_from(wert: String) -> TandemResult<Self> {
        Self::neu(wert)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl FromStr for Topic {
    type Err = TandemError;

    fn from_str(s: &str) -> TandemResult<Self> {
        Self::neu(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ExpiryTarget
// ---------------------------------------------------------------------------

/// Ziel eines Ablauf-Timers: `topic:<topic>` oder `id:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExpiryTarget {
    /// Pairing- oder Session-Topic
    Topic(Topic),
    /// JSON-RPC-Id (Vorschlaege, Verlauf)
    Id(u64),
}

impl fmt::Display for ExpiryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(topic) => write!(f, "topic:{topic}"),
            Self::Id(id) => write!(f, "id:{id}"),
        }
    }
}

impl FromStr for ExpiryTarget {
    type Err = TandemError;

    fn from_str(s: &str) -> TandemResult<Self> {
        match s.split_once(':') {
            Some(("topic", rest)) => Ok(Self::Topic(Topic::neu(rest)?)),
            Some(("id", rest)) => rest
                .parse::<u64>()
                .map(Self::Id)
                .map_err(|_| TandemError::validierung(format!("Ungueltige Id im Ablaufziel: '{s}'"))),
            _ => Err(TandemError::validierung(format!(
                "Ablaufziel muss mit 'topic:' oder 'id:' beginnen: '{s}'"
            ))),
        }
    }
}

impl TryFrom<String> for ExpiryTarget {
    type Error = TandemError;

    fn try_from(wert: String) -> TandemResult<Self> {
        wert.parse()
    }
}

impl From<ExpiryTarget> for String {
    fn from(ziel: ExpiryTarget) -> Self {
        ziel.to_string()
    }
}

impl From<Topic> for ExpiryTarget {
    fn from(topic: Topic) -> Self {
        Self::Topic(topic)
    }
}
