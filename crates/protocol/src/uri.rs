//! Pairing-URI
//!
//! ```text
//! <protocol>:<topic>@<version>?symKey=<hex>&relay-protocol=<p>[&relay-data=<d>]
//! ```
//!
//! Die URI wird out-of-band (QR-Code, Deep-Link) an die Gegenstelle
//! uebergeben und enthaelt den symmetrischen Schluessel des Pairing-Topics.

use std::fmt;
use std::str::FromStr;

use tandem_core::Topic;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::RelayOptions;

/// URI-Schema
pub const URI_PROTOKOLL: &str = "wc";
/// Protokollversion
pub const URI_VERSION: u32 = 2;

/// Zerlegte Pairing-URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub protocol: String,
    pub version: u32,
    pub topic: Topic,
    /// Symmetrischer Schluessel als 64 Zeichen Hex
    pub sym_key: String,
    pub relay: RelayOptions,
}

impl PairingUri {
    /// Neue URI mit Standardschema und -version
    pub fn neu(topic: Topic, sym_key: impl Into<String>, relay: RelayOptions) -> Self {
        Self {
            protocol: URI_PROTOKOLL.into(),
            version: URI_VERSION,
            topic,
            sym_key: sym_key.into(),
            relay,
        }
    }

    /// Parst eine URI
    pub fn parsen(uri: &str) -> ProtocolResult<Self> {
        let (protocol, rest) = uri
            .split_once(':')
            .ok_or_else(|| ProtocolError::uri("Schema fehlt"))?;
        if protocol.is_empty() {
            return Err(ProtocolError::uri("Schema ist leer"));
        }

        let (pfad, query) = rest
            .split_once('?')
            .ok_or_else(|| ProtocolError::uri("Query-Teil fehlt"))?;
        let (topic, version) = pfad
            .split_once('@')
            .ok_or_else(|| ProtocolError::uri("Version fehlt"))?;

        let topic = Topic::neu(topic).map_err(|e| ProtocolError::uri(e.to_string()))?;
        let version = version
            .parse::<u32>()
            .map_err(|_| ProtocolError::uri(format!("Ungueltige Version '{version}'")))?;

        let mut sym_key = None;
        let mut relay_protocol = None;
        let mut relay_data = None;

        for paar in query.split('&').filter(|p| !p.is_empty()) {
            let (schluessel, wert) = paar.split_once('=').unwrap_or((paar, ""));
            let wert = urlencoding::decode(wert)
                .map_err(|e| ProtocolError::uri(format!("Ungueltige Kodierung: {e}")))?
                .into_owned();
            match schluessel {
                "symKey" => sym_key = Some(wert),
                "relay-protocol" => relay_protocol = Some(wert),
                "relay-data" => relay_data = Some(wert),
                // Unbekannte Parameter ignorieren
                _ => {}
            }
        }

        let sym_key = sym_key.ok_or_else(|| ProtocolError::uri("symKey fehlt"))?;
        if sym_key.len() != 64 || !sym_key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::uri("symKey muss 64 Hex-Zeichen lang sein"));
        }
        let protocol_relay =
            relay_protocol.ok_or_else(|| ProtocolError::uri("relay-protocol fehlt"))?;

        Ok(Self {
            protocol: protocol.to_string(),
            version,
            topic,
            sym_key: sym_key.to_ascii_lowercase(),
            relay: RelayOptions {
                protocol: protocol_relay,
                data: relay_data,
            },
        })
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}?symKey={}&relay-protocol={}",
            self.protocol,
            self.topic,
            self.version,
            self.sym_key,
            urlencoding::encode(&self.relay.protocol)
        )?;
        if let Some(data) = &self.relay.data {
            write!(f, "&relay-data={}", urlencoding::encode(data))?;
        }
        Ok(())
    }
}

impl FromStr for PairingUri {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::parsen(s)
    }
}
