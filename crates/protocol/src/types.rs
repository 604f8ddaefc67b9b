//! Gemeinsame Protokolltypen: Berechtigungen, Metadaten, Relay-Optionen

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Standard-Relay-Protokoll
pub const STANDARD_RELAY_PROTOKOLL: &str = "irn";

/// Relay-Angaben eines Pairings bzw. einer Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            protocol: STANDARD_RELAY_PROTOKOLL.into(),
            data: None,
        }
    }
}

/// Beschreibung einer Anwendung (App oder Wallet)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Teilnehmer eines Handshakes: oeffentlicher Schluessel + Metadaten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: String,
    pub metadata: Metadata,
}

/// Berechtigungen einer Session
///
/// Aktualisierungen duerfen nur hinzufuegen, nie entfernen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub chains: BTreeSet<String>,
    #[serde(default)]
    pub methods: BTreeSet<String>,
    #[serde(default)]
    pub events: BTreeSet<String>,
}

impl Permissions {
    /// Baut Berechtigungen aus String-Listen
    pub fn neu<C, M, E>(chains: C, methods: M, events: E) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            chains: chains.into_iter().map(Into::into).collect(),
            methods: methods.into_iter().map(Into::into).collect(),
            events: events.into_iter().map(Into::into).collect(),
        }
    }

    /// Gibt true zurueck wenn `self` jede Berechtigung aus `andere` enthaelt
    pub fn umfasst(&self, andere: &Permissions) -> bool {
        self.chains.is_superset(&andere.chains)
            && self.methods.is_superset(&andere.methods)
            && self.events.is_superset(&andere.events)
    }

    /// Prueft die Form der Berechtigungen
    ///
    /// Mindestens eine Chain, keine leeren Namen.
    pub fn pruefen(&self) -> Result<(), String> {
        if self.chains.is_empty() {
            return Err("Berechtigungen ohne Chains".into());
        }
        let leer = self
            .chains
            .iter()
            .chain(&self.methods)
            .chain(&self.events)
            .any(|s| s.trim().is_empty());
        if leer {
            return Err("Leerer Name in den Berechtigungen".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn umfasst_ist_teilmengenpruefung() {
        let basis = Permissions::neu(["eip155:1"], ["eth_sign"], ["chainChanged"]);
        let mehr = Permissions::neu(
            ["eip155:1", "eip155:10"],
            ["eth_sign", "personal_sign"],
            ["chainChanged"],
        );
        assert!(mehr.umfasst(&basis));
        assert!(!basis.umfasst(&mehr));
        assert!(basis.umfasst(&basis));
    }

    #[test]
    fn pruefen_verlangt_chain() {
        let ohne = Permissions::neu(Vec::<String>::new(), ["eth_sign"], Vec::<String>::new());
        assert!(ohne.pruefen().is_err());
        let leerer_name = Permissions::neu(["eip155:1"], [" "], Vec::<String>::new());
        assert!(leerer_name.pruefen().is_err());
        assert!(Permissions::neu(["eip155:1"], ["eth_sign"], ["x"]).pruefen().is_ok());
    }

    #[test]
    fn participant_camel_case() {
        let p = Participant {
            public_key: "ab".into(),
            metadata: Metadata::default(),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["publicKey"], "ab");
    }
}
