//! JSON-RPC-Verlauf des Peer-Kanals
//!
//! Jede ausgehende Anfrage wird mit Topic und Id abgelegt. Eine Antwort
//! darf nur zu einer bekannten Anfrage und nur einmal eingetragen werden;
//! verirrte oder doppelte Antworten werden abgelehnt.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem_core::{zeit, TandemError, TandemResult, Topic};
use tandem_protocol::{JsonRpcRequest, JsonRpcResponse};

use crate::storage::KeyValueStorage;
use crate::store::{Ablaufend, Store};

/// Eintrag im Verlauf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRecord {
    pub id: u64,
    pub topic: Topic,
    pub request: JsonRpcRequest,
    #[serde(default)]
    pub response: Option<JsonRpcResponse>,
    pub expiry: i64,
}

impl Ablaufend for JsonRpcRecord {
    fn ablauf(&self) -> Option<i64> {
        Some(self.expiry)
    }
}

/// Verlauf aller ausgehenden Anfragen
#[derive(Clone)]
pub struct JsonRpcHistory {
    eintraege: Store<JsonRpcRecord>,
}

impl JsonRpcHistory {
    pub fn neu(speicher: Arc<dyn KeyValueStorage>, schluessel: impl Into<String>) -> Self {
        Self {
            eintraege: Store::neu(speicher, "JSON-RPC-Verlauf", schluessel),
        }
    }

    pub async fn init(&self) -> TandemResult<()> {
        self.eintraege.init().await.map(|_| ())
    }

    /// Legt eine ausgehende Anfrage ab
    pub async fn set(&self, topic: &Topic, request: &JsonRpcRequest) -> TandemResult<()> {
        let key = request.id.to_string();
        if self.eintraege.has(&key).await? {
            return Err(TandemError::BereitsVorhanden(format!(
                "JSON-RPC-Anfrage {}",
                request.id
            )));
        }
        let record = JsonRpcRecord {
            id: request.id,
            topic: topic.clone(),
            request: request.clone(),
            response: None,
            expiry: zeit::ab_jetzt(zeit::SIEBEN_TAGE),
        };
        self.eintraege.set(key, record).await
    }

    /// Traegt die Antwort zu einer bekannten Anfrage ein
    pub async fn resolve(&self, response: &JsonRpcResponse) -> TandemResult<JsonRpcRecord> {
        let key = response.id.to_string();
        let record = match self.eintraege.get(&key).await {
            Ok(r) => r,
            Err(TandemError::NichtGefunden(_)) => {
                return Err(TandemError::NichtGefunden(format!(
                    "Keine Anfrage zur Antwort {}",
                    response.id
                )))
            }
            Err(e) => return Err(e),
        };
        if record.response.is_some() {
            return Err(TandemError::BereitsVorhanden(format!(
                "Antwort {} bereits eingetragen",
                response.id
            )));
        }
        let antwort = response.clone();
        self.eintraege
            .update(&key, move |r| r.response = Some(antwort))
            .await
    }

    pub async fn get(&self, id: u64) -> TandemResult<JsonRpcRecord> {
        self.eintraege.get(&id.to_string()).await
    }

    pub async fn exists(&self, topic: &Topic, id: u64) -> TandemResult<bool> {
        match self.eintraege.get(&id.to_string()).await {
            Ok(r) => Ok(&r.topic == topic),
            Err(TandemError::NichtGefunden(_) | TandemError::Abgelaufen(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, id: u64) -> TandemResult<()> {
        self.eintraege.delete(&id.to_string()).await.map(|_| ())
    }

    /// Entfernt alle Eintraege eines Topics
    pub async fn delete_topic(&self, topic: &Topic) -> TandemResult<usize> {
        let mut entfernt = 0;
        for (key, record) in self.eintraege.values().await? {
            if &record.topic == topic {
                self.eintraege.delete(&key).await?;
                entfernt += 1;
            }
        }
        Ok(entfernt)
    }

    /// Offene Anfragen (ohne Antwort)
    pub async fn pending(&self) -> TandemResult<Vec<JsonRpcRecord>> {
        Ok(self
            .eintraege
            .values()
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.response.is_none())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    async fn verlauf() -> JsonRpcHistory {
        let h = JsonRpcHistory::neu(Arc::new(MemoryStorage::new()), "test:history");
        h.init().await.unwrap();
        h
    }

    #[tokio::test]
    async fn anfrage_und_antwort() {
        let h = verlauf().await;
        let topic = Topic::aus_bytes(&[1; 32]);
        let req = JsonRpcRequest::mit_id(10, "wc_pairingPing", json!({}));
        h.set(&topic, &req).await.unwrap();
        assert_eq!(h.pending().await.unwrap().len(), 1);

        let record = h
            .resolve(&JsonRpcResponse::ergebnis(10, json!(true)))
            .await
            .unwrap();
        assert_eq!(record.response.unwrap().result, Some(json!(true)));
        assert!(h.pending().await.unwrap().is_empty());
        assert!(h.exists(&topic, 10).await.unwrap());
    }

    #[tokio::test]
    async fn doppelte_anfrage_abgelehnt() {
        let h = verlauf().await;
        let topic = Topic::aus_bytes(&[1; 32]);
        let req = JsonRpcRequest::mit_id(11, "x", json!(null));
        h.set(&topic, &req).await.unwrap();
        assert!(matches!(
            h.set(&topic, &req).await,
            Err(TandemError::BereitsVorhanden(_))
        ));
    }

    #[tokio::test]
    async fn verirrte_und_doppelte_antwort_abgelehnt() {
        let h = verlauf().await;
        assert!(matches!(
            h.resolve(&JsonRpcResponse::ergebnis(99, json!(true))).await,
            Err(TandemError::NichtGefunden(_))
        ));

        let topic = Topic::aus_bytes(&[2; 32]);
        h.set(&topic, &JsonRpcRequest::mit_id(12, "x", json!(null)))
            .await
            .unwrap();
        h.resolve(&JsonRpcResponse::ergebnis(12, json!(1))).await.unwrap();
        assert!(matches!(
            h.resolve(&JsonRpcResponse::ergebnis(12, json!(2))).await,
            Err(TandemError::BereitsVorhanden(_))
        ));
    }

    #[tokio::test]
    async fn topic_loeschen() {
        let h = verlauf().await;
        let a = Topic::aus_bytes(&[1; 32]);
        let b = Topic::aus_bytes(&[2; 32]);
        h.set(&a, &JsonRpcRequest::mit_id(1, "x", json!(null))).await.unwrap();
        h.set(&a, &JsonRpcRequest::mit_id(2, "x", json!(null))).await.unwrap();
        h.set(&b, &JsonRpcRequest::mit_id(3, "x", json!(null))).await.unwrap();

        assert_eq!(h.delete_topic(&a).await.unwrap(), 2);
        assert!(!h.exists(&a, 1).await.unwrap());
        assert!(h.exists(&b, 3).await.unwrap());
    }
}
