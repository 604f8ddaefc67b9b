//! Backlog – Nachrichten fuer Topics ohne Abonnenten
//!
//! Findet ein `publish` keinen Abonnenten, landet die Nachricht hier und
//! wird beim naechsten `subscribe` auf das Topic genau einmal ausgeliefert.
//! Eintraege verfallen nach ihrer TTL.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{RelayError, RelayResult};

/// Ablage fuer zurueckgehaltene Nachrichten
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Haengt eine Nachricht an das Backlog des Topics an
    async fn anhaengen(&self, topic: &str, message: String, ttl: Duration) -> RelayResult<()>;

    /// Entnimmt alle noch gueltigen Nachrichten des Topics (Backlog ist danach leer)
    async fn entnehmen(&self, topic: &str) -> RelayResult<Vec<String>>;

    /// Anzahl der gehaltenen Nachrichten (inklusive verfallener)
    async fn anzahl(&self, topic: &str) -> usize;

    /// Entfernt verfallene Nachrichten und leere Topics; liefert die Anzahl entfernter Nachrichten
    async fn bereinigen(&self) -> usize;
}

struct Eintrag {
    message: String,
    verfaellt: Instant,
}

/// In-Memory-Backlog mit Obergrenze pro Topic
pub struct MemoryMessageStore {
    topics: DashMap<String, VecDeque<Eintrag>>,
    limit: usize,
}

impl MemoryMessageStore {
    pub fn neu(limit: usize) -> Self {
        Self {
            topics: DashMap::new(),
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn anhaengen(&self, topic: &str, message: String, ttl: Duration) -> RelayResult<()> {
        let verfaellt = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| RelayError::parameter(format!("TTL zu gross: {}s", ttl.as_secs())))?;
        let mut queue = self.topics.entry(topic.to_string()).or_default();
        if queue.len() >= self.limit {
            queue.pop_front();
            tracing::warn!(topic = %topic, limit = self.limit, "Backlog voll – aelteste Nachricht verworfen");
        }
        queue.push_back(Eintrag { message, verfaellt });
        Ok(())
    }

    async fn entnehmen(&self, topic: &str) -> RelayResult<Vec<String>> {
        let Some((_, queue)) = self.topics.remove(topic) else {
            return Ok(Vec::new());
        };
        let jetzt = Instant::now();
        let gesamt = queue.len();
        let gueltig: Vec<String> = queue
            .into_iter()
            .filter(|e| e.verfaellt > jetzt)
            .map(|e| e.message)
            .collect();
        if gueltig.len() < gesamt {
            tracing::debug!(
                topic = %topic,
                verfallen = gesamt - gueltig.len(),
                "Verfallene Backlog-Nachrichten verworfen"
            );
        }
        Ok(gueltig)
    }

    async fn anzahl(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|q| q.len()).unwrap_or(0)
    }

    async fn bereinigen(&self) -> usize {
        let jetzt = Instant::now();
        let mut entfernt = 0;
        self.topics.retain(|_, queue| {
            let vorher = queue.len();
            queue.retain(|e| e.verfaellt > jetzt);
            entfernt += vorher - queue.len();
            !queue.is_empty()
        });
        if entfernt > 0 {
            tracing::debug!(entfernt, topics = self.topics.len(), "Backlog bereinigt");
        }
        entfernt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUNDE: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn entnehmen_leert_backlog() {
        let store = MemoryMessageStore::neu(10);
        store.anhaengen("t", "eins".into(), STUNDE).await.unwrap();
        store.anhaengen("t", "zwei".into(), STUNDE).await.unwrap();

        assert_eq!(store.entnehmen("t").await.unwrap(), vec!["eins", "zwei"]);
        assert!(store.entnehmen("t").await.unwrap().is_empty());
        assert_eq!(store.anzahl("t").await, 0);
    }

    #[tokio::test]
    async fn limit_verdraengt_aelteste() {
        let store = MemoryMessageStore::neu(2);
        for m in ["a", "b", "c"] {
            store.anhaengen("t", m.into(), STUNDE).await.unwrap();
        }
        assert_eq!(store.entnehmen("t").await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn verfallene_nachrichten_werden_nicht_geliefert() {
        let store = MemoryMessageStore::neu(10);
        store.anhaengen("t", "alt".into(), Duration::ZERO).await.unwrap();
        store.anhaengen("t", "frisch".into(), STUNDE).await.unwrap();
        assert_eq!(store.entnehmen("t").await.unwrap(), vec!["frisch"]);
    }

    #[tokio::test]
    async fn riesige_ttl_wird_abgelehnt() {
        let store = MemoryMessageStore::neu(10);
        let ergebnis = store
            .anhaengen("t", "x".into(), Duration::from_secs(u64::MAX))
            .await;
        assert!(matches!(ergebnis, Err(RelayError::UngueltigeParameter(_))));
        assert_eq!(store.anzahl("t").await, 0);
    }

    #[tokio::test]
    async fn bereinigen_entfernt_verfallene_und_leere_topics() {
        let store = MemoryMessageStore::neu(10);
        store.anhaengen("leer", "alt".into(), Duration::ZERO).await.unwrap();
        store.anhaengen("gemischt", "alt".into(), Duration::ZERO).await.unwrap();
        store.anhaengen("gemischt", "frisch".into(), STUNDE).await.unwrap();

        assert_eq!(store.bereinigen().await, 2);
        assert!(!store.topics.contains_key("leer"));
        assert_eq!(store.anzahl("gemischt").await, 1);
        assert_eq!(store.bereinigen().await, 0);
    }

    #[tokio::test]
    async fn topics_sind_getrennt() {
        let store = MemoryMessageStore::neu(10);
        store.anhaengen("a", "x".into(), STUNDE).await.unwrap();
        assert!(store.entnehmen("b").await.unwrap().is_empty());
        assert_eq!(store.anzahl("a").await, 1);
    }
}
