//! Store – persistente, nach Schluessel indizierte Tabelle
//!
//! Eine Tabelle pro Datensatzart (Pairings, Sessions, Vorschlaege,
//! JSON-RPC-Verlauf). Datensaetze mit Ablaufzeitpunkt werden vor jedem
//! Lesen geprueft: abgelaufene werden entfernt und als `Abgelaufen`
//! gemeldet, nie zurueckgegeben.
//!
//! Tabellen mit Nachlass (`Store::mit_nachlass`) behalten so entfernte
//! Datensaetze, bis `delete` sie abholt. Pairings und Sessions brauchen
//! das, um beim Ablauf-Timer noch ihre Schluessel aufzuraeumen.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_core::{zeit, TandemError, TandemResult};

use crate::storage::KeyValueStorage;

/// Datensaetze mit optionalem Ablaufzeitpunkt (Unix-Sekunden)
pub trait Ablaufend {
    fn ablauf(&self) -> Option<i64>;

    fn ist_abgelaufen(&self) -> bool {
        self.ablauf().map(zeit::ist_abgelaufen).unwrap_or(false)
    }
}

/// Persistente Tabelle `Schluessel -> T`
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<T> {
    name: String,
    schluessel: String,
    eintraege: DashMap<String, T>,
    nachlass: Option<DashMap<String, T>>,
    speicher: Arc<dyn KeyValueStorage>,
    initialisiert: AtomicBool,
}

impl<T> Store<T>
where
    T: Ablaufend + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// `name` erscheint in Fehlermeldungen, `schluessel` ist der Speicherschluessel
    pub fn neu(
        speicher: Arc<dyn KeyValueStorage>,
        name: impl Into<String>,
        schluessel: impl Into<String>,
    ) -> Self {
        Self::erzeugen(speicher, name.into(), schluessel.into(), None)
    }

    /// Wie `neu`, behaelt aber abgelaufene Datensaetze bis zum `delete`
    pub fn mit_nachlass(
        speicher: Arc<dyn KeyValueStorage>,
        name: impl Into<String>,
        schluessel: impl Into<String>,
    ) -> Self {
        Self::erzeugen(speicher, name.into(), schluessel.into(), Some(DashMap::new()))
    }

    fn erzeugen(
        speicher: Arc<dyn KeyValueStorage>,
        name: String,
        schluessel: String,
        nachlass: Option<DashMap<String, T>>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name,
                schluessel,
                eintraege: DashMap::new(),
                nachlass,
                speicher,
                initialisiert: AtomicBool::new(false),
            }),
        }
    }

    /// Laedt die Tabelle und verwirft abgelaufene Datensaetze
    ///
    /// Gibt die Schluessel der verworfenen Datensaetze zurueck.
    pub async fn init(&self) -> TandemResult<Vec<String>> {
        if self.inner.initialisiert.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        let mut verworfen = Vec::new();
        if let Some(wert) = self.inner.speicher.get_item(&self.inner.schluessel).await? {
            let datensaetze: Vec<(String, T)> = serde_json::from_value(wert)?;
            for (key, wert) in datensaetze {
                if wert.ist_abgelaufen() {
                    self.nachlassen(key.clone(), wert);
                    verworfen.push(key);
                } else {
                    self.inner.eintraege.insert(key, wert);
                }
            }
        }
        self.inner.initialisiert.store(true, Ordering::Release);
        if !verworfen.is_empty() {
            self.persistieren().await?;
        }
        tracing::debug!(
            store = %self.inner.name,
            anzahl = self.inner.eintraege.len(),
            verworfen = verworfen.len(),
            "Store geladen"
        );
        Ok(verworfen)
    }

    fn pruefe_init(&self) -> TandemResult<()> {
        if self.inner.initialisiert.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TandemError::NichtInitialisiert(self.inner.name.clone()))
        }
    }

    /// Legt einen Datensatz an oder ersetzt ihn
    pub async fn set(&self, key: impl Into<String>, wert: T) -> TandemResult<()> {
        self.pruefe_init()?;
        self.inner.eintraege.insert(key.into(), wert);
        self.persistieren().await
    }

    /// Liest einen Datensatz
    ///
    /// Fehlt er: `NichtGefunden`. Ist er abgelaufen: wird entfernt, `Abgelaufen`.
    pub async fn get(&self, key: &str) -> TandemResult<T> {
        self.pruefe_init()?;
        let wert = self
            .inner
            .eintraege
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| TandemError::NichtGefunden(format!("{} '{key}'", self.inner.name)))?;

        if wert.ist_abgelaufen() {
            if let Some((key, wert)) = self.inner.eintraege.remove(key) {
                self.nachlassen(key, wert);
            }
            self.persistieren().await?;
            return Err(TandemError::Abgelaufen(format!("{} '{key}'", self.inner.name)));
        }
        Ok(wert)
    }

    /// Gibt true zurueck wenn ein nicht abgelaufener Datensatz existiert
    pub async fn has(&self, key: &str) -> TandemResult<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(TandemError::NichtGefunden(_) | TandemError::Abgelaufen(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Aendert einen vorhandenen Datensatz
    ///
    /// Gleiche Fehler wie `get`; die Aenderung wird sofort persistiert.
    pub async fn update<F>(&self, key: &str, aenderung: F) -> TandemResult<T>
    where
        F: FnOnce(&mut T),
    {
        let mut wert = self.get(key).await?;
        aenderung(&mut wert);
        self.inner.eintraege.insert(key.to_string(), wert.clone());
        self.persistieren().await?;
        Ok(wert)
    }

    /// Entfernt einen Datensatz; gibt ihn zurueck falls vorhanden
    ///
    /// Ein bereits abgelaufener Datensatz kommt aus dem Nachlass.
    pub async fn delete(&self, key: &str) -> TandemResult<Option<T>> {
        self.pruefe_init()?;
        let nachgelassen = self
            .inner
            .nachlass
            .as_ref()
            .and_then(|n| n.remove(key))
            .map(|(_, v)| v);
        match self.inner.eintraege.remove(key) {
            Some((_, wert)) => {
                self.persistieren().await?;
                Ok(Some(wert))
            }
            None => Ok(nachgelassen),
        }
    }

    /// Alle nicht abgelaufenen Datensaetze; abgelaufene werden dabei entfernt
    pub async fn values(&self) -> TandemResult<Vec<(String, T)>> {
        self.pruefe_init()?;
        let mut gueltig = Vec::new();
        let mut abgelaufen = Vec::new();
        self.inner.eintraege.retain(|key, wert| {
            if wert.ist_abgelaufen() {
                abgelaufen.push((key.clone(), wert.clone()));
                false
            } else {
                gueltig.push((key.clone(), wert.clone()));
                true
            }
        });
        if !abgelaufen.is_empty() {
            for (key, wert) in abgelaufen {
                self.nachlassen(key, wert);
            }
            self.persistieren().await?;
        }
        Ok(gueltig)
    }

    /// Alle Schluessel (ohne Ablaufpruefung)
    pub fn keys(&self) -> Vec<String> {
        self.inner.eintraege.iter().map(|e| e.key().clone()).collect()
    }

    /// true fuer vorhandene und noch nicht abgeholte abgelaufene Datensaetze
    pub fn kennt(&self, key: &str) -> bool {
        self.inner.eintraege.contains_key(key)
            || self
                .inner
                .nachlass
                .as_ref()
                .map(|n| n.contains_key(key))
                .unwrap_or(false)
    }

    fn nachlassen(&self, key: String, wert: T) {
        if let Some(nachlass) = &self.inner.nachlass {
            nachlass.insert(key, wert);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.eintraege.is_empty()
    }

    async fn persistieren(&self) -> TandemResult<()> {
        let mut datensaetze: Vec<(String, T)> = self
            .inner
            .eintraege
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        datensaetze.sort_by(|a, b| a.0.cmp(&b.0));
        self.inner
            .speicher
            .set_item(&self.inner.schluessel, serde_json::to_value(datensaetze)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Eintrag {
        wert: u32,
        expiry: i64,
    }

    impl Ablaufend for Eintrag {
        fn ablauf(&self) -> Option<i64> {
            Some(self.expiry)
        }
    }

    fn gueltig(wert: u32) -> Eintrag {
        Eintrag {
            wert,
            expiry: zeit::ab_jetzt(60),
        }
    }

    fn abgelaufen(wert: u32) -> Eintrag {
        Eintrag {
            wert,
            expiry: zeit::jetzt_sek() - 1,
        }
    }

    async fn store(speicher: Arc<dyn KeyValueStorage>) -> Store<Eintrag> {
        let s = Store::neu(speicher, "Eintrag", "test:eintrag");
        s.init().await.unwrap();
        s
    }

    #[tokio::test]
    async fn setzen_lesen_aendern_loeschen() {
        let s = store(Arc::new(MemoryStorage::new())).await;
        s.set("a", gueltig(1)).await.unwrap();
        assert_eq!(s.get("a").await.unwrap().wert, 1);

        let neu = s.update("a", |e| e.wert = 2).await.unwrap();
        assert_eq!(neu.wert, 2);
        assert_eq!(s.get("a").await.unwrap().wert, 2);

        assert!(s.delete("a").await.unwrap().is_some());
        assert!(matches!(s.get("a").await, Err(TandemError::NichtGefunden(_))));
        assert!(s.delete("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abgelaufen_wird_beim_lesen_entfernt() {
        let s = store(Arc::new(MemoryStorage::new())).await;
        s.set("alt", abgelaufen(1)).await.unwrap();

        assert!(matches!(s.get("alt").await, Err(TandemError::Abgelaufen(_))));
        // Zweiter Zugriff: Datensatz ist weg
        assert!(matches!(s.get("alt").await, Err(TandemError::NichtGefunden(_))));
    }

    #[tokio::test]
    async fn update_auf_abgelaufenem_fehlschlag() {
        let s = store(Arc::new(MemoryStorage::new())).await;
        s.set("alt", abgelaufen(1)).await.unwrap();
        assert!(matches!(
            s.update("alt", |e| e.wert = 9).await,
            Err(TandemError::Abgelaufen(_))
        ));
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn values_filtert_abgelaufene() {
        let s = store(Arc::new(MemoryStorage::new())).await;
        s.set("a", gueltig(1)).await.unwrap();
        s.set("b", abgelaufen(2)).await.unwrap();
        let werte = s.values().await.unwrap();
        assert_eq!(werte, vec![("a".to_string(), gueltig(1))]);
        assert_eq!(s.len(), 1);
    }

    #[tokio::test]
    async fn init_verwirft_abgelaufene() {
        let speicher: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let erste = store(Arc::clone(&speicher)).await;
        erste.set("bleibt", gueltig(1)).await.unwrap();
        erste.set("weg", abgelaufen(2)).await.unwrap();

        let zweite = Store::<Eintrag>::neu(speicher, "Eintrag", "test:eintrag");
        let verworfen = zweite.init().await.unwrap();
        assert_eq!(verworfen, vec!["weg".to_string()]);
        assert_eq!(zweite.keys(), vec!["bleibt".to_string()]);
        assert!(zweite.has("bleibt").await.unwrap());
        assert!(!zweite.has("weg").await.unwrap());
    }

    #[tokio::test]
    async fn nachlass_haelt_abgelaufene_bis_delete() {
        let s = Store::mit_nachlass(Arc::new(MemoryStorage::new()), "Eintrag", "k");
        s.init().await.unwrap();
        s.set("alt", abgelaufen(7)).await.unwrap();

        assert!(matches!(s.get("alt").await, Err(TandemError::Abgelaufen(_))));
        assert!(s.keys().is_empty());
        assert!(s.kennt("alt"));

        let record = s.delete("alt").await.unwrap().expect("Datensatz aus dem Nachlass");
        assert_eq!(record.wert, 7);
        assert!(!s.kennt("alt"));
        assert!(s.delete("alt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ohne_nachlass_vergessen() {
        let s = store(Arc::new(MemoryStorage::new())).await;
        s.set("alt", abgelaufen(1)).await.unwrap();
        assert!(s.values().await.unwrap().is_empty());
        assert!(!s.kennt("alt"));
        assert!(s.delete("alt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vor_init_fehler() {
        let s = Store::<Eintrag>::neu(Arc::new(MemoryStorage::new()), "Eintrag", "k");
        assert!(matches!(
            s.set("a", gueltig(1)).await,
            Err(TandemError::NichtInitialisiert(_))
        ));
    }
}
