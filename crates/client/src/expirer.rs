//! Expirer – Ablauf-Registry fuer Topics und Ids
//!
//! Pro Ziel (`topic:<t>` oder `id:<n>`) gibt es genau einen Timer. Ein
//! Hintergrund-Task prueft im Takt `ablauf_intervall`, feuert
//! `ExpirerEvent::Abgelaufen` genau einmal und entfernt den Timer danach.
//! Die Registry wird nach jeder Aenderung persistiert.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_core::{zeit, ExpiryTarget, TandemError, TandemResult};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::storage::KeyValueStorage;

/// Kapazitaet des Event-Kanals
const EVENT_KAPAZITAET: usize = 256;

/// Ereignisse des Expirers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpirerEvent {
    Erstellt { target: ExpiryTarget, expiry: i64 },
    Geloescht { target: ExpiryTarget },
    Abgelaufen { target: ExpiryTarget, expiry: i64 },
}

/// Persistierter Timer
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Timer {
    target: ExpiryTarget,
    expiry: i64,
}

/// Ablauf-Registry
#[derive(Clone)]
pub struct Expirer {
    inner: Arc<ExpirerInner>,
}

struct ExpirerInner {
    timer: DashMap<ExpiryTarget, i64>,
    events: broadcast::Sender<ExpirerEvent>,
    speicher: Arc<dyn KeyValueStorage>,
    schluessel: String,
    initialisiert: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ExpirerInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl Expirer {
    pub fn neu(speicher: Arc<dyn KeyValueStorage>, schluessel: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_KAPAZITAET);
        Self {
            inner: Arc::new(ExpirerInner {
                timer: DashMap::new(),
                events,
                speicher,
                schluessel: schluessel.into(),
                initialisiert: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Laedt persistierte Timer; bereits abgelaufene feuern beim naechsten Takt
    pub async fn init(&self) -> TandemResult<()> {
        if self.inner.initialisiert.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(wert) = self.inner.speicher.get_item(&self.inner.schluessel).await? {
            let timer: Vec<Timer> = serde_json::from_value(wert)?;
            for t in timer {
                self.inner.timer.insert(t.target, t.expiry);
            }
        }
        self.inner.initialisiert.store(true, Ordering::Release);
        tracing::debug!(anzahl = self.inner.timer.len(), "Expirer initialisiert");
        Ok(())
    }

    fn pruefe_init(&self) -> TandemResult<()> {
        if self.inner.initialisiert.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TandemError::NichtInitialisiert("Expirer".into()))
        }
    }

    /// Startet den Pruef-Task; ein laufender Task wird ersetzt
    pub fn starten(&self, intervall: Duration) {
        let schwach: Weak<ExpirerInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut takt = tokio::time::interval(intervall);
            takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                takt.tick().await;
                let Some(inner) = schwach.upgrade() else { break };
                let expirer = Expirer { inner };
                if let Err(e) = expirer.pruefen().await {
                    tracing::warn!(fehler = %e, "Ablaufpruefung fehlgeschlagen");
                }
            }
        });
        if let Some(alt) = self.inner.task.lock().replace(task) {
            alt.abort();
        }
    }

    /// Beendet den Pruef-Task
    pub fn stoppen(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }

    /// Abonniert Expirer-Ereignisse
    pub fn abonnieren(&self) -> broadcast::Receiver<ExpirerEvent> {
        self.inner.events.subscribe()
    }

    pub fn has(&self, target: &ExpiryTarget) -> bool {
        self.inner.timer.contains_key(target)
    }

    pub fn get(&self, target: &ExpiryTarget) -> Option<i64> {
        self.inner.timer.get(target).map(|e| *e.value())
    }

    /// Alle Timer (Ziel, Ablauf)
    pub fn values(&self) -> Vec<(ExpiryTarget, i64)> {
        self.inner
            .timer
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Setzt oder ersetzt den Timer eines Ziels
    pub async fn set(&self, target: ExpiryTarget, expiry: i64) -> TandemResult<()> {
        self.pruefe_init()?;
        self.inner.timer.insert(target.clone(), expiry);
        self.persistieren().await?;
        let _ = self.inner.events.send(ExpirerEvent::Erstellt { target, expiry });
        Ok(())
    }

    /// Entfernt den Timer eines Ziels (ohne Ablaufereignis)
    pub async fn del(&self, target: &ExpiryTarget) -> TandemResult<()> {
        self.pruefe_init()?;
        if self.inner.timer.remove(target).is_some() {
            self.persistieren().await?;
            let _ = self.inner.events.send(ExpirerEvent::Geloescht {
                target: target.clone(),
            });
        }
        Ok(())
    }

    /// Feuert alle faelligen Timer und gibt deren Ziele zurueck
    pub async fn pruefen(&self) -> TandemResult<Vec<ExpiryTarget>> {
        self.pruefe_init()?;
        let jetzt = zeit::jetzt_sek();
        let faellig: Vec<(ExpiryTarget, i64)> = self
            .inner
            .timer
            .iter()
            .filter(|e| *e.value() <= jetzt)
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        if faellig.is_empty() {
            return Ok(Vec::new());
        }

        let mut gefeuert = Vec::with_capacity(faellig.len());
        for (target, expiry) in faellig {
            // remove_if: ein zwischenzeitlich verlaengerter Timer bleibt stehen
            if self
                .inner
                .timer
                .remove_if(&target, |_, ablauf| *ablauf <= jetzt)
                .is_some()
            {
                tracing::debug!(ziel = %target, "Timer abgelaufen");
                let _ = self.inner.events.send(ExpirerEvent::Abgelaufen {
                    target: target.clone(),
                    expiry,
                });
                gefeuert.push(target);
            }
        }
        self.persistieren().await?;
        Ok(gefeuert)
    }

    async fn persistieren(&self) -> TandemResult<()> {
        let timer: Vec<Timer> = self
            .values()
            .into_iter()
            .map(|(target, expiry)| Timer { target, expiry })
            .collect();
        self.inner
            .speicher
            .set_item(&self.inner.schluessel, serde_json::to_value(timer)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tandem_core::Topic;

    async fn expirer() -> Expirer {
        let e = Expirer::neu(Arc::new(MemoryStorage::new()), "test:expirer");
        e.init().await.unwrap();
        e
    }

    fn topic(n: u8) -> ExpiryTarget {
        ExpiryTarget::Topic(Topic::aus_bytes(&[n; 32]))
    }

    #[tokio::test]
    async fn faelliger_timer_feuert_genau_einmal() {
        let e = expirer().await;
        let mut rx = e.abonnieren();

        e.set(topic(1), zeit::jetzt_sek() - 1).await.unwrap();
        e.set(topic(2), zeit::ab_jetzt(60)).await.unwrap();

        let gefeuert = e.pruefen().await.unwrap();
        assert_eq!(gefeuert, vec![topic(1)]);
        assert!(!e.has(&topic(1)));
        assert!(e.has(&topic(2)));
        assert!(e.pruefen().await.unwrap().is_empty());

        // Erstellt, Erstellt, Abgelaufen
        let mut abgelaufen = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, ExpirerEvent::Abgelaufen { .. }) {
                abgelaufen += 1;
            }
        }
        assert_eq!(abgelaufen, 1);
    }

    #[tokio::test]
    async fn setzen_ersetzt_timer() {
        let e = expirer().await;
        e.set(ExpiryTarget::Id(5), zeit::jetzt_sek() - 10).await.unwrap();
        e.set(ExpiryTarget::Id(5), zeit::ab_jetzt(100)).await.unwrap();
        assert!(e.pruefen().await.unwrap().is_empty());
        assert_eq!(e.values().len(), 1);
    }

    #[tokio::test]
    async fn loeschen_feuert_nicht() {
        let e = expirer().await;
        e.set(ExpiryTarget::Id(1), zeit::jetzt_sek()).await.unwrap();
        e.del(&ExpiryTarget::Id(1)).await.unwrap();
        assert!(e.pruefen().await.unwrap().is_empty());
        assert_eq!(e.get(&ExpiryTarget::Id(1)), None);
    }

    #[tokio::test]
    async fn persistenz_ueber_instanzen() {
        let speicher: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let erste = Expirer::neu(Arc::clone(&speicher), "k");
        erste.init().await.unwrap();
        erste.set(topic(4), zeit::ab_jetzt(30)).await.unwrap();

        let zweite = Expirer::neu(speicher, "k");
        zweite.init().await.unwrap();
        assert!(zweite.has(&topic(4)));
    }

    #[tokio::test]
    async fn hintergrund_task_feuert() {
        let e = expirer().await;
        let mut rx = e.abonnieren();
        e.set(ExpiryTarget::Id(42), zeit::jetzt_sek()).await.unwrap();
        e.starten(Duration::from_millis(20));

        let ereignis = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(ExpirerEvent::Abgelaufen { target, .. }) = rx.recv().await {
                    return target;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(ereignis, ExpiryTarget::Id(42));
        e.stoppen();
    }

    #[tokio::test]
    async fn ohne_init_fehler() {
        let e = Expirer::neu(Arc::new(MemoryStorage::new()), "k");
        assert!(e.set(ExpiryTarget::Id(1), 0).await.is_err());
    }
}
