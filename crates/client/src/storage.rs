//! Key-Value-Speicher fuer persistenten Client-Zustand
//!
//! Das `KeyValueStorage`-Trait abstrahiert das Backend. Werte sind JSON.
//! Mitgeliefert werden ein In-Memory-Speicher (Tests, fluechtige Clients)
//! und ein Datei-Speicher mit einer JSON-Datei pro Schluessel.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use tandem_core::TandemResult;

/// Abstrakter Key-Value-Speicher
#[async_trait]
pub trait KeyValueStorage: Send + Sync + 'static {
    /// Wert lesen; `None` wenn der Schluessel fehlt
    async fn get_item(&self, key: &str) -> TandemResult<Option<Value>>;

    /// Wert schreiben (ersetzt vorhandene)
    async fn set_item(&self, key: &str, value: Value) -> TandemResult<()>;

    /// Wert entfernen; fehlende Schluessel sind kein Fehler
    async fn remove_item(&self, key: &str) -> TandemResult<()>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Fluechtiger Speicher im Prozess
#[derive(Debug, Default)]
pub struct MemoryStorage {
    werte: DashMap<String, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> TandemResult<Option<Value>> {
        Ok(self.werte.get(key).map(|v| v.value().clone()))
    }

    async fn set_item(&self, key: &str, value: Value) -> TandemResult<()> {
        self.werte.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> TandemResult<()> {
        self.werte.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// Datei-Speicher: `base_dir/<schluessel>.json`
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Neuer Datei-Speicher unter dem angegebenen Verzeichnis
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Dateipfad zu einem Schluessel; `:` `/` `@` werden ersetzt
    fn pfad(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' | '@' => '_',
                andere => andere,
            })
            .collect();
        self.base_dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> TandemResult<Option<Value>> {
        let pfad = self.pfad(key);
        match tokio::fs::read(&pfad).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> TandemResult<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let pfad = self.pfad(key);
        let bytes = serde_json::to_vec(&value)?;

        // Erst in Temp-Datei schreiben, dann umbenennen
        let tmp = pfad.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &pfad).await?;
        tracing::trace!(pfad = %pfad.display(), bytes = bytes.len(), "Wert gespeichert");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> TandemResult<()> {
        match tokio::fs::remove_file(self.pfad(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
