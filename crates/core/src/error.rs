//! Fehlertypen fuer Tandem
//!
//! Zentraler Fehler-Enum fuer Client-Komponenten (Expirer, Store, Subscriber,
//! Relayer, Pairing, Session, Engine). Krypto- und Protokoll-Crates
//! definieren eigene Fehler und liefern `From`-Konvertierungen hierher.

use thiserror::Error;

/// Globaler Result-Alias fuer Tandem
pub type TandemResult<T> = std::result::Result<T, TandemError>;

/// Alle Fehlerzustaende, die ein Aufrufer unterscheiden koennen muss
#[derive(Debug, Error)]
pub enum TandemError {
    // --- Eingaben ---
    #[error("Ungueltige Parameter: {0}")]
    Validierung(String),

    // --- Lebenszyklus ---
    #[error("Nicht initialisiert: {0}")]
    NichtInitialisiert(String),

    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Existiert bereits: {0}")]
    BereitsVorhanden(String),

    #[error("Abgelaufen: {0}")]
    Abgelaufen(String),

    #[error("Nicht autorisiert: {0}")]
    NichtAutorisiert(String),

    // --- Verbindung ---
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Transportfehler: {0}")]
    Transport(String),

    /// Gegenstelle hat mit einem JSON-RPC-Fehler geantwortet
    #[error("Fehler der Gegenstelle ({code}): {nachricht}")]
    Peer { code: i64, nachricht: String },

    // --- Untersysteme ---
    #[error("Kryptofehler: {0}")]
    Krypto(String),

    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Speicherfehler: {0}")]
    Speicher(String),

    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TandemError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Validierungsfehler
    pub fn validierung(msg: impl Into<String>) -> Self {
        Self::Validierung(msg.into())
    }

    /// Erstellt einen "nicht gefunden"-Fehler
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Zeitlimit(_) | Self::Transport(_))
    }

    /// Gibt true zurueck wenn ein Datensatz wegen Ablauf entfernt wurde
    pub fn ist_abgelaufen(&self) -> bool {
        matches!(self, Self::Abgelaufen(_))
    }
}
