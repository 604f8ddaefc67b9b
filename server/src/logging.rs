//! Logging – tracing-subscriber fuer den Relay-Prozess
//!
//! `RUST_LOG` hat Vorrang vor dem Level aus der Konfiguration.

use crate::config::LoggingEinstellungen;

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Angaben fallen auf `Text` zurueck; `None` meldet das
    pub fn parsen(format: &str) -> Option<Self> {
        match format.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Initialisiert den globalen Subscriber und liefert das verwendete Format
pub fn initialisieren(einstellungen: &LoggingEinstellungen) -> LogFormat {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&einstellungen.level));
    let format = LogFormat::parsen(&einstellungen.format);

    match format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_current_span(false)
                .init();
        }
        LogFormat::Text => {
            fmt().with_env_filter(filter).with_target(false).compact().init();
        }
    }

    if format.is_none() {
        tracing::warn!(format = %einstellungen.format, "Unbekanntes Log-Format, verwende text");
    }
    format.unwrap_or(LogFormat::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formate_werden_erkannt() {
        assert_eq!(LogFormat::parsen("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parsen(" JSON "), Some(LogFormat::Json));
        assert_eq!(LogFormat::parsen("text"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parsen(""), Some(LogFormat::Text));
        assert_eq!(LogFormat::parsen("xml"), None);
    }
}
