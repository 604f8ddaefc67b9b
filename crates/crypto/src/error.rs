//! Fehlertypen fuer das Kryptografie-Subsystem

use tandem_core::TandemError;
use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Ungueltiger Umschlag: {0}")]
    UngueltigerUmschlag(String),

    #[error("Kein Schluessel fuer '{0}'")]
    KeinSchluessel(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Hex-Dekodierung fehlgeschlagen: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl From<CryptoError> for TandemError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeinSchluessel(tag) => {
                TandemError::NichtGefunden(format!("Schluessel '{tag}'"))
            }
            andere => TandemError::Krypto(andere.to_string()),
        }
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
