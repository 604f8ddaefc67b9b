//! tandem-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Tandem-Crates gemeinsam genutzt werden: den zentralen Fehler-Enum,
//! Topic-Newtype, Ablaufziele und Zeit-Helfer.

pub mod error;
pub mod types;
pub mod zeit;

// Re-Exporte fuer bequemen Zugriff
pub use error::{TandemError, TandemResult};
pub use types::{ExpiryTarget, Topic};
