//! Zeit-Helfer – Ablaufzeitpunkte in Unix-Sekunden

/// Lebensdauer eines neu erstellten Pairings und eines Vorschlags
pub const FUENF_MINUTEN: i64 = 5 * 60;
/// Lebensdauer einer Session
pub const SIEBEN_TAGE: i64 = 7 * 24 * 60 * 60;
/// Lebensdauer eines aktivierten Pairings
pub const DREISSIG_TAGE: i64 = 30 * 24 * 60 * 60;

/// Aktuelle Zeit in Unix-Sekunden
pub fn jetzt_sek() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Zeitpunkt `sekunden` in der Zukunft
pub fn ab_jetzt(sekunden: i64) -> i64 {
    jetzt_sek() + sekunden
}

/// Ein Datensatz gilt ab `ablauf <= jetzt` als abgelaufen
pub fn ist_abgelaufen(ablauf: i64) -> bool {
    ablauf <= jetzt_sek()
}
