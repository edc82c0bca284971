//! Fehlertypen fuer Kurzwelle
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule koennen eigene Fehler definieren und via `#[from]`
//! konvertieren. Die Behandlungsregel pro Variante ist bewusst Teil
//! des Typs: `beendet_session()` entscheidet ob die Verbindung eines
//! Clients nach diesem Fehler geschlossen wird.

use thiserror::Error;

/// Globaler Result-Alias fuer Kurzwelle
pub type Result<T> = std::result::Result<T, KurzwelleError>;

/// Alle moeglichen Fehler im Kurzwelle-System
#[derive(Debug, Error)]
pub enum KurzwelleError {
    // --- Verbindung & Netzwerk ---
    #[error("Transportfehler: {0}")]
    Transport(String),

    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Abgebrochen: {0}")]
    Abgebrochen(String),

    #[error("Rate-Limit erreicht: {0}")]
    RateLimit(String),

    // --- Authentifizierung & Autorisierung ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Auth(String),

    #[error("Zugriff verweigert: {0}")]
    ZugriffVerweigert(String),

    // --- Eingaben ---
    #[error("Ungueltige Eingabe: {0}")]
    Validierung(String),

    // --- Ressourcen ---
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Konflikt: {0}")]
    Konflikt(String),

    // --- Persistenz ---
    #[error("Store-Fehler: {0}")]
    Speicher(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl KurzwelleError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler die Session des Verursachers beendet
    ///
    /// Transport- und Protokollfehler sind fuer eine Verbindung fatal;
    /// Berechtigungs- und Validierungsfehler werden beantwortet, die
    /// Session lebt weiter.
    pub fn beendet_session(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protokoll(_))
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Transport(_) | Self::Speicher(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = KurzwelleError::Auth("Falsches Passwort".into());
        assert_eq!(
            e.to_string(),
            "Authentifizierung fehlgeschlagen: Falsches Passwort"
        );
    }

    #[test]
    fn session_beendende_fehler() {
        assert!(KurzwelleError::Transport("Reset".into()).beendet_session());
        assert!(KurzwelleError::Protokoll("Kaputter Frame".into()).beendet_session());
        assert!(!KurzwelleError::ZugriffVerweigert("Speak".into()).beendet_session());
        assert!(!KurzwelleError::Validierung("Locator".into()).beendet_session());
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(KurzwelleError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(KurzwelleError::Speicher("test".into()).ist_wiederholbar());
        assert!(!KurzwelleError::ZugriffVerweigert("test".into()).ist_wiederholbar());
    }
}
