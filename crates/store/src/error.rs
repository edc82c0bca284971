//! Fehlertypen der Store-Schicht

use thiserror::Error;

/// Result-Alias fuer Store-Operationen
pub type StoreResult<T> = Result<T, StoreError>;

/// Fehler der Store-Schicht
#[derive(Debug, Error)]
pub enum StoreError {
    /// Eindeutigkeitsverletzung (z.B. Name bereits registriert)
    #[error("Konflikt: {0}")]
    Konflikt(String),

    /// Datensatz existiert nicht
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Backend-Fehler (I/O, Verbindung)
    #[error("Store-Backend: {0}")]
    Backend(String),
}

impl From<StoreError> for kurzwelle_core::KurzwelleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Konflikt(m) => Self::Konflikt(m),
            StoreError::NichtGefunden(m) => Self::NichtGefunden(m),
            StoreError::Backend(m) => Self::Speicher(m),
        }
    }
}
