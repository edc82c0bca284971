//! Event-Bus
//!
//! Minimales Publish/Subscribe-Primitiv: Thema (String) -> Payload
//! (Ereignis-Variante). Publisher blockieren nie auf Abonnenten;
//! Zustellung ist best-effort in-process. Zwischen Themen gibt es keine
//! Ordnungsgarantie, innerhalb eines Themas bleibt die
//! Veroeffentlichungs-Reihenfolge erhalten.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use kurzwelle_core::types::{SessionId, UserId};

/// Standard-Kapazitaet eines Themen-Kanals
const STANDARD_KAPAZITAET: usize = 256;

// ---------------------------------------------------------------------------
// Themen
// ---------------------------------------------------------------------------

/// Feste Themennamen des Busses
pub mod themen {
    pub const AUSBREITUNG_AKTUALISIERT: &str = "ausbreitung-aktualisiert";
    pub const SIGNALSTAERKE_GEAENDERT: &str = "signalstaerke-geaendert";
    pub const MUF_GEAENDERT: &str = "muf-geaendert";
    pub const EXTERNE_DATEN_AKTUALISIERT: &str = "externe-daten-aktualisiert";
    pub const BENUTZER_AUTHENTIFIZIERT: &str = "benutzer-authentifiziert";
    pub const BENUTZER_REGISTRIERT: &str = "benutzer-registriert";
    pub const BENUTZER_DEREGISTRIERT: &str = "benutzer-deregistriert";
    pub const BENUTZER_EIGENSCHAFTEN_GEAENDERT: &str = "benutzer-eigenschaften-geaendert";
}

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Alle systemweiten Ereignisse die ueber den Bus fliessen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Ereignis {
    /// Ionosphaeren-Zustand hat sich geaendert (Epoche wurde erhoeht)
    AusbreitungAktualisiert {
        sfi: u16,
        k_index: u8,
        jahreszeit: u8,
        epoche: u64,
    },
    /// Signalstaerke eines Locator-Paars wurde neu berechnet
    ///
    /// Abonnenten sehen den neuen Wert moeglicherweise bevor der
    /// Paar-Cache befuellt ist -- die Nachricht ist ein Hinweis, kein
    /// verbindlicher Zustand.
    SignalstaerkeGeaendert {
        grid_a: String,
        grid_b: String,
        staerke: f32,
    },
    /// Die berechnete MUF hat sich geaendert
    MufGeaendert { muf: f32 },
    /// Externe Sonnenwetter-Daten wurden eingespielt
    ExterneDatenAktualisiert { quelle: String, erfolg: bool },
    /// Eine Session hat den Handshake abgeschlossen
    BenutzerAuthentifiziert {
        session: SessionId,
        user_id: UserId,
    },
    /// Ein Benutzer wurde registriert
    BenutzerRegistriert { user_id: UserId },
    /// Ein Benutzer wurde deregistriert
    BenutzerDeregistriert { user_id: UserId },
    /// Persistierte Eigenschaften eines Benutzers haben sich geaendert
    BenutzerEigenschaftenGeaendert { user_id: UserId },
}

impl Ereignis {
    /// Thema unter dem dieses Ereignis veroeffentlicht wird
    pub fn thema(&self) -> &'static str {
        match self {
            Self::AusbreitungAktualisiert { .. } => themen::AUSBREITUNG_AKTUALISIERT,
            Self::SignalstaerkeGeaendert { .. } => themen::SIGNALSTAERKE_GEAENDERT,
            Self::MufGeaendert { .. } => themen::MUF_GEAENDERT,
            Self::ExterneDatenAktualisiert { .. } => themen::EXTERNE_DATEN_AKTUALISIERT,
            Self::BenutzerAuthentifiziert { .. } => themen::BENUTZER_AUTHENTIFIZIERT,
            Self::BenutzerRegistriert { .. } => themen::BENUTZER_REGISTRIERT,
            Self::BenutzerDeregistriert { .. } => themen::BENUTZER_DEREGISTRIERT,
            Self::BenutzerEigenschaftenGeaendert { .. } => {
                themen::BENUTZER_EIGENSCHAFTEN_GEAENDERT
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Themenbasierter Event-Bus ueber tokio broadcast-Kanaele
///
/// Thread-safe und `Clone`-faehig; Clones teilen denselben Zustand.
#[derive(Clone)]
pub struct EventBus {
    themen: std::sync::Arc<DashMap<String, broadcast::Sender<Ereignis>>>,
    kapazitaet: usize,
}

impl EventBus {
    /// Erstellt einen Bus mit Standard-Kapazitaet pro Thema
    pub fn neu() -> Self {
        Self::mit_kapazitaet(STANDARD_KAPAZITAET)
    }

    /// Erstellt einen Bus mit eigener Kanal-Kapazitaet
    pub fn mit_kapazitaet(kapazitaet: usize) -> Self {
        Self {
            themen: std::sync::Arc::new(DashMap::new()),
            kapazitaet,
        }
    }

    fn sender(&self, thema: &str) -> broadcast::Sender<Ereignis> {
        self.themen
            .entry(thema.to_string())
            .or_insert_with(|| broadcast::channel(self.kapazitaet).0)
            .clone()
    }

    /// Veroeffentlicht ein Ereignis; blockiert nie
    ///
    /// Gibt die Anzahl der Abonnenten zurueck die das Ereignis
    /// empfangen haben. Langsame Abonnenten verlieren die aeltesten
    /// Nachrichten (best-effort).
    pub fn veroeffentlichen(&self, ereignis: Ereignis) -> usize {
        let thema = ereignis.thema();
        let sender = self.sender(thema);
        match sender.send(ereignis) {
            Ok(anzahl) => anzahl,
            Err(_) => {
                // Keine Abonnenten: Ereignis verfaellt
                tracing::trace!(thema, "Ereignis ohne Abonnenten verworfen");
                0
            }
        }
    }

    /// Abonniert ein Thema
    pub fn abonnieren(&self, thema: &str) -> broadcast::Receiver<Ereignis> {
        self.sender(thema).subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
