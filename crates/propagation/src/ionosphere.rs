//! Ionosphaeren-Zustand und abgeleitete Groessen
//!
//! Der prozessweite Zustand (Sonnenflussindex, K-Index, Jahreszeit)
//! wird ausschliesslich vom Ausbreitungsmodell mutiert; jede Mutation
//! erhoeht die Epoche. Abgeleitet werden die kritische Frequenz foF2,
//! die F-Schicht-Hoehe und die MUF fuer eine Streckenlaenge.

use serde::{Deserialize, Serialize};

use crate::grid::ERDRADIUS_KM;

/// Untergrenze des Sonnenflussindex
pub const SFI_MIN: u16 = 60;

/// Obergrenze des Sonnenflussindex
pub const SFI_MAX: u16 = 300;

/// Obergrenze des K-Index
pub const K_INDEX_MAX: u8 = 9;

// ---------------------------------------------------------------------------
// Jahreszeit
// ---------------------------------------------------------------------------

/// Jahreszeit (Nordhalbkugel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Jahreszeit {
    Winter = 0,
    Fruehling = 1,
    Sommer = 2,
    Herbst = 3,
}

impl Jahreszeit {
    /// Konvertiert den numerischen Wert (0..=3)
    pub fn from_u8(wert: u8) -> Option<Self> {
        match wert {
            0 => Some(Self::Winter),
            1 => Some(Self::Fruehling),
            2 => Some(Self::Sommer),
            3 => Some(Self::Herbst),
            _ => None,
        }
    }

    /// Jahreszeit aus dem Kalendermonat (1..=12)
    pub fn aus_monat(monat: u32) -> Self {
        match monat {
            12 | 1 | 2 => Self::Winter,
            3..=5 => Self::Fruehling,
            6..=8 => Self::Sommer,
            9..=11 => Self::Herbst,
            _ => Self::Winter,
        }
    }

    /// Anzeige-Name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Winter => "Winter",
            Self::Fruehling => "Fruehling",
            Self::Sommer => "Sommer",
            Self::Herbst => "Herbst",
        }
    }
}

// ---------------------------------------------------------------------------
// IonosphaerenZustand
// ---------------------------------------------------------------------------

/// Prozessweiter Ionosphaeren-Zustand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IonosphaerenZustand {
    /// Sonnenflussindex, geklemmt auf [60, 300]
    pub sfi: u16,
    /// Geomagnetischer K-Index, geklemmt auf [0, 9]
    pub k_index: u8,
    pub jahreszeit: Jahreszeit,
    /// Jahreszeit automatisch aus dem Datum ableiten
    pub auto_jahreszeit: bool,
    /// Zuletzt berechnete MUF in MHz
    pub muf: f32,
    /// Monotone Epoche; jede Mutation erhoeht sie
    pub epoche: u64,
}

impl IonosphaerenZustand {
    /// Erstellt den Standard-Zustand (SFI 120, K 3, Winter, auto)
    pub fn neu() -> Self {
        Self {
            sfi: 120,
            k_index: 3,
            jahreszeit: Jahreszeit::Winter,
            auto_jahreszeit: true,
            muf: 0.0,
            epoche: 0,
        }
    }

    /// Klemmt einen SFI-Wert auf den gueltigen Bereich
    pub fn sfi_klemmen(sfi: u16) -> u16 {
        sfi.clamp(SFI_MIN, SFI_MAX)
    }

    /// Klemmt einen K-Index auf den gueltigen Bereich
    pub fn k_index_klemmen(k: u8) -> u8 {
        k.min(K_INDEX_MAX)
    }

    /// Kritische Frequenz foF2 in MHz
    ///
    /// `5.0 * Sonnenfaktor * Geomagnetikfaktor * Jahreszeitfaktor`
    pub fn kritische_frequenz(&self) -> f64 {
        let sonnenfaktor = 1.0 + (f64::from(self.sfi) - 100.0) / 100.0;
        let geomagnetikfaktor = 1.0 - (f64::from(self.k_index) / 9.0) * 0.5;
        let jahreszeitfaktor = match self.jahreszeit {
            Jahreszeit::Winter => 0.8,
            Jahreszeit::Fruehling => 1.0,
            Jahreszeit::Sommer => 1.2,
            Jahreszeit::Herbst => 1.0,
        };
        5.0 * sonnenfaktor * geomagnetikfaktor * jahreszeitfaktor
    }

    /// Hoehe der F-Schicht in Kilometern
    pub fn f_schicht_hoehe(&self) -> f64 {
        let sonnenfaktor = 1.0 + (f64::from(self.sfi) - 100.0) / 200.0;
        let geomagnetikfaktor = 1.0 + (f64::from(self.k_index) / 9.0) * 0.2;
        let jahreszeitfaktor = match self.jahreszeit {
            Jahreszeit::Winter => 1.1,
            Jahreszeit::Fruehling => 1.0,
            Jahreszeit::Sommer => 0.9,
            Jahreszeit::Herbst => 1.0,
        };
        300.0 * sonnenfaktor * geomagnetikfaktor * jahreszeitfaktor
    }

    /// Maximal nutzbare Frequenz fuer eine Streckenlaenge in MHz
    ///
    /// Hops aus der maximalen Einzelsprung-Distanz, Abstrahlwinkel aus
    /// Schichthoehe und Sprunglaenge, MUF = foF2 / cos(Winkel).
    pub fn muf_fuer_distanz(&self, distanz_km: f64) -> f64 {
        let fo_f2 = self.kritische_frequenz();
        let hoehe = self.f_schicht_hoehe();

        // Sehr kurze Strecken laufen auf Steilstrahlung hinaus
        let distanz = distanz_km.max(1.0);

        let max_sprung = 2.0 * (hoehe * 2.0 * ERDRADIUS_KM).sqrt();
        let hops = (distanz / max_sprung).ceil().max(1.0);

        let abstrahlwinkel = (hoehe / (distanz / (2.0 * hops))).atan();
        let sekans = 1.0 / abstrahlwinkel.cos();

        fo_f2 * sekans
    }
}

impl Default for IonosphaerenZustand {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
