//! Gemeinsame Identifikationstypen fuer Kurzwelle
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Anders als
//! bei UUID-basierten Systemen sind die IDs hier kleine Ganzzahlen,
//! weil das Wire-Protokoll sie so uebertraegt: Session-IDs sind
//! ephemere 32-Bit-Werte pro Serverlauf, Kanal 0 ist immer der Root.

use serde::{Deserialize, Serialize};

/// Ephemere Session-ID eines verbundenen Clients
///
/// Wird pro Serverlauf monoton vergeben und niemals wiederverwendet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Persistente Benutzer-ID aus dem Benutzer-Store
///
/// IDs <= 0 bezeichnen nicht registrierte (anonyme) Verbindungen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl UserId {
    /// Prueft ob die ID zu einem registrierten Benutzer gehoert
    pub fn ist_registriert(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Kanal-ID im Kanalbaum
///
/// Kanal 0 ist der Root-Kanal und existiert immer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Der Root-Kanal
    pub const ROOT: ChannelId = ChannelId(0);

    /// Prueft ob dies der Root-Kanal ist
    pub fn ist_root(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kanal:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Benutzer-Eigenschaften
// ---------------------------------------------------------------------------

/// Tag einer persistierten Benutzer-Eigenschaft
///
/// Die numerischen Werte sind Teil des Store-Formats und duerfen nicht
/// veraendert werden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EigenschaftsTag {
    /// Freitext-Kommentar im Profil
    Kommentar = 0,
    /// E-Mail-Adresse
    Email = 1,
    /// ID des Textur-Blobs (Avatar)
    TexturBlob = 2,
    /// Zeitstempel der letzten Aktivitaet
    ZuletztGesehen = 3,
    /// Kanal beim letzten Disconnect
    LetzterKanal = 4,
    /// Maidenhead-Locator (4 oder 6 Zeichen)
    GridLocator = 5,
    /// Bevorzugtes HF-Band (Meterangabe, z.B. "20")
    BevorzugtesBand = 6,
    /// Admin-Flag ("1" = Administrator)
    Admin = 7,
    /// Nur-Hoeren-Flag: Benutzer darf empfangen aber nicht senden
    NurHoeren = 8,
    /// Antennentyp (Freitext, z.B. "Dipol")
    AntennenTyp = 9,
    /// Antennengewinn in dBi
    AntennenGewinn = 10,
    /// Sendeleistung in Watt
    Sendeleistung = 11,
}

impl EigenschaftsTag {
    /// Konvertiert einen numerischen Tag in die Enum-Variante
    pub fn from_u16(wert: u16) -> Option<Self> {
        match wert {
            0 => Some(Self::Kommentar),
            1 => Some(Self::Email),
            2 => Some(Self::TexturBlob),
            3 => Some(Self::ZuletztGesehen),
            4 => Some(Self::LetzterKanal),
            5 => Some(Self::GridLocator),
            6 => Some(Self::BevorzugtesBand),
            7 => Some(Self::Admin),
            8 => Some(Self::NurHoeren),
            9 => Some(Self::AntennenTyp),
            10 => Some(Self::AntennenGewinn),
            11 => Some(Self::Sendeleistung),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_anzeige() {
        let id = SessionId(42);
        assert_eq!(id.to_string(), "session:42");
    }

    #[test]
    fn root_kanal() {
        assert!(ChannelId::ROOT.ist_root());
        assert!(!ChannelId(40).ist_root());
    }

    #[test]
    fn user_id_registriert() {
        assert!(UserId(1).ist_registriert());
        assert!(!UserId(0).ist_registriert());
        assert!(!UserId(-1).ist_registriert());
    }

    #[test]
    fn eigenschafts_tag_round_trip() {
        for wert in 0u16..=11 {
            let tag = EigenschaftsTag::from_u16(wert).expect("Tag muss existieren");
            assert_eq!(tag as u16, wert);
        }
        assert!(EigenschaftsTag::from_u16(99).is_none());
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let id = SessionId(7);
        let json = serde_json::to_string(&id).unwrap();
        let id2: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }
}
