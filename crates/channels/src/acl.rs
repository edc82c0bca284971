//! ACL-Auswertung
//!
//! Effektive Berechtigungen eines Benutzers in einem Kanal ergeben sich
//! aus dem Pfad vom Root zum Kanal: an jedem Knoten traegt jede passende
//! ACL-Zeile bei -- Erlauben-Bits kommen zur laufenden Menge hinzu,
//! Verweigern-Bits werden entfernt. Zeilen mit `unterkanaele_anwenden`
//! wirken auf Nachfahren, Zeilen mit `hier_anwenden` nur auf den Knoten
//! selbst. Das Ergebnis wird pro (Benutzer, Kanal) gecacht; jede
//! Aenderung an Zeilen, Gruppen oder der Baumstruktur invalidiert den
//! betroffenen Unterbaum.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use kurzwelle_core::types::{ChannelId, UserId};
use kurzwelle_store::models::AclZeile;

use crate::tree::KanalBaum;

// ---------------------------------------------------------------------------
// Berechtigungs-Bits
// ---------------------------------------------------------------------------

/// Berechtigungs-Bitmasken
///
/// Die Werte sind Teil des Wire-Formats und der persistierten ACL-Zeilen.
pub struct Berechtigung;

impl Berechtigung {
    pub const KEINE: u32 = 0x0000_0000;
    /// ACL und Kanaldaten schreiben
    pub const SCHREIBEN: u32 = 0x0000_0001;
    /// Kanal auf dem Weg zu einem Unterkanal durchqueren
    pub const DURCHQUEREN: u32 = 0x0000_0002;
    /// Kanal betreten
    pub const BETRETEN: u32 = 0x0000_0004;
    /// Im Kanal sprechen
    pub const SPRECHEN: u32 = 0x0000_0008;
    /// Andere stummschalten/taub schalten
    pub const MUTE_DEAF: u32 = 0x0000_0010;
    /// Andere Benutzer verschieben
    pub const VERSCHIEBEN: u32 = 0x0000_0020;
    /// Unterkanal anlegen
    pub const KANAL_ANLEGEN: u32 = 0x0000_0040;
    /// Kanaele linken
    pub const KANAL_LINKEN: u32 = 0x0000_0080;
    /// In den Kanal fluestern
    pub const FLUESTERN: u32 = 0x0000_0100;
    /// Textnachrichten senden
    pub const TEXTNACHRICHT: u32 = 0x0000_0200;
    /// Temporaeren Kanal anlegen
    pub const TEMP_KANAL_ANLEGEN: u32 = 0x0000_0400;
    /// Mithoerer-Bindung auf den Kanal registrieren
    pub const MITHOEREN: u32 = 0x0000_0800;

    // HF-spezifische Berechtigungen
    /// Eigenen Grid-Locator setzen
    pub const GRID_LOCATOR_SETZEN: u32 = 0x1000_0000;
    /// Bandplan (Band-Kanaele) veraendern
    pub const BANDPLAN_AENDERN: u32 = 0x2000_0000;
    /// Ionosphaeren-Parameter konfigurieren
    pub const AUSBREITUNG_KONFIGURIEREN: u32 = 0x4000_0000;

    pub const ALLE: u32 = 0xFFFF_FFFF;

    /// Standard-Berechtigungen wenn keine ACL-Zeile greift
    pub const STANDARD: u32 = Self::DURCHQUEREN
        | Self::BETRETEN
        | Self::SPRECHEN
        | Self::FLUESTERN
        | Self::TEXTNACHRICHT
        | Self::MITHOEREN
        | Self::TEMP_KANAL_ANLEGEN
        | Self::GRID_LOCATOR_SETZEN;
}

// ---------------------------------------------------------------------------
// Benutzer-Kontext
// ---------------------------------------------------------------------------

/// Auswertungs-Kontext eines Benutzers
#[derive(Debug, Clone, Default)]
pub struct BenutzerKontext {
    pub user_id: UserId,
    /// Gruppen des Benutzers (inkl. temporaerer Gruppen des Kanals)
    pub gruppen: BTreeSet<String>,
    /// Administratoren erhalten alle Berechtigungen
    pub admin: bool,
}

impl BenutzerKontext {
    /// Erstellt einen Kontext ohne Gruppen
    pub fn neu(user_id: UserId) -> Self {
        Self {
            user_id,
            gruppen: BTreeSet::new(),
            admin: false,
        }
    }

    fn zeile_passt(&self, zeile: &AclZeile) -> bool {
        if let Some(uid) = zeile.user_id {
            return uid == self.user_id;
        }
        if let Some(gruppe) = &zeile.gruppe {
            // "@all" trifft jeden Benutzer
            return gruppe == "all" || self.gruppen.contains(gruppe);
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Auswertung mit Cache
// ---------------------------------------------------------------------------

/// ACL-Zeilen aller Kanaele plus Auswertungs-Cache
///
/// Der Cache ist intern gelockt: Berechtigungs-Abfragen kommen mit
/// einer geteilten Referenz aus und passen unter die Leser-Seite der
/// Kanalschicht-Sperre.
#[derive(Debug, Default)]
pub struct AclBewertung {
    zeilen: HashMap<ChannelId, Vec<AclZeile>>,
    cache: Mutex<HashMap<(UserId, ChannelId), u32>>,
}

impl AclBewertung {
    /// Erstellt eine leere Auswertung
    pub fn neu() -> Self {
        Self::default()
    }

    /// Ersetzt die Zeilen eines Kanals und invalidiert dessen Unterbaum
    pub fn zeilen_setzen(&mut self, baum: &KanalBaum, kanal_id: ChannelId, zeilen: Vec<AclZeile>) {
        self.zeilen.insert(kanal_id, zeilen);
        self.unterbaum_invalidieren(baum, kanal_id);
    }

    /// Zeilen eines Kanals (leer wenn keine gesetzt)
    pub fn zeilen(&self, kanal_id: ChannelId) -> &[AclZeile] {
        self.zeilen.get(&kanal_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Invalidiert den Cache fuer einen Unterbaum
    ///
    /// Aufzurufen bei Zeilen-, Gruppen- oder Strukturaenderungen.
    pub fn unterbaum_invalidieren(&self, baum: &KanalBaum, kanal_id: ChannelId) {
        let betroffen: BTreeSet<ChannelId> = baum.unterbaum(kanal_id).into_iter().collect();
        self.cache_sperren()
            .retain(|(_, kanal), _| !betroffen.contains(kanal));
    }

    /// Invalidiert den gesamten Cache (Gruppenwechsel eines Benutzers)
    pub fn alles_invalidieren(&self) {
        self.cache_sperren().clear();
    }

    /// Anzahl gecachter Eintraege
    pub fn cache_groesse(&self) -> usize {
        self.cache_sperren().len()
    }

    fn cache_sperren(&self) -> std::sync::MutexGuard<'_, HashMap<(UserId, ChannelId), u32>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Effektive Berechtigungen von `kontext` in `kanal_id`
    ///
    /// Das Ergebnis wird pro (Benutzer, Kanal) gecacht. Der Cache traegt
    /// keine Gruppeninformation; wer Gruppen eines Benutzers aendert,
    /// muss `alles_invalidieren` aufrufen.
    pub fn effektive_berechtigungen(
        &self,
        baum: &KanalBaum,
        kontext: &BenutzerKontext,
        kanal_id: ChannelId,
    ) -> u32 {
        if kontext.admin {
            return Berechtigung::ALLE;
        }
        let schluessel = (kontext.user_id, kanal_id);
        if let Some(&gecacht) = self.cache_sperren().get(&schluessel) {
            return gecacht;
        }

        let mut pfad = baum.vorfahren(kanal_id);
        pfad.push(kanal_id);

        let mut berechtigungen = Berechtigung::STANDARD;
        for knoten in &pfad {
            let Some(zeilen) = self.zeilen.get(knoten) else {
                continue;
            };
            let ist_ziel = *knoten == kanal_id;
            for zeile in zeilen {
                let anwendbar = (ist_ziel && zeile.hier_anwenden)
                    || (!ist_ziel && zeile.unterkanaele_anwenden);
                if !anwendbar || !kontext.zeile_passt(zeile) {
                    continue;
                }
                berechtigungen |= zeile.erlauben;
                berechtigungen &= !zeile.verweigern;
            }
        }

        self.cache_sperren().insert(schluessel, berechtigungen);
        berechtigungen
    }

    /// Prueft eine Berechtigung in `kanal_id` inkl. Durchquerungs-Pflicht
    ///
    /// `DURCHQUEREN` muss an jedem Vorfahren vorliegen, sonst ist der
    /// Kanal fuer den Benutzer unsichtbar und jede Aktion verweigert.
    pub fn pruefen(
        &self,
        baum: &KanalBaum,
        kontext: &BenutzerKontext,
        kanal_id: ChannelId,
        berechtigung: u32,
    ) -> bool {
        if kontext.admin {
            return true;
        }
        for vorfahre in baum.vorfahren(kanal_id) {
            let dort = self.effektive_berechtigungen(baum, kontext, vorfahre);
            if dort & Berechtigung::DURCHQUEREN == 0 {
                return false;
            }
        }
        let hier = self.effektive_berechtigungen(baum, kontext, kanal_id);
        hier & berechtigung == berechtigung
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
