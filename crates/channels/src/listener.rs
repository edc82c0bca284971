//! Mithoerer-Verwaltung
//!
//! Ein Mithoerer empfaengt Audio aus einem Kanal dem er nicht angehoert.
//! Die Bindung (Benutzer, Kanal) wird in beiden Richtungen indiziert
//! (Kanal -> Benutzer und Benutzer -> Kanaele) und traegt eine
//! Lautstaerke-Anpassung. Deaktivieren setzt den Faktor auf 0, die
//! Bindung selbst bleibt bestehen.
//!
//! Alle Operationen laufen hinter einer Reader/Writer-Sperre; die
//! Methoden geben Aenderungsinformationen zurueck, damit der Aufrufer
//! Benachrichtigungen erst nach Freigabe der Sperre verschicken kann.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use kurzwelle_core::types::{ChannelId, UserId};

// ---------------------------------------------------------------------------
// Lautstaerke-Anpassung
// ---------------------------------------------------------------------------

/// Untergrenze des Anpassungsfaktors
pub const MIN_FAKTOR: f32 = 0.0;

/// Obergrenze des Anpassungsfaktors
pub const MAX_FAKTOR: f32 = 10.0;

/// Art der Lautstaerke-Anpassung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnpassungsTyp {
    /// Faktor wird direkt multipliziert
    Multiplikativ,
    /// Faktor wirkt als Exponent: Sample * 2^Faktor
    Logarithmisch,
}

/// Lautstaerke-Anpassung einer Mithoerer-Bindung
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LautstaerkeAnpassung {
    pub typ: AnpassungsTyp,
    /// Faktor, geklemmt auf [0, 10]
    faktor: f32,
}

impl LautstaerkeAnpassung {
    /// Erstellt eine Anpassung; der Faktor wird auf [0, 10] geklemmt
    pub fn neu(typ: AnpassungsTyp, faktor: f32) -> Self {
        Self {
            typ,
            faktor: faktor.clamp(MIN_FAKTOR, MAX_FAKTOR),
        }
    }

    /// Identitaets-Anpassung (multiplikativ, Faktor 1)
    pub fn identitaet() -> Self {
        Self::neu(AnpassungsTyp::Multiplikativ, 1.0)
    }

    /// Gibt den geklemmten Faktor zurueck
    pub fn faktor(&self) -> f32 {
        self.faktor
    }

    /// Setzt den Faktor (geklemmt)
    pub fn faktor_setzen(&mut self, faktor: f32) {
        self.faktor = faktor.clamp(MIN_FAKTOR, MAX_FAKTOR);
    }

    /// Effektiver Multiplikator fuer Audio-Samples
    pub fn multiplikator(&self) -> f32 {
        match self.typ {
            AnpassungsTyp::Multiplikativ => self.faktor,
            AnpassungsTyp::Logarithmisch => 2f32.powf(self.faktor),
        }
    }

    /// Wendet die Anpassung auf ein Sample an
    pub fn anwenden(&self, sample: f32) -> f32 {
        sample * self.multiplikator()
    }

    /// Konvertiert Dezibel in einen linearen Faktor
    pub fn db_zu_faktor(db: f32) -> f32 {
        10f32.powf(db / 20.0)
    }

    /// Konvertiert einen linearen Faktor in Dezibel
    pub fn faktor_zu_db(faktor: f32) -> f32 {
        if faktor <= 0.0 {
            f32::NEG_INFINITY
        } else {
            20.0 * faktor.log10()
        }
    }
}

impl Default for LautstaerkeAnpassung {
    fn default() -> Self {
        Self::identitaet()
    }
}

// ---------------------------------------------------------------------------
// MithoererManager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    kanal_mithoerer: HashMap<ChannelId, BTreeSet<UserId>>,
    benutzer_kanaele: HashMap<UserId, BTreeSet<ChannelId>>,
    lautstaerken: HashMap<(UserId, ChannelId), LautstaerkeAnpassung>,
}

/// Verwaltung aller Mithoerer-Bindungen
pub struct MithoererManager {
    inner: RwLock<Inner>,
}

impl MithoererManager {
    /// Erstellt einen leeren Manager
    pub fn neu() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn lesen(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn schreiben(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Fuegt eine Bindung hinzu; `false` wenn sie bereits bestand (No-op)
    ///
    /// Eine neue Bindung startet mit der Identitaets-Anpassung.
    pub fn hinzufuegen(&self, user: UserId, kanal: ChannelId) -> bool {
        let mut inner = self.schreiben();
        let neu = inner.kanal_mithoerer.entry(kanal).or_default().insert(user);
        if !neu {
            return false;
        }
        inner.benutzer_kanaele.entry(user).or_default().insert(kanal);
        inner
            .lautstaerken
            .entry((user, kanal))
            .or_insert_with(LautstaerkeAnpassung::identitaet);
        true
    }

    /// Entfernt eine Bindung samt Lautstaerke; `false` wenn unbekannt
    pub fn entfernen(&self, user: UserId, kanal: ChannelId) -> bool {
        let mut inner = self.schreiben();
        let entfernt = inner
            .kanal_mithoerer
            .get_mut(&kanal)
            .is_some_and(|menge| menge.remove(&user));
        if !entfernt {
            return false;
        }
        if inner.kanal_mithoerer.get(&kanal).is_some_and(BTreeSet::is_empty) {
            inner.kanal_mithoerer.remove(&kanal);
        }
        if let Some(kanaele) = inner.benutzer_kanaele.get_mut(&user) {
            kanaele.remove(&kanal);
            if kanaele.is_empty() {
                inner.benutzer_kanaele.remove(&user);
            }
        }
        inner.lautstaerken.remove(&(user, kanal));
        true
    }

    /// Deaktiviert eine Bindung: Faktor 0, Bindung bleibt bestehen
    pub fn deaktivieren(&self, user: UserId, kanal: ChannelId) {
        let mut inner = self.schreiben();
        let anpassung = inner
            .lautstaerken
            .entry((user, kanal))
            .or_insert_with(LautstaerkeAnpassung::identitaet);
        anpassung.typ = AnpassungsTyp::Multiplikativ;
        anpassung.faktor_setzen(0.0);
    }

    /// Setzt die Lautstaerke-Anpassung einer Bindung
    pub fn lautstaerke_setzen(
        &self,
        user: UserId,
        kanal: ChannelId,
        anpassung: LautstaerkeAnpassung,
    ) {
        self.schreiben().lautstaerken.insert((user, kanal), anpassung);
    }

    /// Lautstaerke-Anpassung einer Bindung (Identitaet wenn keine gesetzt)
    pub fn lautstaerke(&self, user: UserId, kanal: ChannelId) -> LautstaerkeAnpassung {
        self.lesen()
            .lautstaerken
            .get(&(user, kanal))
            .copied()
            .unwrap_or_default()
    }

    /// Prueft ob eine Bindung besteht
    pub fn hoert(&self, user: UserId, kanal: ChannelId) -> bool {
        self.lesen()
            .kanal_mithoerer
            .get(&kanal)
            .is_some_and(|menge| menge.contains(&user))
    }

    /// Alle Mithoerer eines Kanals
    pub fn mithoerer(&self, kanal: ChannelId) -> Vec<UserId> {
        self.lesen()
            .kanal_mithoerer
            .get(&kanal)
            .map(|menge| menge.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Alle Kanaele die ein Benutzer mithoert
    pub fn gehoerte_kanaele(&self, user: UserId) -> Vec<ChannelId> {
        self.lesen()
            .benutzer_kanaele
            .get(&user)
            .map(|menge| menge.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entfernt alle Bindungen eines Kanals; gibt die Ex-Mithoerer zurueck
    pub fn kanal_leeren(&self, kanal: ChannelId) -> Vec<UserId> {
        let mut inner = self.schreiben();
        let Some(mithoerer) = inner.kanal_mithoerer.remove(&kanal) else {
            return Vec::new();
        };
        for user in &mithoerer {
            if let Some(kanaele) = inner.benutzer_kanaele.get_mut(user) {
                kanaele.remove(&kanal);
                if kanaele.is_empty() {
                    inner.benutzer_kanaele.remove(user);
                }
            }
            inner.lautstaerken.remove(&(*user, kanal));
        }
        mithoerer.into_iter().collect()
    }

    /// Entfernt alle Bindungen eines Benutzers; gibt die Kanaele zurueck
    pub fn benutzer_leeren(&self, user: UserId) -> Vec<ChannelId> {
        let mut inner = self.schreiben();
        let Some(kanaele) = inner.benutzer_kanaele.remove(&user) else {
            return Vec::new();
        };
        for kanal in &kanaele {
            if let Some(menge) = inner.kanal_mithoerer.get_mut(kanal) {
                menge.remove(&user);
                if menge.is_empty() {
                    inner.kanal_mithoerer.remove(kanal);
                }
            }
            inner.lautstaerken.remove(&(user, *kanal));
        }
        kanaele.into_iter().collect()
    }

    /// Entfernt alle Bindungen
    pub fn leeren(&self) {
        let mut inner = self.schreiben();
        inner.kanal_mithoerer.clear();
        inner.benutzer_kanaele.clear();
        inner.lautstaerken.clear();
    }
}

impl Default for MithoererManager {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
