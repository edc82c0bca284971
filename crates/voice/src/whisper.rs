//! Fluester-Ziele
//!
//! Ein VoiceTarget registriert fuer einen Slot (1..=30) eine Definition
//! aus expliziten Sessions, Kanaelen (mit Rekursiv-Flag) und optionalem
//! Gruppenfilter. Die Aufloesung zur Empfaenger-Menge passiert einmal
//! bei der Registrierung und wird gecacht; Join/Leave, Struktur-, ACL-
//! oder Gruppenaenderungen invalidieren den Cache, worauf die
//! Signaling-Schicht jede registrierte Definition sofort neu aufloest
//! (`alle_definitionen` liefert ihr dafuer den Bestand).

use dashmap::DashMap;

use kurzwelle_core::types::{ChannelId, SessionId};

/// Kleinster gueltiger Fluester-Slot
pub const SLOT_MIN: u8 = 1;

/// Groesster gueltiger Fluester-Slot
pub const SLOT_MAX: u8 = 30;

/// Registrierte Definition eines Fluester-Slots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluesterDefinition {
    /// Explizite Ziel-Sessions
    pub sessions: Vec<SessionId>,
    /// Ziel-Kanaele mit Rekursiv-Flag (Unterkanaele einschliessen)
    pub kanaele: Vec<(ChannelId, bool)>,
    /// Nur Mitglieder dieser Gruppe empfangen
    pub gruppe: Option<String>,
    /// Gelinkte Kanaele einschliessen
    pub links: bool,
}

impl FluesterDefinition {
    /// Eine Definition ohne Ziele ist ungueltig
    pub fn ist_gueltig(&self) -> bool {
        !self.sessions.is_empty() || !self.kanaele.is_empty()
    }
}

/// Register aller Fluester-Slots mit materialisiertem Empfaenger-Cache
#[derive(Default)]
pub struct FluesterRegister {
    definitionen: DashMap<(SessionId, u8), FluesterDefinition>,
    materialisiert: DashMap<(SessionId, u8), Vec<SessionId>>,
}

impl FluesterRegister {
    /// Erstellt ein leeres Register
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert eine Slot-Definition; `false` bei ungueltigem Slot
    ///
    /// Eine vorhandene Materialisierung des Slots wird verworfen.
    pub fn definieren(
        &self,
        session: SessionId,
        slot: u8,
        definition: FluesterDefinition,
    ) -> bool {
        if !(SLOT_MIN..=SLOT_MAX).contains(&slot) {
            return false;
        }
        self.materialisiert.remove(&(session, slot));
        self.definitionen.insert((session, slot), definition);
        true
    }

    /// Definition eines Slots
    pub fn definition(&self, session: SessionId, slot: u8) -> Option<FluesterDefinition> {
        self.definitionen.get(&(session, slot)).map(|d| d.clone())
    }

    /// Alle registrierten Definitionen (Besitzer, Slot, Definition)
    ///
    /// Grundlage der Neuaufloesung nach einer Invalidierung.
    pub fn alle_definitionen(&self) -> Vec<(SessionId, u8, FluesterDefinition)> {
        self.definitionen
            .iter()
            .map(|eintrag| {
                let (session, slot) = *eintrag.key();
                (session, slot, eintrag.value().clone())
            })
            .collect()
    }

    /// Hinterlegt die aufgeloeste Empfaenger-Menge eines Slots
    pub fn materialisieren(&self, session: SessionId, slot: u8, empfaenger: Vec<SessionId>) {
        self.materialisiert.insert((session, slot), empfaenger);
    }

    /// Gecachte Empfaenger-Menge; `None` wenn (noch) nicht aufgeloest
    pub fn empfaenger(&self, session: SessionId, slot: u8) -> Option<Vec<SessionId>> {
        self.materialisiert.get(&(session, slot)).map(|e| e.clone())
    }

    /// Verwirft alle Materialisierungen
    ///
    /// Aufzurufen bei Join/Leave, Kanalstruktur-, ACL- oder
    /// Gruppenaenderungen; die Definitionen bleiben erhalten. Bis die
    /// Signaling-Schicht neu aufgeloest hat, routen betroffene Slots
    /// an niemanden.
    pub fn alle_invalidieren(&self) {
        self.materialisiert.clear();
    }

    /// Entfernt Definitionen und Materialisierungen einer Session
    pub fn session_entfernen(&self, session: SessionId) {
        self.definitionen.retain(|(s, _), _| *s != session);
        self.materialisiert.retain(|(s, _), _| *s != session);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn definition_mit_session(ziel: SessionId) -> FluesterDefinition {
        FluesterDefinition {
            sessions: vec![ziel],
            ..Default::default()
        }
    }

    #[test]
    fn slot_grenzen() {
        let register = FluesterRegister::neu();
        let def = definition_mit_session(SessionId(2));
        assert!(!register.definieren(SessionId(1), 0, def.clone()));
        assert!(!register.definieren(SessionId(1), 31, def.clone()));
        assert!(register.definieren(SessionId(1), 1, def.clone()));
        assert!(register.definieren(SessionId(1), 30, def));
    }

    #[test]
    fn materialisierung_und_abruf() {
        let register = FluesterRegister::neu();
        register.definieren(SessionId(1), 5, definition_mit_session(SessionId(2)));
        assert!(register.empfaenger(SessionId(1), 5).is_none());

        register.materialisieren(SessionId(1), 5, vec![SessionId(2), SessionId(3)]);
        assert_eq!(
            register.empfaenger(SessionId(1), 5),
            Some(vec![SessionId(2), SessionId(3)])
        );
    }

    #[test]
    fn neudefinition_verwirft_materialisierung() {
        let register = FluesterRegister::neu();
        register.definieren(SessionId(1), 5, definition_mit_session(SessionId(2)));
        register.materialisieren(SessionId(1), 5, vec![SessionId(2)]);

        register.definieren(SessionId(1), 5, definition_mit_session(SessionId(4)));
        assert!(register.empfaenger(SessionId(1), 5).is_none());
    }

    #[test]
    fn invalidierung_behaelt_definitionen() {
        let register = FluesterRegister::neu();
        register.definieren(SessionId(1), 5, definition_mit_session(SessionId(2)));
        register.materialisieren(SessionId(1), 5, vec![SessionId(2)]);

        register.alle_invalidieren();
        assert!(register.empfaenger(SessionId(1), 5).is_none());
        assert!(register.definition(SessionId(1), 5).is_some());
    }

    #[test]
    fn session_entfernen_raeumt_auf() {
        let register = FluesterRegister::neu();
        register.definieren(SessionId(1), 5, definition_mit_session(SessionId(2)));
        register.materialisieren(SessionId(1), 5, vec![SessionId(2)]);
        register.definieren(SessionId(9), 5, definition_mit_session(SessionId(2)));

        register.session_entfernen(SessionId(1));
        assert!(register.definition(SessionId(1), 5).is_none());
        assert!(register.empfaenger(SessionId(1), 5).is_none());
        assert!(register.definition(SessionId(9), 5).is_some());
    }

    #[test]
    fn alle_definitionen_liefert_bestand() {
        let register = FluesterRegister::neu();
        register.definieren(SessionId(1), 5, definition_mit_session(SessionId(2)));
        register.definieren(SessionId(9), 3, definition_mit_session(SessionId(4)));

        let mut bestand = register.alle_definitionen();
        bestand.sort_by_key(|(session, slot, _)| (*session, *slot));
        assert_eq!(bestand.len(), 2);
        assert_eq!(bestand[0].0, SessionId(1));
        assert_eq!(bestand[0].1, 5);
        assert_eq!(bestand[1].0, SessionId(9));
        assert_eq!(bestand[1].2.sessions, vec![SessionId(4)]);
    }

    #[test]
    fn leere_definition_ist_ungueltig() {
        assert!(!FluesterDefinition::default().ist_gueltig());
        assert!(definition_mit_session(SessionId(1)).ist_gueltig());
        let nur_kanal = FluesterDefinition {
            kanaele: vec![(ChannelId(40), true)],
            ..Default::default()
        };
        assert!(nur_kanal.ist_gueltig());
    }
}
