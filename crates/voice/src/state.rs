//! Voice-Transport-Zustand
//!
//! Bindet authentifizierte Sessions an UDP-Endpunkte. Die Bindung
//! entsteht erst wenn das erste verschluesselte Paket einer Session
//! erfolgreich den Rueckweg gemacht hat; bis dahin werden Pakete von
//! unbekannten Adressen kommentarlos verworfen.

use std::net::SocketAddr;

use dashmap::DashMap;

use kurzwelle_core::types::SessionId;

/// Adress-Bindungen des UDP-Transports
#[derive(Default)]
pub struct VoiceZustand {
    session_adresse: DashMap<SessionId, SocketAddr>,
    adresse_session: DashMap<SocketAddr, SessionId>,
}

impl VoiceZustand {
    /// Erstellt einen leeren Zustand
    pub fn neu() -> Self {
        Self::default()
    }

    /// Bindet eine Session an einen UDP-Endpunkt
    ///
    /// Eine bestehende Bindung derselben Session wird ersetzt
    /// (Adresswechsel nach NAT-Rebinding).
    pub fn binden(&self, session: SessionId, adresse: SocketAddr) {
        if let Some((_, alte)) = self.session_adresse.remove(&session) {
            self.adresse_session.remove(&alte);
        }
        self.session_adresse.insert(session, adresse);
        self.adresse_session.insert(adresse, session);
        tracing::debug!(session = %session, adresse = %adresse, "UDP-Endpunkt gebunden");
    }

    /// Session zu einer Absenderadresse
    pub fn session_von(&self, adresse: SocketAddr) -> Option<SessionId> {
        self.adresse_session.get(&adresse).map(|s| *s)
    }

    /// Gebundener Endpunkt einer Session
    pub fn adresse_von(&self, session: SessionId) -> Option<SocketAddr> {
        self.session_adresse.get(&session).map(|a| *a)
    }

    /// Loest die Bindung einer Session
    pub fn entbinden(&self, session: SessionId) {
        if let Some((_, adresse)) = self.session_adresse.remove(&session) {
            self.adresse_session.remove(&adresse);
        }
    }

    /// Anzahl gebundener Sessions
    pub fn anzahl(&self) -> usize {
        self.session_adresse.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adresse(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn binden_und_aufloesen() {
        let zustand = VoiceZustand::neu();
        zustand.binden(SessionId(1), adresse(5000));

        assert_eq!(zustand.session_von(adresse(5000)), Some(SessionId(1)));
        assert_eq!(zustand.adresse_von(SessionId(1)), Some(adresse(5000)));
        assert!(zustand.session_von(adresse(5001)).is_none());
    }

    #[test]
    fn rebinding_ersetzt_alte_adresse() {
        let zustand = VoiceZustand::neu();
        zustand.binden(SessionId(1), adresse(5000));
        zustand.binden(SessionId(1), adresse(6000));

        assert_eq!(zustand.adresse_von(SessionId(1)), Some(adresse(6000)));
        // Die alte Adresse darf nicht mehr aufloesen
        assert!(zustand.session_von(adresse(5000)).is_none());
        assert_eq!(zustand.session_von(adresse(6000)), Some(SessionId(1)));
    }

    #[test]
    fn entbinden_raeumt_beide_richtungen() {
        let zustand = VoiceZustand::neu();
        zustand.binden(SessionId(1), adresse(5000));
        zustand.entbinden(SessionId(1));

        assert!(zustand.session_von(adresse(5000)).is_none());
        assert!(zustand.adresse_von(SessionId(1)).is_none());
        assert_eq!(zustand.anzahl(), 0);
    }
}
