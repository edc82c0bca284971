//! Gemeinsamer Server-Zustand der Signaling-Schicht
//!
//! Haelt alle geteilten Dienste als Arc-Referenzen die sicher zwischen
//! tokio-Tasks geteilt werden koennen. Kanalbaum und ACL liegen hinter
//! einer Reader/Writer-Sperre; Strukturaenderungen nehmen die
//! Schreiber-Seite, Abfragen und das Routing nur die Leser-Seite.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use kurzwelle_channels::{AclBewertung, BenutzerKontext, KanalBaum, MithoererManager};
use kurzwelle_core::types::{ChannelId, EigenschaftsTag, SessionId, UserId};
use kurzwelle_core::{KurzwelleError, Result};
use kurzwelle_modules::{EventBus, ModulManager};
use kurzwelle_propagation::HfBandSimulation;
use kurzwelle_protocol::control::ControlMessage;
use kurzwelle_store::traits::{AclStore, BanStore, BenutzerStore, GruppenStore, TexturStore};
use kurzwelle_voice::{AudioRouter, VoiceZustand};

use crate::session::{SessionHandle, SessionIdVergeber};

/// Gesamtvertrag den das Store-Backend erfuellen muss
pub trait VollStore:
    BenutzerStore + BanStore + AclStore + TexturStore + GruppenStore + Send + Sync + 'static
{
}

impl<T> VollStore for T where
    T: BenutzerStore + BanStore + AclStore + TexturStore + GruppenStore + Send + Sync + 'static
{
}

/// Konfiguration der Signaling-Schicht
#[derive(Debug, Clone)]
pub struct SignalingKonfiguration {
    /// Maximale gleichzeitige Sessions
    pub max_benutzer: u32,
    /// Bitraten-Obergrenze pro Benutzer in bit/s
    pub bandbreite: u32,
    /// Idle-Limit bis zum Verbindungsabbau
    pub timeout: Duration,
    /// Frist fuer den Handshake
    pub handshake_frist: Duration,
    /// Nachricht im ServerSync
    pub willkommenstext: String,
    /// Unbekannte Namen automatisch registrieren
    pub autoregister: bool,
}

impl Default for SignalingKonfiguration {
    fn default() -> Self {
        Self {
            max_benutzer: 100,
            bandbreite: 72_000,
            timeout: Duration::from_secs(30),
            handshake_frist: Duration::from_secs(10),
            willkommenstext: String::new(),
            autoregister: true,
        }
    }
}

/// Kanalbaum und ACL unter einer gemeinsamen Sperre
#[derive(Default)]
pub struct KanalSchicht {
    pub baum: KanalBaum,
    pub acl: AclBewertung,
}

/// Gemeinsamer Zustand aller Verbindungs-Tasks
pub struct ServerZustand<S: VollStore> {
    pub konfiguration: SignalingKonfiguration,
    pub store: Arc<S>,
    pub kanalschicht: RwLock<KanalSchicht>,
    pub mithoerer: Arc<MithoererManager>,
    pub router: AudioRouter,
    pub voice: Arc<VoiceZustand>,
    pub simulation: Arc<HfBandSimulation>,
    pub bus: EventBus,
    pub module: Arc<ModulManager>,
    pub id_vergeber: SessionIdVergeber,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl<S: VollStore> ServerZustand<S> {
    /// Erstellt den Zustand samt aller Teil-Dienste
    pub fn neu(konfiguration: SignalingKonfiguration, store: Arc<S>) -> Arc<Self> {
        let bus = EventBus::neu();
        let mithoerer = Arc::new(MithoererManager::neu());
        let simulation = Arc::new(HfBandSimulation::neu(bus.clone()));
        let router = AudioRouter::neu(Arc::clone(&mithoerer), Arc::clone(&simulation));

        Arc::new(Self {
            konfiguration,
            store,
            kanalschicht: RwLock::new(KanalSchicht::default()),
            mithoerer,
            router,
            voice: Arc::new(VoiceZustand::neu()),
            simulation,
            bus,
            module: Arc::new(ModulManager::neu()),
            id_vergeber: SessionIdVergeber::neu(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    // -----------------------------------------------------------------------
    // Session-Verwaltung
    // -----------------------------------------------------------------------

    /// Registriert ein Session-Handle; `Err` wenn der Server voll ist
    pub fn session_registrieren(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.len() >= self.konfiguration.max_benutzer as usize {
            return Err(KurzwelleError::RateLimit(
                "Server voll: maximale Sessionanzahl erreicht".into(),
            ));
        }
        sessions.insert(handle.id, handle);
        Ok(())
    }

    /// Session-Handle zu einer ID
    pub fn session(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Alle Session-Handles
    pub fn sessions_alle(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Anzahl verbundener Sessions
    pub fn session_anzahl(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Entfernt eine Session und raeumt alle Nebenstrukturen auf
    pub fn session_entfernen(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let handle = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)?;
        self.router.teilnehmer_entfernen(id);
        self.voice.entbinden(id);
        Some(handle)
    }

    /// Session-Handle zu einem Benutzernamen (case-insensitiv)
    pub fn session_nach_name(&self, name: &str) -> Option<Arc<SessionHandle>> {
        self.sessions_alle()
            .into_iter()
            .find(|s| s.daten().name.eq_ignore_ascii_case(name))
    }

    // -----------------------------------------------------------------------
    // Nachrichten-Fanout
    // -----------------------------------------------------------------------

    /// Sendet an eine einzelne Session (best-effort)
    pub fn senden_an(&self, id: SessionId, nachricht: ControlMessage) {
        if let Some(handle) = self.session(id) {
            handle.senden(nachricht);
        }
    }

    /// Rundruf an alle authentifizierten Sessions
    pub fn rundruf(&self, nachricht: &ControlMessage) {
        for handle in self.sessions_alle() {
            if handle.ist_authentifiziert() {
                handle.senden(nachricht.clone());
            }
        }
    }

    /// Rundruf an alle ausser einer Session
    pub fn rundruf_ausser(&self, ausser: SessionId, nachricht: &ControlMessage) {
        for handle in self.sessions_alle() {
            if handle.id != ausser && handle.ist_authentifiziert() {
                handle.senden(nachricht.clone());
            }
        }
    }

    /// Rundruf an die authentifizierten Mitglieder eines Kanals
    pub fn rundruf_kanal(&self, kanal: ChannelId, nachricht: &ControlMessage) {
        for session in self.router.mitglieder(kanal) {
            self.senden_an(session, nachricht.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Berechtigungen
    // -----------------------------------------------------------------------

    /// Baut den ACL-Kontext eines Benutzers fuer einen Kanal
    ///
    /// Liest Admin-Flag und temporaere Gruppen aus dem Store.
    pub async fn benutzer_kontext(
        &self,
        session: SessionId,
        user_id: UserId,
        kanal: ChannelId,
    ) -> BenutzerKontext {
        let mut kontext = BenutzerKontext::neu(user_id);

        if user_id.ist_registriert() {
            match self
                .store
                .eigenschaft_lesen(user_id, EigenschaftsTag::Admin)
                .await
            {
                Ok(Some(wert)) => kontext.admin = wert == "1",
                Ok(None) => {}
                Err(e) => {
                    // Lesefehler: lieber ohne Admin-Rechte weitermachen
                    tracing::warn!(user_id = %user_id, fehler = %e, "Admin-Flag nicht lesbar");
                }
            }
        }

        match self.store.gruppen_von(session, kanal).await {
            Ok(gruppen) => kontext.gruppen.extend(gruppen),
            Err(e) => {
                tracing::warn!(session = %session, fehler = %e, "Temporaere Gruppen nicht lesbar");
            }
        }

        kontext
    }

    /// Prueft eine Berechtigung unter der Leser-Seite der Kanalschicht
    pub async fn berechtigung_pruefen(
        &self,
        session: SessionId,
        user_id: UserId,
        kanal: ChannelId,
        berechtigung: u32,
    ) -> bool {
        let kontext = self.benutzer_kontext(session, user_id, kanal).await;
        let schicht = self.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        schicht.acl.pruefen(&schicht.baum, &kontext, kanal, berechtigung)
    }

    // -----------------------------------------------------------------------
    // Kanal-Links
    // -----------------------------------------------------------------------

    /// Spiegelt die Link-Mengen des Baums in den Router
    pub fn links_spiegeln(&self) {
        let schicht = self.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        for id in schicht.baum.alle_ids() {
            if let Some(kanal) = schicht.baum.kanal(id) {
                self.router.links_setzen(id, kanal.gelinkte());
            }
        }
    }

    /// Wendet die offenen Baender als dynamische Links an
    ///
    /// Band-Meter werden auf gleichnamige Kanal-IDs abgebildet;
    /// Baender ohne Kanal fallen weg. Permanente Links bleiben
    /// unberuehrt.
    pub fn offene_baender_anwenden(&self) {
        let paare: Vec<(ChannelId, ChannelId)> = self
            .simulation
            .offene_band_paare()
            .into_iter()
            .map(|(a, b)| (ChannelId(u32::from(a)), ChannelId(u32::from(b))))
            .collect();

        {
            let mut schicht = self.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
            let gueltige: Vec<(ChannelId, ChannelId)> = paare
                .into_iter()
                .filter(|(a, b)| schicht.baum.existiert(*a) && schicht.baum.existiert(*b))
                .collect();
            schicht.baum.dyn_links_ersetzen(&gueltige);
        }
        self.links_spiegeln();

        // Dynamische Links aendern die erreichbaren Empfaenger
        self.router.fluester().alle_invalidieren();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kurzwelle_store::MemoryStore;

    fn zustand() -> Arc<ServerZustand<MemoryStore>> {
        ServerZustand::neu(SignalingKonfiguration::default(), Arc::new(MemoryStore::neu()))
    }

    fn adresse(port: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn session_registrieren_und_finden() {
        let zustand = zustand();
        let id = zustand.id_vergeber.vergeben();
        let (handle, _rx) = SessionHandle::neu(id, adresse(1000));

        zustand.session_registrieren(handle).unwrap();
        assert!(zustand.session(id).is_some());
        assert_eq!(zustand.session_anzahl(), 1);

        zustand.session_entfernen(id);
        assert!(zustand.session(id).is_none());
    }

    #[tokio::test]
    async fn server_voll() {
        let konfiguration = SignalingKonfiguration {
            max_benutzer: 1,
            ..Default::default()
        };
        let zustand = ServerZustand::neu(konfiguration, Arc::new(MemoryStore::neu()));

        let (erste, _rx1) = SessionHandle::neu(zustand.id_vergeber.vergeben(), adresse(1));
        zustand.session_registrieren(erste).unwrap();

        let (zweite, _rx2) = SessionHandle::neu(zustand.id_vergeber.vergeben(), adresse(2));
        let result = zustand.session_registrieren(zweite);
        assert!(matches!(result, Err(KurzwelleError::RateLimit(_))));
    }

    #[tokio::test]
    async fn admin_flag_aus_store() {
        let zustand = zustand();
        let benutzer = zustand.store.registrieren("DL1ABC", None, None).await.unwrap();
        zustand
            .store
            .eigenschaft_setzen(benutzer.id, EigenschaftsTag::Admin, "1")
            .await
            .unwrap();

        let kontext = zustand
            .benutzer_kontext(SessionId(1), benutzer.id, ChannelId::ROOT)
            .await;
        assert!(kontext.admin);
    }

    #[tokio::test]
    async fn offene_baender_erzeugen_dynamische_links() {
        let zustand = zustand();
        {
            let mut schicht = zustand.kanalschicht.write().unwrap();
            for band in [15u32, 17, 20] {
                schicht
                    .baum
                    .anlegen_mit_id(ChannelId(band), ChannelId::ROOT, format!("{band}m"))
                    .unwrap();
            }
        }

        // Standard-Zustand: SFI 120 -> offene Baender {15, 17, 20}
        zustand.offene_baender_anwenden();

        let schicht = zustand.kanalschicht.read().unwrap();
        let k15 = schicht.baum.kanal(ChannelId(15)).unwrap();
        assert!(k15.dyn_links.contains(&ChannelId(17)));
        assert!(k15.dyn_links.contains(&ChannelId(20)));
    }
}
