//! Audio-Routing
//!
//! Fuer jedes eingehende Voice-Paket ermittelt der Router die
//! Empfaenger-Menge (Kanal-Mitglieder, Mithoerer, Fluester-Ziele oder
//! Loopback), wendet pro Paar die Ausbreitungs-Degradation an und legt
//! das Ergebnis in die Sende-Queues. Pakete eines Sprechers erreichen
//! jeden Empfaenger in Empfangsreihenfolge; verworfene Pakete
//! hinterlassen eine Luecke in der Sprecher-Sequenz, an der
//! nachgelagerte Jitter-Buffer den Verlust erkennen.
//!
//! ## Degradations-Pipeline pro Empfaenger
//!
//! 1. Ohne beidseitige Locator: unveraendert durchreichen
//! 2. Signalstaerke unter 0.05: Paket fuer diesen Empfaenger verwerfen
//! 3. Bernoulli-Verlust mit der Schwund-Wahrscheinlichkeit
//! 4. Jitter- und Rausch-Faktoren fuer die nachgelagerten Stufen taggen
//! 5. Mithoerer erhalten zusaetzlich ihre Lautstaerke-Anpassung

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;

use kurzwelle_channels::MithoererManager;
use kurzwelle_core::types::{ChannelId, SessionId, UserId};
use kurzwelle_propagation::{HfBandSimulation, Locator, KOMMUNIKATIONS_SCHWELLE};
use kurzwelle_protocol::voice::VoicePaket;
use kurzwelle_protocol::ZielTyp;

use crate::whisper::FluesterRegister;

/// Groesse der Sende-Queue pro Teilnehmer (Pakete)
pub const SENDE_QUEUE_GROESSE: usize = 128;

// ---------------------------------------------------------------------------
// Teilnehmer und geroutete Pakete
// ---------------------------------------------------------------------------

/// Routing-relevante Daten eines Teilnehmers
#[derive(Debug, Clone)]
pub struct TeilnehmerInfo {
    pub session: SessionId,
    pub user_id: UserId,
    /// Maidenhead-Locator; None = HF-Simulation inaktiv fuer diesen Teilnehmer
    pub locator: Option<Locator>,
    /// Server-seitig taub geschaltet
    pub server_deaf: bool,
    /// Selbst taub geschaltet
    pub selbst_deaf: bool,
    /// Darf empfangen, aber nicht senden
    pub nur_hoeren: bool,
    /// Benutzer deren Audio dieser Teilnehmer blockiert
    pub blockliste: HashSet<UserId>,
}

impl TeilnehmerInfo {
    /// Erstellt einen Teilnehmer ohne Locator und ohne Flags
    pub fn neu(session: SessionId, user_id: UserId) -> Self {
        Self {
            session,
            user_id,
            locator: None,
            server_deaf: false,
            selbst_deaf: false,
            nur_hoeren: false,
            blockliste: HashSet::new(),
        }
    }
}

struct Teilnehmer {
    info: TeilnehmerInfo,
    sende_tx: mpsc::Sender<GeroutetesPaket>,
}

/// Ein fuer einen Empfaenger aufbereitetes Voice-Paket
#[derive(Debug, Clone)]
pub struct GeroutetesPaket {
    /// Kodiertes Original-Paket (inkl. Sprecher-Sequenz)
    pub daten: Arc<Vec<u8>>,
    /// Sprecher-Sequenznummer
    pub sequenz: u32,
    /// Zeitversatz-Faktor fuer die Verzoegerungsleitung, [0, 0.9]
    pub jitter: f32,
    /// Faktor fuer den additiven Rauschmischer, [0, 0.9]
    pub rauschen: f32,
    /// Lautstaerke-Multiplikator (Mithoerer-Anpassung, sonst 1.0)
    pub lautstaerke: f32,
}

/// Ergebnis eines Routing-Vorgangs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingErgebnis {
    /// In Sende-Queues gelegte Pakete
    pub zugestellt: usize,
    /// Unter der Kommunikations-Schwelle verworfen
    pub schwelle_verworfen: usize,
    /// Durch Schwund-Wuerfelwurf verworfen
    pub schwund_verworfen: usize,
    /// Wegen voller Sende-Queue verworfen
    pub queue_verworfen: usize,
}

/// Art auf die ein Empfaenger ein Paket erhaelt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmpfangsArt {
    /// Mitglied des Kanals (oder eines gelinkten Kanals)
    Mitglied,
    /// Mithoerer des Kanals
    Mithoerer(ChannelId),
    /// Explizites Fluester-Ziel
    Fluester,
    /// Server-Loopback
    Loopback,
}

// ---------------------------------------------------------------------------
// AudioRouter
// ---------------------------------------------------------------------------

/// Der Routing-Kern fuer Voice-Pakete
///
/// Thread-safe und `Clone`-faehig (innerer Arc).
#[derive(Clone)]
pub struct AudioRouter {
    inner: Arc<Inner>,
}

struct Inner {
    teilnehmer: DashMap<SessionId, Teilnehmer>,
    benutzer_session: DashMap<UserId, SessionId>,
    kanal_mitglieder: DashMap<ChannelId, BTreeSet<SessionId>>,
    session_kanal: DashMap<SessionId, ChannelId>,
    /// Spiegel der Kanal-Links (permanent + dynamisch), von der
    /// Signaling-Schicht bei jeder Link-Aenderung aktualisiert
    kanal_links: DashMap<ChannelId, BTreeSet<ChannelId>>,
    mithoerer: Arc<MithoererManager>,
    fluester: FluesterRegister,
    simulation: Arc<HfBandSimulation>,
}

impl AudioRouter {
    /// Erstellt einen Router
    pub fn neu(mithoerer: Arc<MithoererManager>, simulation: Arc<HfBandSimulation>) -> Self {
        Self {
            inner: Arc::new(Inner {
                teilnehmer: DashMap::new(),
                benutzer_session: DashMap::new(),
                kanal_mitglieder: DashMap::new(),
                session_kanal: DashMap::new(),
                kanal_links: DashMap::new(),
                mithoerer: mithoerer.clone(),
                fluester: FluesterRegister::neu(),
                simulation,
            }),
        }
    }

    /// Zugriff auf das Fluester-Register
    pub fn fluester(&self) -> &FluesterRegister {
        &self.inner.fluester
    }

    /// Zugriff auf den Mithoerer-Manager
    pub fn mithoerer(&self) -> &MithoererManager {
        &self.inner.mithoerer
    }

    // -----------------------------------------------------------------------
    // Teilnehmer-Verwaltung
    // -----------------------------------------------------------------------

    /// Registriert einen Teilnehmer und gibt seine Empfangs-Queue zurueck
    pub fn teilnehmer_registrieren(
        &self,
        info: TeilnehmerInfo,
    ) -> mpsc::Receiver<GeroutetesPaket> {
        let (tx, rx) = mpsc::channel(SENDE_QUEUE_GROESSE);
        self.inner.benutzer_session.insert(info.user_id, info.session);
        self.inner
            .teilnehmer
            .insert(info.session, Teilnehmer { info, sende_tx: tx });
        rx
    }

    /// Entfernt einen Teilnehmer vollstaendig
    pub fn teilnehmer_entfernen(&self, session: SessionId) {
        self.kanal_verlassen(session);
        if let Some((_, eintrag)) = self.inner.teilnehmer.remove(&session) {
            self.inner.benutzer_session.remove(&eintrag.info.user_id);
        }
        self.inner.fluester.session_entfernen(session);
        self.inner.fluester.alle_invalidieren();
    }

    /// Ein Teilnehmer betritt einen Kanal (mit automatischem Verlassen)
    pub fn kanal_beitreten(&self, session: SessionId, kanal: ChannelId) {
        if let Some(alter) = self.inner.session_kanal.get(&session).map(|k| *k) {
            if alter == kanal {
                return;
            }
            self.mitglied_entfernen(session, alter);
        }
        self.inner
            .kanal_mitglieder
            .entry(kanal)
            .or_default()
            .insert(session);
        self.inner.session_kanal.insert(session, kanal);
        // Join/Leave invalidiert alle materialisierten Fluester-Ziele
        self.inner.fluester.alle_invalidieren();
    }

    /// Ein Teilnehmer verlaesst seinen aktuellen Kanal
    pub fn kanal_verlassen(&self, session: SessionId) {
        if let Some((_, kanal)) = self.inner.session_kanal.remove(&session) {
            self.mitglied_entfernen(session, kanal);
            self.inner.fluester.alle_invalidieren();
        }
    }

    fn mitglied_entfernen(&self, session: SessionId, kanal: ChannelId) {
        let leer = self
            .inner
            .kanal_mitglieder
            .get_mut(&kanal)
            .map(|mut mitglieder| {
                mitglieder.remove(&session);
                mitglieder.is_empty()
            })
            .unwrap_or(false);
        if leer {
            self.inner.kanal_mitglieder.remove(&kanal);
        }
    }

    /// Aktueller Kanal eines Teilnehmers
    pub fn kanal_von(&self, session: SessionId) -> Option<ChannelId> {
        self.inner.session_kanal.get(&session).map(|k| *k)
    }

    /// Mitglieder eines Kanals
    pub fn mitglieder(&self, kanal: ChannelId) -> Vec<SessionId> {
        self.inner
            .kanal_mitglieder
            .get(&kanal)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Setzt den Locator eines Teilnehmers
    pub fn locator_setzen(&self, session: SessionId, locator: Option<Locator>) {
        if let Some(mut eintrag) = self.inner.teilnehmer.get_mut(&session) {
            eintrag.info.locator = locator;
        }
    }

    /// Setzt die Empfangs-Flags eines Teilnehmers
    pub fn flags_setzen(
        &self,
        session: SessionId,
        server_deaf: bool,
        selbst_deaf: bool,
        nur_hoeren: bool,
    ) {
        if let Some(mut eintrag) = self.inner.teilnehmer.get_mut(&session) {
            eintrag.info.server_deaf = server_deaf;
            eintrag.info.selbst_deaf = selbst_deaf;
            eintrag.info.nur_hoeren = nur_hoeren;
        }
    }

    /// Blockiert einen Benutzer fuer einen Teilnehmer
    pub fn blockieren(&self, session: SessionId, user: UserId) {
        if let Some(mut eintrag) = self.inner.teilnehmer.get_mut(&session) {
            eintrag.info.blockliste.insert(user);
        }
    }

    /// Spiegelt die Links eines Kanals (von der Signaling-Schicht gepflegt)
    pub fn links_setzen(&self, kanal: ChannelId, gelinkte: BTreeSet<ChannelId>) {
        if gelinkte.is_empty() {
            self.inner.kanal_links.remove(&kanal);
        } else {
            self.inner.kanal_links.insert(kanal, gelinkte);
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Routet ein Audio-Paket an alle Empfaenger
    ///
    /// Ping-Pakete und Pakete von Nur-Hoeren-Teilnehmern werden
    /// kommentarlos absorbiert (kein Fehler an den Client).
    pub fn paket_routen(
        &self,
        absender: SessionId,
        paket: &VoicePaket,
        jetzt: DateTime<Utc>,
        jetzt_ms: u64,
        rng: &mut impl Rng,
    ) -> RoutingErgebnis {
        let mut ergebnis = RoutingErgebnis::default();

        let VoicePaket::Audio { kopf, sequenz, .. } = paket else {
            return ergebnis;
        };

        let (absender_user, absender_locator, nur_hoeren) = {
            let Some(eintrag) = self.inner.teilnehmer.get(&absender) else {
                tracing::debug!(session = %absender, "Paket von unbekanntem Teilnehmer");
                return ergebnis;
            };
            (
                eintrag.info.user_id,
                eintrag.info.locator.clone(),
                eintrag.info.nur_hoeren,
            )
        };

        // Nur-Hoeren-Benutzer sind keine gueltigen Sprecher
        if nur_hoeren {
            tracing::trace!(session = %absender, "Paket eines Nur-Hoeren-Teilnehmers absorbiert");
            return ergebnis;
        }

        let kandidaten = self.kandidaten_ermitteln(absender, kopf.ziel_typ());
        if kandidaten.is_empty() {
            return ergebnis;
        }

        // Einmal kodieren, Arc pro Empfaenger klonen
        let daten = Arc::new(paket.encode());

        for (empfaenger, art) in kandidaten {
            let (empfaenger_user, empfaenger_locator, tx) = {
                let Some(eintrag) = self.inner.teilnehmer.get(&empfaenger) else {
                    continue;
                };
                let info = &eintrag.info;
                if art != EmpfangsArt::Loopback {
                    if empfaenger == absender
                        || info.server_deaf
                        || info.selbst_deaf
                        || info.blockliste.contains(&absender_user)
                    {
                        continue;
                    }
                }
                (
                    info.user_id,
                    info.locator.clone(),
                    eintrag.sende_tx.clone(),
                )
            };

            // HF-Degradation nur wenn beide Seiten einen Locator haben
            let (jitter, rauschen) = match (&absender_locator, &empfaenger_locator) {
                (Some(von), Some(nach)) => {
                    let staerke = self
                        .inner
                        .simulation
                        .signalstaerke(von, nach, jetzt, &mut *rng);
                    if staerke < KOMMUNIKATIONS_SCHWELLE {
                        ergebnis.schwelle_verworfen += 1;
                        continue;
                    }
                    let effekte = self.inner.simulation.schwund(staerke, jetzt_ms, &mut *rng);
                    if rng.gen::<f32>() < effekte.paketverlust {
                        ergebnis.schwund_verworfen += 1;
                        continue;
                    }
                    (effekte.jitter, effekte.rauschen)
                }
                _ => (0.0, 0.0),
            };

            let lautstaerke = match art {
                EmpfangsArt::Mithoerer(kanal) => self
                    .inner
                    .mithoerer
                    .lautstaerke(empfaenger_user, kanal)
                    .multiplikator(),
                _ => 1.0,
            };

            let geroutet = GeroutetesPaket {
                daten: Arc::clone(&daten),
                sequenz: *sequenz,
                jitter,
                rauschen,
                lautstaerke,
            };

            match tx.try_send(geroutet) {
                Ok(()) => ergebnis.zugestellt += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    ergebnis.queue_verworfen += 1;
                    tracing::warn!(
                        empfaenger = %empfaenger,
                        "Sende-Queue voll, Paket verworfen"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(empfaenger = %empfaenger, "Sende-Queue geschlossen");
                }
            }
        }

        ergebnis
    }

    /// Ermittelt die Empfaenger-Kandidaten fuer ein Ziel
    ///
    /// Mitgliedschaft hat Vorrang vor einer Mithoerer-Bindung: jeder
    /// Empfaenger taucht genau einmal auf.
    fn kandidaten_ermitteln(
        &self,
        absender: SessionId,
        ziel: ZielTyp,
    ) -> Vec<(SessionId, EmpfangsArt)> {
        let mut kandidaten: HashMap<SessionId, EmpfangsArt> = HashMap::new();

        match ziel {
            ZielTyp::Kanal => {
                let Some(kanal) = self.kanal_von(absender) else {
                    return Vec::new();
                };
                let mut kanaele = vec![kanal];
                if let Some(links) = self.inner.kanal_links.get(&kanal) {
                    kanaele.extend(links.iter().copied());
                }

                for k in kanaele {
                    for mitglied in self.mitglieder(k) {
                        kandidaten.insert(mitglied, EmpfangsArt::Mitglied);
                    }
                    for hoerer in self.inner.mithoerer.mithoerer(k) {
                        let Some(session) =
                            self.inner.benutzer_session.get(&hoerer).map(|s| *s)
                        else {
                            continue;
                        };
                        kandidaten
                            .entry(session)
                            .or_insert(EmpfangsArt::Mithoerer(k));
                    }
                }
            }
            ZielTyp::Fluester(slot) => {
                for session in self
                    .inner
                    .fluester
                    .empfaenger(absender, slot)
                    .unwrap_or_default()
                {
                    kandidaten.insert(session, EmpfangsArt::Fluester);
                }
            }
            ZielTyp::Loopback => {
                kandidaten.insert(absender, EmpfangsArt::Loopback);
            }
        }

        kandidaten.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kurzwelle_channels::{AnpassungsTyp, LautstaerkeAnpassung};
    use kurzwelle_modules::EventBus;
    use kurzwelle_propagation::{IonosphaerenZustand, Jahreszeit};
    use kurzwelle_protocol::voice::ZIEL_LOOPBACK;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn router() -> AudioRouter {
        AudioRouter::neu(
            Arc::new(MithoererManager::neu()),
            Arc::new(HfBandSimulation::neu(EventBus::neu())),
        )
    }

    fn router_mit_zustand(sfi: u16, k: u8, jahreszeit: Jahreszeit) -> AudioRouter {
        let zustand = IonosphaerenZustand {
            sfi,
            k_index: k,
            jahreszeit,
            auto_jahreszeit: false,
            muf: 0.0,
            epoche: 0,
        };
        AudioRouter::neu(
            Arc::new(MithoererManager::neu()),
            Arc::new(HfBandSimulation::mit_zustand(EventBus::neu(), zustand)),
        )
    }

    fn mittag() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn beitreten(
        router: &AudioRouter,
        session: u32,
        user: i64,
        kanal: u32,
    ) -> mpsc::Receiver<GeroutetesPaket> {
        let rx = router.teilnehmer_registrieren(TeilnehmerInfo::neu(
            SessionId(session),
            UserId(user),
        ));
        router.kanal_beitreten(SessionId(session), ChannelId(kanal));
        rx
    }

    fn paket(sequenz: u32) -> VoicePaket {
        VoicePaket::neu_opus(0, sequenz, vec![0xAB; 60])
    }

    #[tokio::test]
    async fn gleicher_kanal_ohne_locator_verbatim() {
        // Ohne Grid-Locator gibt es keine HF-Degradation
        let router = router();
        let mut rng = StdRng::seed_from_u64(1);
        let mut rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        for sequenz in 0..3u32 {
            let ergebnis =
                router.paket_routen(SessionId(1), &paket(sequenz), mittag(), 1000, &mut rng);
            assert_eq!(ergebnis.zugestellt, 1);
            assert_eq!(ergebnis.schwelle_verworfen, 0);
            assert_eq!(ergebnis.schwund_verworfen, 0);
        }

        // B empfaengt alle drei in Reihenfolge und unveraendert
        for sequenz in 0..3u32 {
            let empfangen = rx_b.try_recv().expect("Paket erwartet");
            assert_eq!(empfangen.sequenz, sequenz);
            assert_eq!(empfangen.jitter, 0.0);
            assert_eq!(empfangen.rauschen, 0.0);
            assert_eq!(empfangen.lautstaerke, 1.0);
            assert_eq!(*empfangen.daten, paket(sequenz).encode());
        }
        // Kein Echo an den Absender
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn kanal_isolierung() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(2);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_fremd = beitreten(&router, 2, 2, 80);

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 0);
        assert!(rx_fremd.try_recv().is_err());
    }

    #[tokio::test]
    async fn nur_hoeren_sprecher_wird_absorbiert() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(3);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        router.flags_setzen(SessionId(1), false, false, true);

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis, RoutingErgebnis::default());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn taube_empfaenger_ausgeschlossen() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(4);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);
        let mut rx_c = beitreten(&router, 3, 3, 40);

        router.flags_setzen(SessionId(2), true, false, false);

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 1);
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_ok());
    }

    #[tokio::test]
    async fn blockliste_ausgeschlossen() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(5);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        // B blockiert Benutzer 1
        router.blockieren(SessionId(2), UserId(1));

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn mithoerer_erhaelt_genau_eine_kopie_mit_lautstaerke() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(6);
        // Sprecher in Kanal 40; U sitzt in Kanal 20 und hoert 40 mit
        let _rx_sprecher = beitreten(&router, 1, 1, 40);
        let mut rx_mitglied = beitreten(&router, 2, 2, 40);
        let mut rx_u = beitreten(&router, 3, 3, 20);

        router.mithoerer().hinzufuegen(UserId(3), ChannelId(40));
        router.mithoerer().lautstaerke_setzen(
            UserId(3),
            ChannelId(40),
            LautstaerkeAnpassung::neu(AnpassungsTyp::Multiplikativ, 0.5),
        );

        let ergebnis = router.paket_routen(SessionId(1), &paket(7), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 2);

        // Mitglied: Lautstaerke 1.0
        let normal = rx_mitglied.try_recv().unwrap();
        assert_eq!(normal.lautstaerke, 1.0);

        // Mithoerer: genau eine Kopie mit Anpassung
        let kopie = rx_u.try_recv().unwrap();
        assert!((kopie.lautstaerke - 0.5).abs() < 1e-6);
        assert!(rx_u.try_recv().is_err(), "Nur eine Kopie erwartet");
    }

    #[tokio::test]
    async fn mitgliedschaft_hat_vorrang_vor_mithoeren() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(7);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        // B hoert seinen eigenen Kanal zusaetzlich mit (Faktor 0.2)
        router.mithoerer().hinzufuegen(UserId(2), ChannelId(40));
        router.mithoerer().lautstaerke_setzen(
            UserId(2),
            ChannelId(40),
            LautstaerkeAnpassung::neu(AnpassungsTyp::Multiplikativ, 0.2),
        );

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 1);
        let empfangen = rx_b.try_recv().unwrap();
        // Als Mitglied empfangen: keine Mithoerer-Anpassung
        assert_eq!(empfangen.lautstaerke, 1.0);
    }

    #[tokio::test]
    async fn loopback_liefert_an_absender() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(8);
        let mut rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        let loopback = VoicePaket::neu_opus(ZIEL_LOOPBACK, 3, vec![1, 2, 3]);
        let ergebnis = router.paket_routen(SessionId(1), &loopback, mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 1);
        assert_eq!(rx_a.try_recv().unwrap().sequenz, 3);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn fluester_erreicht_nur_materialisierte_ziele() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(9);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);
        let mut rx_c = beitreten(&router, 3, 3, 80);

        // Slot 5 zielt auf Session 3 (anderer Kanal)
        router.fluester().materialisieren(SessionId(1), 5, vec![SessionId(3)]);

        let fluester_paket = VoicePaket::neu_opus(5, 0, vec![9]);
        let ergebnis =
            router.paket_routen(SessionId(1), &fluester_paket, mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 1);
        assert!(rx_c.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn gelinkter_kanal_empfaengt() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(10);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 80);

        router.links_setzen(ChannelId(40), [ChannelId(80)].into_iter().collect());

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn schwaches_signal_wird_verworfen() {
        // SFI 60, K 9, Winter: transatlantisch weit unter der Schwelle
        let router = router_mit_zustand(60, 9, Jahreszeit::Winter);
        let mut rng = StdRng::seed_from_u64(11);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        router.locator_setzen(SessionId(1), Some(Locator::parse("JO59jw").unwrap()));
        router.locator_setzen(SessionId(2), Some(Locator::parse("FN31pr").unwrap()));

        let ergebnis = router.paket_routen(SessionId(1), &paket(0), mittag(), 0, &mut rng);
        assert_eq!(ergebnis.zugestellt, 0);
        assert_eq!(ergebnis.schwelle_verworfen, 1);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn starkes_signal_wird_degradiert_zugestellt() {
        // Nachbar-Locators unter guten Bedingungen: Signal weit ueber
        // der Schwelle, Zustellung mit getaggten Effekten
        let router = router_mit_zustand(200, 0, Jahreszeit::Sommer);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        router.locator_setzen(SessionId(1), Some(Locator::parse("JO59jw").unwrap()));
        router.locator_setzen(SessionId(2), Some(Locator::parse("JO59jx").unwrap()));

        // Mehrere Versuche: der Bernoulli-Wurf kann einzelne Pakete
        // verwerfen, aber nicht alle
        let mut rng = StdRng::seed_from_u64(12);
        let mut zugestellt = 0;
        for sequenz in 0..20u32 {
            let ergebnis =
                router.paket_routen(SessionId(1), &paket(sequenz), mittag(), 1000, &mut rng);
            assert_eq!(ergebnis.schwelle_verworfen, 0);
            zugestellt += ergebnis.zugestellt;
        }
        assert!(zugestellt > 0);
        let empfangen = rx_b.try_recv().unwrap();
        assert!(empfangen.jitter >= 0.0 && empfangen.jitter <= 0.9);
        assert!(empfangen.rauschen >= 0.0 && empfangen.rauschen <= 0.9);
    }

    #[tokio::test]
    async fn kanalwechsel_mit_automatischem_verlassen() {
        let router = router();
        let _rx = beitreten(&router, 1, 1, 40);
        assert_eq!(router.kanal_von(SessionId(1)), Some(ChannelId(40)));

        router.kanal_beitreten(SessionId(1), ChannelId(80));
        assert_eq!(router.kanal_von(SessionId(1)), Some(ChannelId(80)));
        assert!(router.mitglieder(ChannelId(40)).is_empty());
        assert_eq!(router.mitglieder(ChannelId(80)), vec![SessionId(1)]);
    }

    #[tokio::test]
    async fn teilnehmer_entfernen_raeumt_auf() {
        let router = router();
        let _rx = beitreten(&router, 1, 1, 40);
        router.fluester().materialisieren(SessionId(1), 3, vec![SessionId(2)]);

        router.teilnehmer_entfernen(SessionId(1));
        assert!(router.kanal_von(SessionId(1)).is_none());
        assert!(router.mitglieder(ChannelId(40)).is_empty());
        assert!(router.fluester().empfaenger(SessionId(1), 3).is_none());
    }

    #[tokio::test]
    async fn ping_pakete_werden_nicht_geroutet() {
        let router = router();
        let mut rng = StdRng::seed_from_u64(13);
        let _rx_a = beitreten(&router, 1, 1, 40);
        let mut rx_b = beitreten(&router, 2, 2, 40);

        let ping = VoicePaket::neu_ping(12345);
        let ergebnis = router.paket_routen(SessionId(1), &ping, mittag(), 0, &mut rng);
        assert_eq!(ergebnis, RoutingErgebnis::default());
        assert!(rx_b.try_recv().is_err());
    }
}
