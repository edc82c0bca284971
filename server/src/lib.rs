//! Kurzwelle Server – Verdrahtung und Lebenszyklus
//!
//! Baut aus der Konfiguration den geteilten Zustand auf (Store,
//! Kanalbaum, ACL, Ausbreitungsmodell, Module), bindet TCP und UDP auf
//! denselben Port und betreibt die periodische Ionosphaeren-
//! Aktualisierung.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;

use kurzwelle_core::types::EigenschaftsTag;
use kurzwelle_core::{KurzwelleError, Result};
use kurzwelle_modules::{themen, Ereignis, ModulManager, UserStatistikModul};
use kurzwelle_propagation::{Jahreszeit, Locator};
use kurzwelle_protocol::control::{ControlMessage, PropagationUpdate, SignalQualityUpdate};
use kurzwelle_signaling::{verbindung_bedienen, ServerZustand, SignalingKonfiguration};
use kurzwelle_store::models::AclZeile;
use kurzwelle_store::traits::{AclStore, BenutzerStore};
use kurzwelle_store::MemoryStore;
use kurzwelle_voice::{UdpKonfiguration, UdpServer};

use crate::config::{Prinzipal, ServerKonfiguration};

/// Der Kurzwelle-Server
pub struct Server {
    konfiguration: ServerKonfiguration,
}

impl Server {
    /// Erstellt den Server aus einer Konfiguration
    pub fn neu(konfiguration: ServerKonfiguration) -> Self {
        Self { konfiguration }
    }

    /// Startet den Server und laeuft bis zum Shutdown-Signal
    ///
    /// # Fehler
    /// - `Konfiguration` bei kaputter Konfiguration oder Bind-Fehler
    /// - andere Varianten bei Laufzeitfehlern
    pub async fn starten(self) -> Result<()> {
        let konfiguration = self.konfiguration;

        let signaling = SignalingKonfiguration {
            max_benutzer: konfiguration.users,
            bandbreite: konfiguration.bandwidth,
            timeout: Duration::from_secs(konfiguration.timeout),
            handshake_frist: Duration::from_secs(10),
            willkommenstext: konfiguration.welcometext.clone(),
            autoregister: konfiguration.autoregister,
        };

        // Persistenz: der Kern kennt nur die Store-Vertraege; das
        // In-Memory-Backend ist die mitgelieferte Implementierung
        let store = Arc::new(MemoryStore::neu());
        tracing::info!(database = %konfiguration.database, "Store initialisiert");

        let zustand = ServerZustand::neu(signaling, store);

        kanaele_einrichten(&zustand, &konfiguration).await?;
        ausbreitung_einrichten(&zustand, &konfiguration);
        module_einrichten(&zustand, &konfiguration);

        // TCP und UDP auf demselben Port
        let bind_adresse = konfiguration.bind_adresse();
        let listener = TcpListener::bind(&bind_adresse).await.map_err(|e| {
            KurzwelleError::Konfiguration(format!("TCP-Bind auf {bind_adresse}: {e}"))
        })?;
        let udp_adresse = bind_adresse.parse().map_err(|e| {
            KurzwelleError::Konfiguration(format!("Bind-Adresse {bind_adresse}: {e}"))
        })?;
        let udp = Arc::new(
            UdpServer::binden(
                UdpKonfiguration {
                    bind_adresse: udp_adresse,
                },
                zustand.router.clone(),
                Arc::clone(&zustand.voice),
            )
            .await
            .map_err(|e| {
                KurzwelleError::Konfiguration(format!("UDP-Bind auf {bind_adresse}: {e}"))
            })?,
        );

        tracing::info!(
            adresse = %bind_adresse,
            max_benutzer = konfiguration.users,
            "Kurzwelle-Server bereit"
        );

        // Hintergrund-Tasks
        {
            let udp = Arc::clone(&udp);
            tokio::spawn(async move { udp.empfangen().await });
        }
        signalqualitaet_task(Arc::clone(&zustand));
        if konfiguration.hf_propagation.enabled {
            ausbreitungs_tick_task(
                Arc::clone(&zustand),
                Duration::from_secs(konfiguration.hf_propagation.update_interval * 60),
            );
        }

        // Accept-Schleife bis Ctrl-C
        loop {
            tokio::select! {
                angenommen = listener.accept() => {
                    match angenommen {
                        Ok((stream, peer)) => {
                            let zustand = Arc::clone(&zustand);
                            let udp = Arc::clone(&udp);
                            tokio::spawn(async move {
                                verbindung_bedienen(zustand, stream, peer, Some(udp)).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(fehler = %e, "Accept fehlgeschlagen");
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        zustand.module.herunterfahren_alle();
        for handle in zustand.sessions_alle() {
            handle.abbruch.cancel();
        }
        tracing::info!("Kurzwelle-Server beendet");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aufbau aus der Konfiguration
// ---------------------------------------------------------------------------

async fn kanaele_einrichten(
    zustand: &Arc<ServerZustand<MemoryStore>>,
    konfiguration: &ServerKonfiguration,
) -> Result<()> {
    let kanaele = konfiguration.kanaele_parsen()?;
    let links = konfiguration.links_parsen()?;

    {
        let mut schicht = zustand.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
        for (id, name) in kanaele {
            if id.ist_root() {
                // Kanal 0 existiert bereits; nur der Name ist konfigurierbar
                if let Some(root) = schicht.baum.kanal_mut(id) {
                    root.name = name;
                }
                continue;
            }
            schicht.baum.anlegen_mit_id(id, kurzwelle_core::types::ChannelId::ROOT, name)?;
        }
        for (id, beschreibung) in &konfiguration.channel_description {
            let Ok(id) = id.parse::<u32>() else { continue };
            if let Some(kanal) = schicht.baum.kanal_mut(kurzwelle_core::types::ChannelId(id)) {
                kanal.beschreibung = beschreibung.clone();
            }
        }
        for (von, nach) in links {
            if let Err(e) = schicht.baum.perm_link_setzen(von, nach) {
                tracing::warn!(fehler = %e, "Konfigurierter Link nicht setzbar");
            }
        }
    }

    // ACL-Zeilen: Benutzer-Prinzipale gegen den Store aufloesen
    let mut zeilen_pro_kanal: std::collections::HashMap<
        kurzwelle_core::types::ChannelId,
        Vec<AclZeile>,
    > = std::collections::HashMap::new();
    for geparst in konfiguration.acl_parsen()? {
        let (user_id, gruppe) = match &geparst.prinzipal {
            Prinzipal::Gruppe(name) => (None, Some(name.clone())),
            Prinzipal::Benutzer(name) => {
                match zustand.store.laden_nach_name(name).await? {
                    Some(benutzer) => (Some(benutzer.id), None),
                    None => {
                        tracing::warn!(name, "ACL-Prinzipal unbekannt, Zeile uebersprungen");
                        continue;
                    }
                }
            }
        };
        zeilen_pro_kanal.entry(geparst.kanal).or_default().push(AclZeile {
            kanal_id: geparst.kanal,
            user_id,
            gruppe,
            erlauben: geparst.erlauben,
            verweigern: geparst.verweigern,
            hier_anwenden: true,
            unterkanaele_anwenden: true,
            geerbt: false,
        });
    }

    for (kanal, zeilen) in zeilen_pro_kanal {
        zustand.store.setzen(kanal, zeilen.clone()).await?;
        let mut schicht = zustand.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
        let kurzwelle_signaling::server_state::KanalSchicht { baum, acl } = &mut *schicht;
        acl.zeilen_setzen(baum, kanal, zeilen);
    }

    zustand.links_spiegeln();
    Ok(())
}

fn ausbreitung_einrichten(
    zustand: &Arc<ServerZustand<MemoryStore>>,
    konfiguration: &ServerKonfiguration,
) {
    let hf = &konfiguration.hf_propagation;
    if !hf.enabled {
        tracing::warn!("HF-Band-Simulation ist in der Konfiguration deaktiviert");
        return;
    }

    zustand.simulation.sfi_setzen(hf.solar_flux_index);
    zustand.simulation.k_index_setzen(hf.k_index);
    if hf.auto_season {
        zustand.simulation.auto_jahreszeit_setzen(true, Utc::now());
    } else if let Some(jahreszeit) = Jahreszeit::from_u8(hf.season) {
        zustand.simulation.jahreszeit_setzen(jahreszeit);
    }

    if hf.use_external_data {
        tracing::info!(
            dxview = hf.use_dxview_data,
            swpc = hf.use_swpc_data,
            "Externe Sonnenwetter-Quellen aktiviert (Fetcher laeuft ausserhalb)"
        );
    }

    zustand.offene_baender_anwenden();
}

fn module_einrichten(
    zustand: &Arc<ServerZustand<MemoryStore>>,
    konfiguration: &ServerKonfiguration,
) {
    let state_dir = std::path::Path::new(&konfiguration.database)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let stats = UserStatistikModul::neu(kurzwelle_modules::stats::standard_verzeichnis(state_dir));
    if let Err(e) = zustand.module.registrieren(Arc::new(stats)) {
        tracing::error!(fehler = %e, "Statistik-Modul nicht registrierbar");
    }

    if !zustand.module.initialisieren_alle() {
        tracing::warn!("Mindestens ein Modul wurde nicht initialisiert");
    }

    ModulManager::verteiler_starten(
        Arc::clone(&zustand.module),
        &zustand.bus,
        &[
            themen::AUSBREITUNG_AKTUALISIERT,
            themen::SIGNALSTAERKE_GEAENDERT,
            themen::MUF_GEAENDERT,
            themen::EXTERNE_DATEN_AKTUALISIERT,
            themen::BENUTZER_AUTHENTIFIZIERT,
            themen::BENUTZER_REGISTRIERT,
            themen::BENUTZER_DEREGISTRIERT,
            themen::BENUTZER_EIGENSCHAFTEN_GEAENDERT,
        ],
    );
}

// ---------------------------------------------------------------------------
// Hintergrund-Tasks
// ---------------------------------------------------------------------------

/// Periodischer Ausbreitungs-Tick
///
/// Die Simulation koalesziert ueberlappende Ticks selbst; hier wird
/// nach jedem wirksamen Tick der Bandplan neu verlinkt, alle Clients
/// informiert und Benutzern mit Locator eine frische Band-Empfehlung
/// geschickt.
fn ausbreitungs_tick_task(zustand: Arc<ServerZustand<MemoryStore>>, intervall: Duration) {
    // Intervall 0 waere ein Konfigurationsfehler; mindestens eine Minute
    let intervall = intervall.max(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut takt = tokio::time::interval(intervall);
        takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Erster Tick feuert sofort: initiale Empfehlungen nach dem Start
        loop {
            takt.tick().await;
            if !zustand.simulation.aktualisieren(Utc::now()) {
                continue;
            }
            zustand.offene_baender_anwenden();
            kurzwelle_signaling::dispatcher::fluester_neu_aufloesen(&zustand).await;

            let ionosphaere = zustand.simulation.zustand();
            zustand.rundruf(&ControlMessage::PropagationUpdate(PropagationUpdate {
                sfi: ionosphaere.sfi,
                k_index: ionosphaere.k_index,
                jahreszeit: ionosphaere.jahreszeit as u8,
                muf: ionosphaere.muf,
            }));

            empfehlungen_verschicken(&zustand).await;
        }
    });
}

/// Schickt jedem Benutzer mit Grid-Locator die aktuelle Band-Empfehlung
async fn empfehlungen_verschicken(zustand: &Arc<ServerZustand<MemoryStore>>) {
    for handle in zustand.sessions_alle() {
        if !handle.ist_authentifiziert() {
            continue;
        }
        let user_id = handle.daten().user_id;
        if !user_id.ist_registriert() {
            continue;
        }
        let locator = match zustand
            .store
            .eigenschaft_lesen(user_id, EigenschaftsTag::GridLocator)
            .await
        {
            Ok(Some(wert)) => match Locator::parse(&wert) {
                Ok(locator) => locator,
                Err(_) => continue,
            },
            _ => continue,
        };
        let text = zustand.simulation.empfehlungs_text(&locator, Utc::now());
        handle.senden(ControlMessage::text_an_session(handle.id, text));
    }
}

/// Meldet Signalstaerke-Aenderungen als SignalQualityUpdate an die
/// betroffenen Session-Paare
fn signalqualitaet_task(zustand: Arc<ServerZustand<MemoryStore>>) {
    let mut rx = zustand.bus.abonnieren(themen::SIGNALSTAERKE_GEAENDERT);
    tokio::spawn(async move {
        loop {
            let ereignis = match rx.recv().await {
                Ok(ereignis) => ereignis,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(verpasst = n, "Signalstaerke-Ereignisse verpasst");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let Ereignis::SignalstaerkeGeaendert { grid_a, grid_b, staerke } = ereignis else {
                continue;
            };

            // Sessions den beiden Locators zuordnen
            let mut in_a = Vec::new();
            let mut in_b = Vec::new();
            for handle in zustand.sessions_alle() {
                let user_id = handle.daten().user_id;
                if !user_id.ist_registriert() {
                    continue;
                }
                let locator = zustand
                    .store
                    .eigenschaft_lesen(user_id, EigenschaftsTag::GridLocator)
                    .await
                    .ok()
                    .flatten();
                match locator.as_deref() {
                    Some(wert) if wert == grid_a => in_a.push(handle.id),
                    Some(wert) if wert == grid_b => in_b.push(handle.id),
                    _ => {}
                }
            }

            for von in &in_a {
                for zu in &in_b {
                    if von == zu {
                        continue;
                    }
                    let nachricht =
                        ControlMessage::SignalQualityUpdate(SignalQualityUpdate {
                            von_session: *von,
                            zu_session: *zu,
                            qualitaet: staerke,
                        });
                    zustand.senden_an(*von, nachricht.clone());
                    zustand.senden_an(*zu, nachricht);
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kurzwelle_channels::Berechtigung;
    use kurzwelle_core::types::{ChannelId, UserId};

    fn test_zustand() -> Arc<ServerZustand<MemoryStore>> {
        ServerZustand::neu(
            SignalingKonfiguration::default(),
            Arc::new(MemoryStore::neu()),
        )
    }

    fn band_konfiguration() -> ServerKonfiguration {
        let mut cfg = ServerKonfiguration::default();
        for band in [20u32, 40, 80] {
            cfg.channels.insert(band.to_string(), format!("{band}m"));
        }
        cfg.channel_description
            .insert("40".into(), "Das 40-Meter-Band".into());
        cfg.channel_links.insert("40".into(), "80".into());
        cfg.acl.insert("20".into(), "@all:-whisper".into());
        cfg
    }

    #[tokio::test]
    async fn kanaele_aus_konfiguration() {
        let zustand = test_zustand();
        kanaele_einrichten(&zustand, &band_konfiguration()).await.unwrap();

        let schicht = zustand.kanalschicht.read().unwrap();
        assert!(schicht.baum.existiert(ChannelId(20)));
        assert!(schicht.baum.existiert(ChannelId(40)));
        assert_eq!(
            schicht.baum.kanal(ChannelId(40)).unwrap().beschreibung,
            "Das 40-Meter-Band"
        );
        assert!(schicht
            .baum
            .kanal(ChannelId(40))
            .unwrap()
            .perm_links
            .contains(&ChannelId(80)));
    }

    #[tokio::test]
    async fn acl_aus_konfiguration_wirkt() {
        let zustand = test_zustand();
        kanaele_einrichten(&zustand, &band_konfiguration()).await.unwrap();

        // @all:-whisper auf Kanal 20
        let darf_fluestern = zustand
            .berechtigung_pruefen(
                kurzwelle_core::types::SessionId(1),
                UserId(1),
                ChannelId(20),
                Berechtigung::FLUESTERN,
            )
            .await;
        assert!(!darf_fluestern);

        let darf_sprechen = zustand
            .berechtigung_pruefen(
                kurzwelle_core::types::SessionId(1),
                UserId(1),
                ChannelId(20),
                Berechtigung::SPRECHEN,
            )
            .await;
        assert!(darf_sprechen);
    }

    #[tokio::test]
    async fn benutzer_prinzipal_wird_aufgeloest() {
        let zustand = test_zustand();
        let benutzer = zustand
            .store
            .registrieren("DL1ABC", None, None)
            .await
            .unwrap();

        let mut cfg = band_konfiguration();
        cfg.acl
            .insert("40".into(), "#DL1ABC:+configurepropagation".into());
        kanaele_einrichten(&zustand, &cfg).await.unwrap();

        let zeilen = zustand.store.zeilen(ChannelId(40)).await.unwrap();
        assert_eq!(zeilen.len(), 1);
        assert_eq!(zeilen[0].user_id, Some(benutzer.id));
    }

    #[tokio::test]
    async fn ausbreitung_aus_konfiguration() {
        let zustand = test_zustand();
        let mut cfg = band_konfiguration();
        cfg.hf_propagation.solar_flux_index = 200;
        cfg.hf_propagation.k_index = 1;
        cfg.hf_propagation.auto_season = false;
        cfg.hf_propagation.season = 2;

        kanaele_einrichten(&zustand, &cfg).await.unwrap();
        ausbreitung_einrichten(&zustand, &cfg);

        let ionosphaere = zustand.simulation.zustand();
        assert_eq!(ionosphaere.sfi, 200);
        assert_eq!(ionosphaere.k_index, 1);
        assert_eq!(ionosphaere.jahreszeit, Jahreszeit::Sommer);
        assert!(!ionosphaere.auto_jahreszeit);
    }

    #[tokio::test]
    async fn root_name_aus_konfiguration() {
        let zustand = test_zustand();
        let mut cfg = ServerKonfiguration::default();
        cfg.channels.insert("0".into(), "Shack".into());
        kanaele_einrichten(&zustand, &cfg).await.unwrap();

        let schicht = zustand.kanalschicht.read().unwrap();
        assert_eq!(schicht.baum.kanal(ChannelId::ROOT).unwrap().name, "Shack");
    }
}
