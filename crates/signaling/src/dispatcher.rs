//! Nachrichten-Dispatch
//!
//! Verarbeitet die Control-Nachrichten einer authentifizierten Session.
//! Berechtigungs- und Validierungsfehler werden der Session beantwortet
//! und beenden sie nicht; nur Transport- und Protokollfehler propagieren
//! als `Err` zum Verbindungs-Task, der daraufhin schliesst.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use kurzwelle_channels::Berechtigung;
use kurzwelle_core::types::{ChannelId, EigenschaftsTag, SessionId, UserId};
use kurzwelle_core::{KurzwelleError, Result};
use kurzwelle_modules::Ereignis;
use kurzwelle_propagation::{Jahreszeit, Locator};
use kurzwelle_protocol::control::{
    self, Acl, AclInfo, BanInfo, BanList, ChannelListener, ChannelRemove, ChannelState,
    ControlMessage, CryptSetup, HfBandSimulationUpdate, PermissionQuery, Ping,
    PluginDataTransmission, PropagationUpdate, QueryUsers, RegistrierterBenutzer, TextMessage,
    UserList, UserRemove, UserState, UserStats, VoiceTarget,
};
use kurzwelle_protocol::voice::VoicePaket;
use kurzwelle_store::models::{AclZeile, BanEintrag};
use kurzwelle_store::traits::{AclStore, BanStore, BenutzerStore, GruppenStore, TexturStore};
use kurzwelle_voice::FluesterDefinition;

use crate::broadcast;
use crate::server_state::{ServerZustand, VollStore};
use crate::session::SessionHandle;

/// Verarbeitet eine Nachricht einer authentifizierten Session
pub async fn nachricht_verarbeiten<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    nachricht: ControlMessage,
) -> Result<()> {
    match nachricht {
        ControlMessage::Ping(p) => ping(session, p),
        ControlMessage::UdpTunnel(t) => udp_tunnel(zustand, session, t.daten).await,
        ControlMessage::UserState(s) => user_state(zustand, session, s).await,
        ControlMessage::TextMessage(t) => text_message(zustand, session, t).await,
        ControlMessage::ChannelState(c) => channel_state(zustand, session, c).await,
        ControlMessage::ChannelRemove(c) => channel_remove(zustand, session, c).await,
        ControlMessage::ChannelListener(l) => channel_listener(zustand, session, l).await,
        ControlMessage::BanList(b) => ban_list(zustand, session, b).await,
        ControlMessage::Acl(a) => acl(zustand, session, a).await,
        ControlMessage::QueryUsers(q) => query_users(zustand, session, q).await,
        ControlMessage::CryptSetup(c) => crypt_setup(session, c),
        ControlMessage::VoiceTarget(v) => voice_target(zustand, session, v).await,
        ControlMessage::PermissionQuery(q) => permission_query(zustand, session, q).await,
        ControlMessage::UserStats(u) => user_stats(zustand, session, u),
        ControlMessage::RequestBlob(r) => request_blob(zustand, session, r).await,
        ControlMessage::UserRemove(u) => user_remove(zustand, session, u).await,
        ControlMessage::HfBandSimulationUpdate(h) => hf_update(zustand, session, h).await,
        ControlMessage::PluginDataTransmission(p) => plugin_daten(zustand, session, p),
        ControlMessage::UserList(u) => user_list(zustand, session, u).await,
        // Server-seitige Nachrichten von Clients werden ignoriert
        ControlMessage::Version(_)
        | ControlMessage::Authenticate(_)
        | ControlMessage::Reject(_)
        | ControlMessage::ServerSync(_)
        | ControlMessage::ServerConfig(_)
        | ControlMessage::SuggestConfig(_)
        | ControlMessage::CodecVersion(_)
        | ControlMessage::SignalQualityUpdate(_)
        | ControlMessage::PropagationUpdate(_)
        | ControlMessage::ContextActionModify(_)
        | ControlMessage::ContextAction(_)
        | ControlMessage::PermissionDenied(_) => {
            tracing::debug!(session = %session.id, "Server-seitige Nachricht vom Client ignoriert");
            Ok(())
        }
    }
}

fn zugriff_verweigert(session: &SessionHandle, grund: &str) {
    session.senden(ControlMessage::zugriff_verweigert(grund));
}

// ---------------------------------------------------------------------------
// Keepalive und Voice-Tunnel
// ---------------------------------------------------------------------------

fn ping(session: &Arc<SessionHandle>, p: Ping) -> Result<()> {
    session.aktivitaet_melden();
    let (gut, resyncs) = {
        let daten = session.daten();
        (daten.crypt.gut, daten.crypt.resyncs)
    };
    session.senden(ControlMessage::Ping(Ping {
        zeitstempel_ms: p.zeitstempel_ms,
        gute_pakete: gut,
        resyncs,
    }));
    Ok(())
}

async fn udp_tunnel<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    daten: Vec<u8>,
) -> Result<()> {
    session.aktivitaet_melden();
    // Kaputte getunnelte Frames sind ein Protokollfehler
    let paket = VoicePaket::decode(&daten)
        .map_err(|e| KurzwelleError::Protokoll(format!("UDPTunnel: {e}")))?;

    let jetzt = Utc::now();
    let jetzt_ms = jetzt.timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    zustand
        .router
        .paket_routen(session.id, &paket, jetzt, jetzt_ms, &mut rng);
    Ok(())
}

// ---------------------------------------------------------------------------
// UserState
// ---------------------------------------------------------------------------

async fn user_state<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: UserState,
) -> Result<()> {
    let eigenes_ziel = anfrage.session.is_none() || anfrage.session == Some(session.id);

    if eigenes_ziel {
        selbst_aendern(zustand, session, anfrage).await
    } else {
        fremde_session_aendern(zustand, session, anfrage).await
    }
}

async fn selbst_aendern<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: UserState,
) -> Result<()> {
    let user_id = session.daten().user_id;
    let mut geaendert = UserState {
        session: Some(session.id),
        ..Default::default()
    };

    {
        let mut daten = session.daten();
        if let Some(wert) = anfrage.self_mute {
            daten.selbst_mute = wert;
            geaendert.self_mute = Some(wert);
        }
        if let Some(wert) = anfrage.self_deaf {
            daten.selbst_deaf = wert;
            geaendert.self_deaf = Some(wert);
        }
        if let Some(wert) = anfrage.aufnahme {
            daten.aufnahme = wert;
            geaendert.aufnahme = Some(wert);
        }
    }
    flags_spiegeln(zustand, session).await;

    // Kanalwechsel
    if let Some(ziel_kanal) = anfrage.kanal_id {
        match kanal_betreten(zustand, session, ziel_kanal).await {
            Ok(()) => {
                geaendert.kanal_id = Some(ziel_kanal);
                fluester_neu_aufloesen(zustand).await;
            }
            Err(KurzwelleError::ZugriffVerweigert(grund)) => {
                zugriff_verweigert(session, &grund);
            }
            Err(e) => return Err(e),
        }
    }

    // Persistierte Eigenschaften
    for eigenschaft in anfrage.eigenschaften {
        match eigenschaft.tag {
            EigenschaftsTag::GridLocator => {
                grid_locator_setzen(zustand, session, user_id, &eigenschaft.wert).await?;
                geaendert.eigenschaften.push(eigenschaft);
            }
            EigenschaftsTag::Admin => {
                // Selbst-Ernennung ist nie zulaessig
                zugriff_verweigert(session, "Admin-Flag ist nicht selbst setzbar");
            }
            tag => {
                if user_id.ist_registriert() {
                    eigenschaft_persistieren(zustand, session, user_id, tag, &eigenschaft.wert)
                        .await;
                    geaendert.eigenschaften.push(eigenschaft);
                }
            }
        }
    }

    zustand.rundruf(&ControlMessage::UserState(geaendert));
    Ok(())
}

async fn fremde_session_aendern<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: UserState,
) -> Result<()> {
    let Some(ziel_id) = anfrage.session else {
        return Ok(());
    };
    let Some(ziel) = zustand.session(ziel_id) else {
        zugriff_verweigert(session, "Unbekannte Ziel-Session");
        return Ok(());
    };

    let (akteur_user, ziel_kanal_aktuell) = {
        (session.daten().user_id, ziel.daten().kanal)
    };

    // Mute/Deaf erfordert MuteDeafen im Kanal des Ziels
    if anfrage.mute.is_some() || anfrage.deaf.is_some() || anfrage.suppress.is_some() {
        let erlaubt = zustand
            .berechtigung_pruefen(
                session.id,
                akteur_user,
                ziel_kanal_aktuell,
                Berechtigung::MUTE_DEAF,
            )
            .await;
        if !erlaubt {
            zugriff_verweigert(session, "MuteDeafen fehlt");
            return Ok(());
        }
        {
            let mut daten = ziel.daten();
            if let Some(wert) = anfrage.mute {
                daten.mute = wert;
            }
            if let Some(wert) = anfrage.deaf {
                daten.deaf = wert;
            }
            if let Some(wert) = anfrage.suppress {
                daten.suppress = wert;
            }
        }
        flags_spiegeln(zustand, &ziel).await;
    }

    // Verschieben erfordert Move im Zielkanal
    if let Some(neuer_kanal) = anfrage.kanal_id {
        let erlaubt = zustand
            .berechtigung_pruefen(session.id, akteur_user, neuer_kanal, Berechtigung::VERSCHIEBEN)
            .await;
        if !erlaubt {
            zugriff_verweigert(session, "Move fehlt");
            return Ok(());
        }
        if let Err(e) = kanal_betreten_erzwingen(zustand, &ziel, neuer_kanal) {
            zugriff_verweigert(session, &e.to_string());
            return Ok(());
        }
        fluester_neu_aufloesen(zustand).await;
    }

    let mut geaendert = anfrage;
    geaendert.akteur = Some(session.id);
    zustand.rundruf(&ControlMessage::UserState(geaendert));
    Ok(())
}

/// Spiegelt die Empfangs-Flags einer Session in den Router
async fn flags_spiegeln<S: VollStore>(zustand: &Arc<ServerZustand<S>>, session: &Arc<SessionHandle>) {
    let (deaf, selbst_deaf, user_id) = {
        let daten = session.daten();
        (daten.deaf, daten.selbst_deaf, daten.user_id)
    };
    let nur_hoeren = if user_id.ist_registriert() {
        matches!(
            zustand
                .store
                .eigenschaft_lesen(user_id, EigenschaftsTag::NurHoeren)
                .await,
            Ok(Some(wert)) if wert == "1"
        )
    } else {
        false
    };
    zustand
        .router
        .flags_setzen(session.id, deaf, selbst_deaf, nur_hoeren);
}

async fn kanal_betreten<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    kanal: ChannelId,
) -> Result<()> {
    {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        if !schicht.baum.existiert(kanal) {
            return Err(KurzwelleError::ZugriffVerweigert(format!(
                "Kanal existiert nicht: {kanal}"
            )));
        }
    }

    let user_id = session.daten().user_id;
    let erlaubt = zustand
        .berechtigung_pruefen(session.id, user_id, kanal, Berechtigung::BETRETEN)
        .await;
    if !erlaubt {
        return Err(KurzwelleError::ZugriffVerweigert("Enter fehlt".into()));
    }

    kanal_betreten_erzwingen(zustand, session, kanal)
}

/// Kanalwechsel ohne Berechtigungspruefung (Move, interne Wechsel)
pub fn kanal_betreten_erzwingen<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    kanal: ChannelId,
) -> Result<()> {
    {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        if !schicht.baum.existiert(kanal) {
            return Err(KurzwelleError::NichtGefunden(format!("Kanal: {kanal}")));
        }
    }
    session.daten().kanal = kanal;
    zustand.router.kanal_beitreten(session.id, kanal);
    Ok(())
}

async fn grid_locator_setzen<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    user_id: UserId,
    wert: &str,
) -> Result<()> {
    // Validierungsfehler: Warnung als Textnachricht, Session lebt weiter
    let locator = match Locator::parse(wert) {
        Ok(locator) => locator,
        Err(_) => {
            session.senden(ControlMessage::text_an_session(
                session.id,
                format!(
                    "Warnung: Ungueltiger Maidenhead-Locator {wert:?}. \
                     Erwartet wird z.B. 'JO59' oder 'JO59jw'."
                ),
            ));
            return Ok(());
        }
    };

    let kanal = session.daten().kanal;
    let erlaubt = zustand
        .berechtigung_pruefen(session.id, user_id, kanal, Berechtigung::GRID_LOCATOR_SETZEN)
        .await;
    if !erlaubt {
        zugriff_verweigert(session, "SetGridLocator fehlt");
        return Ok(());
    }

    if user_id.ist_registriert() {
        eigenschaft_persistieren(
            zustand,
            session,
            user_id,
            EigenschaftsTag::GridLocator,
            locator.as_str(),
        )
        .await;
    }
    zustand
        .router
        .locator_setzen(session.id, Some(locator.clone()));
    zustand
        .bus
        .veroeffentlichen(Ereignis::BenutzerEigenschaftenGeaendert { user_id });

    // Band-Empfehlungen direkt hinterher
    let text = zustand.simulation.empfehlungs_text(&locator, Utc::now());
    session.senden(ControlMessage::text_an_session(session.id, text));
    Ok(())
}

/// Persistiert eine Eigenschaft; Schreibfehler werden einmal wiederholt
/// und danach als "internal" gemeldet
async fn eigenschaft_persistieren<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    user_id: UserId,
    tag: EigenschaftsTag,
    wert: &str,
) {
    for versuch in 0..2 {
        match zustand.store.eigenschaft_setzen(user_id, tag, wert).await {
            Ok(()) => {
                zustand
                    .bus
                    .veroeffentlichen(Ereignis::BenutzerEigenschaftenGeaendert { user_id });
                return;
            }
            Err(e) if versuch == 0 => {
                tracing::warn!(user_id = %user_id, fehler = %e, "Store-Schreibfehler, wiederhole");
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, fehler = %e, "Store-Schreibfehler nach Wiederholung");
                zugriff_verweigert(session, "internal");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TextMessage
// ---------------------------------------------------------------------------

async fn text_message<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: TextMessage,
) -> Result<()> {
    let user_id = session.daten().user_id;

    let mut nachricht = anfrage.clone();
    nachricht.absender = Some(session.id);

    // Direkte Session-Ziele
    for ziel in &anfrage.sessions {
        zustand.senden_an(*ziel, ControlMessage::TextMessage(nachricht.clone()));
    }

    // Kanal-Ziele (mit und ohne Unterbaum)
    let mut ziel_kanaele: BTreeSet<ChannelId> = anfrage.kanaele.iter().copied().collect();
    {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        for wurzel in &anfrage.baeume {
            ziel_kanaele.extend(schicht.baum.unterbaum(*wurzel));
        }
    }

    for kanal in ziel_kanaele {
        let erlaubt = zustand
            .berechtigung_pruefen(session.id, user_id, kanal, Berechtigung::TEXTNACHRICHT)
            .await;
        if !erlaubt {
            zugriff_verweigert(session, "TextMessage fehlt");
            continue;
        }
        zustand.rundruf_kanal(kanal, &ControlMessage::TextMessage(nachricht.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Kanaele
// ---------------------------------------------------------------------------

async fn channel_state<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: ChannelState,
) -> Result<()> {
    let user_id = session.daten().user_id;

    match anfrage.kanal_id {
        None => {
            // Kanal anlegen
            let parent = anfrage.parent.unwrap_or(ChannelId::ROOT);
            let temporaer = anfrage.temporaer.unwrap_or(false);
            let benoetigt = if temporaer {
                Berechtigung::TEMP_KANAL_ANLEGEN
            } else {
                Berechtigung::KANAL_ANLEGEN
            };
            let erlaubt = zustand
                .berechtigung_pruefen(session.id, user_id, parent, benoetigt)
                .await;
            if !erlaubt {
                zugriff_verweigert(session, "MakeChannel fehlt");
                return Ok(());
            }
            let Some(name) = anfrage.name.clone() else {
                zugriff_verweigert(session, "Kanalname fehlt");
                return Ok(());
            };

            let neu = {
                let mut schicht =
                    zustand.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
                let id = schicht.baum.anlegen(parent, name, temporaer)?;
                if let Some(beschreibung) = &anfrage.beschreibung {
                    if let Some(kanal) = schicht.baum.kanal_mut(id) {
                        kanal.beschreibung = beschreibung.clone();
                    }
                }
                if let Some(position) = anfrage.position {
                    if let Some(kanal) = schicht.baum.kanal_mut(id) {
                        kanal.position = position;
                    }
                }
                broadcast::kanal_state(schicht.baum.kanal(id).expect("gerade angelegt"))
            };
            zustand.rundruf(&neu);
        }
        Some(kanal_id) => {
            // Kanal bearbeiten
            let links_aendern = !anfrage.links_hinzu.is_empty() || !anfrage.links_weg.is_empty();
            let benoetigt = if links_aendern {
                Berechtigung::KANAL_LINKEN
            } else {
                Berechtigung::SCHREIBEN
            };
            let erlaubt = zustand
                .berechtigung_pruefen(session.id, user_id, kanal_id, benoetigt)
                .await;
            if !erlaubt {
                zugriff_verweigert(session, "Write/LinkChannel fehlt");
                return Ok(());
            }

            let aktualisiert = {
                let mut schicht =
                    zustand.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
                if !schicht.baum.existiert(kanal_id) {
                    zugriff_verweigert(session, "Kanal existiert nicht");
                    return Ok(());
                }

                for link in &anfrage.links_hinzu {
                    if let Err(e) = schicht.baum.perm_link_setzen(kanal_id, *link) {
                        tracing::debug!(fehler = %e, "Link nicht setzbar");
                    }
                }
                for link in &anfrage.links_weg {
                    schicht.baum.perm_link_entfernen(kanal_id, *link);
                }

                if let Some(kanal) = schicht.baum.kanal_mut(kanal_id) {
                    if let Some(name) = &anfrage.name {
                        kanal.name = name.clone();
                    }
                    if let Some(beschreibung) = &anfrage.beschreibung {
                        kanal.beschreibung = beschreibung.clone();
                    }
                    if let Some(position) = anfrage.position {
                        kanal.position = position;
                    }
                }

                if let Some(parent) = anfrage.parent {
                    if let Err(e) = schicht.baum.verschieben(kanal_id, parent) {
                        zugriff_verweigert(session, &e.to_string());
                        return Ok(());
                    }
                    // Strukturwechsel: Berechtigungs-Cache des Unterbaums weg
                    schicht.acl.unterbaum_invalidieren(&schicht.baum, kanal_id);
                }

                broadcast::kanal_state(schicht.baum.kanal(kanal_id).expect("geprueft"))
            };
            zustand.links_spiegeln();
            zustand.router.fluester().alle_invalidieren();
            fluester_neu_aufloesen(zustand).await;
            zustand.rundruf(&aktualisiert);
        }
    }
    Ok(())
}

async fn channel_remove<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: ChannelRemove,
) -> Result<()> {
    let user_id = session.daten().user_id;
    let erlaubt = zustand
        .berechtigung_pruefen(session.id, user_id, anfrage.kanal_id, Berechtigung::SCHREIBEN)
        .await;
    if !erlaubt {
        zugriff_verweigert(session, "Write fehlt");
        return Ok(());
    }

    let entfernte = {
        let mut schicht = zustand.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
        match schicht.baum.entfernen(anfrage.kanal_id) {
            Ok(entfernte) => {
                schicht.acl.alles_invalidieren();
                entfernte
            }
            Err(e) => {
                zugriff_verweigert(session, &e.to_string());
                return Ok(());
            }
        }
    };

    // Betroffene Sessions in den Root verschieben, Mithoerer loesen
    for kanal in &entfernte {
        for mitglied in zustand.router.mitglieder(*kanal) {
            if let Some(handle) = zustand.session(mitglied) {
                let _ = kanal_betreten_erzwingen(zustand, &handle, ChannelId::ROOT);
                zustand.rundruf(&broadcast::benutzer_state(&handle));
            }
        }
        zustand.mithoerer.kanal_leeren(*kanal);
    }
    zustand.links_spiegeln();
    zustand.router.fluester().alle_invalidieren();
    fluester_neu_aufloesen(zustand).await;

    for kanal in entfernte {
        zustand.rundruf(&ControlMessage::ChannelRemove(ChannelRemove { kanal_id: kanal }));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Mithoerer
// ---------------------------------------------------------------------------

async fn channel_listener<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: ChannelListener,
) -> Result<()> {
    let user_id = session.daten().user_id;

    {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        if !schicht.baum.existiert(anfrage.kanal_id) {
            zugriff_verweigert(session, "Kanal existiert nicht");
            return Ok(());
        }
    }

    if anfrage.hinzufuegen {
        let erlaubt = zustand
            .berechtigung_pruefen(session.id, user_id, anfrage.kanal_id, Berechtigung::MITHOEREN)
            .await;
        if !erlaubt {
            zugriff_verweigert(session, "Listen fehlt");
            return Ok(());
        }
        zustand.mithoerer.hinzufuegen(user_id, anfrage.kanal_id);
        if let Some(faktor) = anfrage.lautstaerke {
            zustand.mithoerer.lautstaerke_setzen(
                user_id,
                anfrage.kanal_id,
                kurzwelle_channels::LautstaerkeAnpassung::neu(
                    kurzwelle_channels::AnpassungsTyp::Multiplikativ,
                    faktor,
                ),
            );
        }
    } else {
        zustand.mithoerer.entfernen(user_id, anfrage.kanal_id);
    }

    zustand.rundruf(&ControlMessage::ChannelListener(ChannelListener {
        session: Some(session.id),
        ..anfrage
    }));
    Ok(())
}

// ---------------------------------------------------------------------------
// Bans
// ---------------------------------------------------------------------------

fn ban_zu_info(ban: &BanEintrag) -> BanInfo {
    BanInfo {
        adresse: ban.adresse.to_string(),
        maske: ban.praefix,
        name: ban.name.clone(),
        zert_hash: ban.zert_hash.clone(),
        grund: ban.grund.clone(),
        start: ban.start.timestamp(),
        dauer_sek: ban.dauer_sek,
    }
}

fn info_zu_ban(info: &BanInfo) -> Option<BanEintrag> {
    Some(BanEintrag {
        adresse: info.adresse.parse().ok()?,
        praefix: info.maske,
        name: info.name.clone(),
        zert_hash: info.zert_hash.clone(),
        grund: info.grund.clone(),
        start: chrono::DateTime::from_timestamp(info.start, 0)?,
        dauer_sek: info.dauer_sek,
    })
}

async fn ban_list<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: BanList,
) -> Result<()> {
    let user_id = session.daten().user_id;
    let erlaubt = zustand
        .berechtigung_pruefen(session.id, user_id, ChannelId::ROOT, Berechtigung::SCHREIBEN)
        .await;
    if !erlaubt {
        zugriff_verweigert(session, "Write fehlt");
        return Ok(());
    }

    if anfrage.abfrage {
        let bans = BanStore::alle(zustand.store.as_ref()).await?;
        session.senden(ControlMessage::BanList(BanList {
            eintraege: bans.iter().map(ban_zu_info).collect(),
            abfrage: true,
        }));
    } else {
        let neue: Vec<BanEintrag> = anfrage
            .eintraege
            .iter()
            .filter_map(info_zu_ban)
            .collect();
        if neue.len() != anfrage.eintraege.len() {
            zugriff_verweigert(session, "Ungueltige Ban-Eintraege");
            return Ok(());
        }
        zustand.store.ersetzen(neue).await?;
        tracing::info!(session = %session.id, "Ban-Liste ersetzt");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ACL
// ---------------------------------------------------------------------------

async fn acl<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: Acl,
) -> Result<()> {
    let user_id = session.daten().user_id;
    let erlaubt = zustand
        .berechtigung_pruefen(session.id, user_id, anfrage.kanal_id, Berechtigung::SCHREIBEN)
        .await;
    if !erlaubt {
        zugriff_verweigert(session, "Write fehlt");
        return Ok(());
    }

    if anfrage.abfrage {
        let zeilen = {
            let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
            schicht.acl.zeilen(anfrage.kanal_id).to_vec()
        };
        session.senden(ControlMessage::Acl(Acl {
            kanal_id: anfrage.kanal_id,
            eintraege: zeilen
                .iter()
                .map(|z| AclInfo {
                    user_id: z.user_id,
                    gruppe: z.gruppe.clone(),
                    erlauben: z.erlauben,
                    verweigern: z.verweigern,
                    hier_anwenden: z.hier_anwenden,
                    unterkanaele_anwenden: z.unterkanaele_anwenden,
                    geerbt: z.geerbt,
                })
                .collect(),
            erbt_acl: true,
            abfrage: true,
        }));
        return Ok(());
    }

    let zeilen: Vec<AclZeile> = anfrage
        .eintraege
        .iter()
        .map(|info| AclZeile {
            kanal_id: anfrage.kanal_id,
            user_id: info.user_id,
            gruppe: info.gruppe.clone(),
            erlauben: info.erlauben,
            verweigern: info.verweigern,
            hier_anwenden: info.hier_anwenden,
            unterkanaele_anwenden: info.unterkanaele_anwenden,
            geerbt: false,
        })
        .collect();

    zustand.store.setzen(anfrage.kanal_id, zeilen.clone()).await?;
    {
        let mut schicht = zustand.kanalschicht.write().unwrap_or_else(|e| e.into_inner());
        // zeilen_setzen invalidiert den Unterbaum-Cache selbst
        let crate::server_state::KanalSchicht { baum, acl } = &mut *schicht;
        acl.zeilen_setzen(baum, anfrage.kanal_id, zeilen);
    }
    zustand.router.fluester().alle_invalidieren();
    fluester_neu_aufloesen(zustand).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Abfragen
// ---------------------------------------------------------------------------

async fn query_users<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: QueryUsers,
) -> Result<()> {
    let mut antwort = QueryUsers::default();
    for id in anfrage.ids {
        if let Some(benutzer) = zustand.store.laden(id).await? {
            antwort.ids.push(benutzer.id);
            antwort.namen.push(benutzer.name);
        }
    }
    for name in anfrage.namen {
        if let Some(benutzer) = zustand.store.laden_nach_name(&name).await? {
            antwort.ids.push(benutzer.id);
            antwort.namen.push(benutzer.name);
        }
    }
    session.senden(ControlMessage::QueryUsers(antwort));
    Ok(())
}

async fn user_list<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: UserList,
) -> Result<()> {
    // Schreibzugriff: Eintraege mit leerem Namen werden deregistriert
    if !anfrage.benutzer.is_empty() {
        let user_id = session.daten().user_id;
        let erlaubt = zustand
            .berechtigung_pruefen(session.id, user_id, ChannelId::ROOT, Berechtigung::SCHREIBEN)
            .await;
        if !erlaubt {
            zugriff_verweigert(session, "Write fehlt");
            return Ok(());
        }
        for eintrag in anfrage.benutzer {
            if !eintrag.name.is_empty() {
                continue;
            }
            // Deregistrierung einer unbekannten ID ist ein No-op
            let entfernt = zustand.store.deregistrieren(eintrag.user_id).await?;
            if entfernt {
                zustand.bus.veroeffentlichen(Ereignis::BenutzerDeregistriert {
                    user_id: eintrag.user_id,
                });
                tracing::info!(user_id = %eintrag.user_id, "Benutzer deregistriert");
            }
        }
        return Ok(());
    }

    let mut benutzer = Vec::new();
    for record in BenutzerStore::alle(zustand.store.as_ref()).await? {
        let zuletzt = zustand
            .store
            .eigenschaft_lesen(record.id, EigenschaftsTag::ZuletztGesehen)
            .await?;
        let letzter_kanal = zustand
            .store
            .eigenschaft_lesen(record.id, EigenschaftsTag::LetzterKanal)
            .await?
            .and_then(|wert| wert.parse::<u32>().ok())
            .map(ChannelId);
        benutzer.push(RegistrierterBenutzer {
            user_id: record.id,
            name: record.name,
            zuletzt_gesehen: zuletzt,
            letzter_kanal,
        });
    }
    session.senden(ControlMessage::UserList(UserList { benutzer }));
    Ok(())
}

fn crypt_setup(session: &Arc<SessionHandle>, anfrage: CryptSetup) -> Result<()> {
    // Nur eine Client-Nonce: der Client fordert einen Resync an
    if anfrage.schluessel.is_none() && anfrage.client_nonce.is_some() {
        let mut daten = session.daten();
        let resync_nonce = daten.crypt.empfangs_nonce;
        daten.crypt.resync(resync_nonce);
        drop(daten);
        session.senden(ControlMessage::CryptSetup(CryptSetup {
            schluessel: None,
            client_nonce: None,
            server_nonce: Some(kurzwelle_protocol::crypto::nonce_erzeugen()),
        }));
        tracing::debug!(session = %session.id, "Krypto-Resync durchgefuehrt");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Fluester-Ziele
// ---------------------------------------------------------------------------

async fn voice_target<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: VoiceTarget,
) -> Result<()> {
    let user_id = session.daten().user_id;

    let mut definition = FluesterDefinition::default();
    for ziel in &anfrage.ziele {
        definition.sessions.extend(ziel.sessions.iter().copied());
        if let Some(kanal) = ziel.kanal_id {
            definition.kanaele.push((kanal, ziel.rekursiv));
            definition.links = definition.links || ziel.links;
        }
        if definition.gruppe.is_none() {
            definition.gruppe = ziel.gruppe.clone();
        }
    }

    if !zustand
        .router
        .fluester()
        .definieren(session.id, anfrage.slot, definition.clone())
    {
        zugriff_verweigert(session, "Ungueltiger Fluester-Slot");
        return Ok(());
    }

    // Eine Definition ohne Ziele loescht den Slot
    if !definition.ist_gueltig() {
        zustand
            .router
            .fluester()
            .materialisieren(session.id, anfrage.slot, Vec::new());
        return Ok(());
    }

    // Empfaenger sofort aufloesen und cachen
    let empfaenger =
        fluester_aufloesen(zustand, session.id, user_id, &definition).await;
    zustand
        .router
        .fluester()
        .materialisieren(session.id, anfrage.slot, empfaenger);
    Ok(())
}

/// Loest alle registrierten Fluester-Slots neu auf
///
/// Nach jeder Aenderung aufzurufen die materialisierte
/// Empfaenger-Mengen invalidiert hat (Join/Leave, Kanalstruktur, ACL,
/// Gruppen, dynamische Links); ohne Neuaufloesung routen die Slots an
/// niemanden. Slots verschwundener Sessions werden dabei entsorgt.
pub async fn fluester_neu_aufloesen<S: VollStore>(zustand: &Arc<ServerZustand<S>>) {
    for (besitzer, slot, definition) in zustand.router.fluester().alle_definitionen() {
        let Some(handle) = zustand.session(besitzer) else {
            zustand.router.fluester().session_entfernen(besitzer);
            continue;
        };
        if !definition.ist_gueltig() {
            zustand
                .router
                .fluester()
                .materialisieren(besitzer, slot, Vec::new());
            continue;
        }
        let user_id = handle.daten().user_id;
        let empfaenger = fluester_aufloesen(zustand, besitzer, user_id, &definition).await;
        zustand
            .router
            .fluester()
            .materialisieren(besitzer, slot, empfaenger);
    }
}

/// Loest eine Fluester-Definition zur Session-Menge auf
///
/// Wird bei der Registrierung und nach jeder Cache-Invalidierung
/// aufgerufen. Kanal-Ziele verlangen Whisper im jeweiligen Kanal.
pub async fn fluester_aufloesen<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    sprecher: SessionId,
    sprecher_user: UserId,
    definition: &FluesterDefinition,
) -> Vec<SessionId> {
    let mut menge: BTreeSet<SessionId> = BTreeSet::new();

    // Explizite Sessions
    for ziel in &definition.sessions {
        if zustand.session(*ziel).is_some_and(|s| s.ist_authentifiziert()) {
            menge.insert(*ziel);
        }
    }

    // Kanal-Ziele
    let mut kanaele: BTreeSet<ChannelId> = BTreeSet::new();
    {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        for (kanal, rekursiv) in &definition.kanaele {
            if !schicht.baum.existiert(*kanal) {
                continue;
            }
            if *rekursiv {
                kanaele.extend(schicht.baum.unterbaum(*kanal));
            } else {
                kanaele.insert(*kanal);
            }
            if definition.links {
                if let Some(k) = schicht.baum.kanal(*kanal) {
                    kanaele.extend(k.gelinkte());
                }
            }
        }
    }

    for kanal in kanaele {
        let erlaubt = zustand
            .berechtigung_pruefen(sprecher, sprecher_user, kanal, Berechtigung::FLUESTERN)
            .await;
        if !erlaubt {
            continue;
        }
        for mitglied in zustand.router.mitglieder(kanal) {
            if let Some(gruppe) = &definition.gruppe {
                let in_gruppe = zustand
                    .store
                    .gruppen_von(mitglied, kanal)
                    .await
                    .map(|gruppen| gruppen.iter().any(|g| g == gruppe))
                    .unwrap_or(false);
                if !in_gruppe {
                    continue;
                }
            }
            menge.insert(mitglied);
        }
    }

    menge.remove(&sprecher);
    menge.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Berechtigungs-Abfrage, Statistik, Blobs
// ---------------------------------------------------------------------------

async fn permission_query<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: PermissionQuery,
) -> Result<()> {
    let user_id = session.daten().user_id;
    let kanal = anfrage.kanal_id.unwrap_or(ChannelId::ROOT);

    let kontext = zustand.benutzer_kontext(session.id, user_id, kanal).await;
    let berechtigungen = {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        schicht
            .acl
            .effektive_berechtigungen(&schicht.baum, &kontext, kanal)
    };

    session.senden(ControlMessage::PermissionQuery(PermissionQuery {
        kanal_id: Some(kanal),
        berechtigungen: Some(berechtigungen),
        flush: false,
    }));
    Ok(())
}

fn user_stats<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: UserStats,
) -> Result<()> {
    let ziel_id = anfrage.session.unwrap_or(session.id);
    let Some(ziel) = zustand.session(ziel_id) else {
        zugriff_verweigert(session, "Unbekannte Ziel-Session");
        return Ok(());
    };

    let (gut, verworfen, resyncs, opus) = {
        let daten = ziel.daten();
        (
            daten.crypt.gut,
            daten.crypt.verworfen,
            daten.crypt.resyncs,
            daten.opus,
        )
    };
    session.senden(ControlMessage::UserStats(UserStats {
        session: Some(ziel_id),
        pakete_gut: gut,
        pakete_verloren: verworfen,
        resyncs,
        adresse: Some(ziel.adresse.to_string()),
        opus,
    }));
    Ok(())
}

async fn request_blob<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: control::RequestBlob,
) -> Result<()> {
    for ziel in anfrage.session_textur {
        let Some(handle) = zustand.session(ziel) else {
            continue;
        };
        let user_id = handle.daten().user_id;
        if !user_id.ist_registriert() {
            continue;
        }
        if let Some(daten) = zustand.store.lesen(user_id).await? {
            let hex: String = daten.iter().map(|b| format!("{b:02x}")).collect();
            session.senden(ControlMessage::UserState(UserState {
                session: Some(ziel),
                eigenschaften: vec![control::EigenschaftsWert {
                    tag: EigenschaftsTag::TexturBlob,
                    wert: hex,
                }],
                ..Default::default()
            }));
        }
    }

    for kanal in anfrage.kanal_beschreibung {
        let beschreibung = {
            let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
            schicht.baum.kanal(kanal).map(|k| k.beschreibung.clone())
        };
        if let Some(beschreibung) = beschreibung {
            session.senden(ControlMessage::ChannelState(ChannelState {
                kanal_id: Some(kanal),
                beschreibung: Some(beschreibung),
                ..Default::default()
            }));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Kick / Ban
// ---------------------------------------------------------------------------

async fn user_remove<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: UserRemove,
) -> Result<()> {
    let akteur_user = session.daten().user_id;
    let erlaubt = zustand
        .berechtigung_pruefen(session.id, akteur_user, ChannelId::ROOT, Berechtigung::VERSCHIEBEN)
        .await;
    if !erlaubt {
        zugriff_verweigert(session, "Move fehlt");
        return Ok(());
    }

    let Some(ziel) = zustand.session(anfrage.session) else {
        zugriff_verweigert(session, "Unbekannte Ziel-Session");
        return Ok(());
    };

    if anfrage.ban {
        let (name, adresse) = (ziel.daten().name.clone(), ziel.adresse.ip());
        zustand
            .store
            .anfuegen(BanEintrag {
                adresse,
                praefix: if adresse.is_ipv4() { 32 } else { 128 },
                name,
                zert_hash: String::new(),
                grund: anfrage.grund.clone(),
                start: Utc::now(),
                dauer_sek: 0,
            })
            .await?;
    }

    zustand.rundruf(&ControlMessage::UserRemove(UserRemove {
        session: anfrage.session,
        akteur: Some(session.id),
        grund: anfrage.grund.clone(),
        ban: anfrage.ban,
    }));

    tracing::info!(
        akteur = %session.id,
        ziel = %anfrage.session,
        ban = anfrage.ban,
        grund = %anfrage.grund,
        "Session entfernt"
    );
    ziel.abbruch.cancel();
    Ok(())
}

// ---------------------------------------------------------------------------
// HF-Simulation
// ---------------------------------------------------------------------------

async fn hf_update<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: HfBandSimulationUpdate,
) -> Result<()> {
    let user_id = session.daten().user_id;
    let erlaubt = zustand
        .berechtigung_pruefen(
            session.id,
            user_id,
            ChannelId::ROOT,
            Berechtigung::AUSBREITUNG_KONFIGURIEREN,
        )
        .await;
    if !erlaubt {
        zugriff_verweigert(session, "ConfigurePropagation fehlt");
        return Ok(());
    }

    if let Some(sfi) = anfrage.sfi {
        zustand.simulation.sfi_setzen(sfi);
    }
    if let Some(k_index) = anfrage.k_index {
        zustand.simulation.k_index_setzen(k_index);
    }
    if let Some(wert) = anfrage.jahreszeit {
        match Jahreszeit::from_u8(wert) {
            Some(jahreszeit) => zustand.simulation.jahreszeit_setzen(jahreszeit),
            None => {
                zugriff_verweigert(session, "Ungueltige Jahreszeit");
                return Ok(());
            }
        }
    }
    if let Some(aktiv) = anfrage.auto_jahreszeit {
        zustand.simulation.auto_jahreszeit_setzen(aktiv, Utc::now());
    }

    // Neue Bedingungen: offene Baender neu verlinken und alle informieren
    zustand.offene_baender_anwenden();
    fluester_neu_aufloesen(zustand).await;
    let ionosphaere = zustand.simulation.zustand();
    zustand.rundruf(&ControlMessage::PropagationUpdate(PropagationUpdate {
        sfi: ionosphaere.sfi,
        k_index: ionosphaere.k_index,
        jahreszeit: ionosphaere.jahreszeit as u8,
        muf: ionosphaere.muf,
    }));
    Ok(())
}

// ---------------------------------------------------------------------------
// Plugin-Daten
// ---------------------------------------------------------------------------

fn plugin_daten<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    anfrage: PluginDataTransmission,
) -> Result<()> {
    let mut weiterleitung = anfrage;
    weiterleitung.absender = Some(session.id);
    for ziel in weiterleitung.empfaenger.clone() {
        zustand.senden_an(
            ziel,
            ControlMessage::PluginDataTransmission(weiterleitung.clone()),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kurzwelle_modules::themen;
    use kurzwelle_store::MemoryStore;
    use kurzwelle_voice::TeilnehmerInfo;
    use tokio::sync::mpsc;

    use crate::server_state::SignalingKonfiguration;
    use crate::session::HandshakeZustand;

    fn test_zustand() -> Arc<ServerZustand<MemoryStore>> {
        let zustand = ServerZustand::neu(
            SignalingKonfiguration::default(),
            Arc::new(MemoryStore::neu()),
        );
        {
            let mut schicht = zustand.kanalschicht.write().unwrap();
            for band in [20u32, 40] {
                schicht
                    .baum
                    .anlegen_mit_id(ChannelId(band), ChannelId::ROOT, format!("{band}m"))
                    .unwrap();
            }
        }
        zustand
    }

    async fn test_session(
        zustand: &Arc<ServerZustand<MemoryStore>>,
        name: &str,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<ControlMessage>) {
        let id = zustand.id_vergeber.vergeben();
        let (handle, rx) = SessionHandle::neu(id, "127.0.0.1:40000".parse().unwrap());
        let benutzer = zustand.store.registrieren(name, None, None).await.unwrap();
        {
            let mut daten = handle.daten();
            daten.zustand = HandshakeZustand::Authentifiziert;
            daten.user_id = benutzer.id;
            daten.name = name.to_string();
        }
        zustand.session_registrieren(Arc::clone(&handle)).unwrap();
        let voice_rx = zustand
            .router
            .teilnehmer_registrieren(TeilnehmerInfo::neu(id, benutzer.id));
        // Queue offen halten, Pakete interessieren hier nicht
        tokio::spawn(async move {
            let mut voice_rx = voice_rx;
            while voice_rx.recv().await.is_some() {}
        });
        zustand.router.kanal_beitreten(id, ChannelId::ROOT);
        (handle, rx)
    }

    /// Liest Nachrichten bis das Praedikat passt
    async fn erwarte(
        rx: &mut mpsc::Receiver<ControlMessage>,
        passt: impl Fn(&ControlMessage) -> bool,
    ) -> ControlMessage {
        for _ in 0..32 {
            let nachricht = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .expect("Zeitlimit beim Warten auf Nachricht")
                .expect("Queue geschlossen");
            if passt(&nachricht) {
                return nachricht;
            }
        }
        panic!("Erwartete Nachricht kam nicht an");
    }

    #[tokio::test]
    async fn ping_wird_beantwortet() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;

        nachricht_verarbeiten(&zustand, &session, ControlMessage::ping(4711))
            .await
            .unwrap();

        let antwort = erwarte(&mut rx, |n| matches!(n, ControlMessage::Ping(_))).await;
        if let ControlMessage::Ping(p) = antwort {
            assert_eq!(p.zeitstempel_ms, 4711);
        }
    }

    #[tokio::test]
    async fn ungueltiger_locator_warnung_statt_abbruch() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;

        let anfrage = UserState {
            eigenschaften: vec![control::EigenschaftsWert {
                tag: EigenschaftsTag::GridLocator,
                wert: "XX99zz".into(),
            }],
            ..Default::default()
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::UserState(anfrage))
            .await
            .unwrap();

        // Warnung kommt als Textnachricht, die Session lebt weiter
        let warnung = erwarte(&mut rx, |n| matches!(n, ControlMessage::TextMessage(_))).await;
        if let ControlMessage::TextMessage(t) = warnung {
            assert!(t.nachricht.contains("Warnung"));
        }
        assert!(zustand.session(session.id).is_some());
        // Nichts persistiert
        let user_id = session.daten().user_id;
        assert!(zustand
            .store
            .eigenschaft_lesen(user_id, EigenschaftsTag::GridLocator)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn gueltiger_locator_wird_gesetzt_und_empfohlen() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;
        let user_id = session.daten().user_id;

        let anfrage = UserState {
            eigenschaften: vec![control::EigenschaftsWert {
                tag: EigenschaftsTag::GridLocator,
                wert: "jo59JW".into(),
            }],
            ..Default::default()
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::UserState(anfrage))
            .await
            .unwrap();

        // Normalisiert persistiert
        assert_eq!(
            zustand
                .store
                .eigenschaft_lesen(user_id, EigenschaftsTag::GridLocator)
                .await
                .unwrap()
                .as_deref(),
            Some("JO59jw")
        );

        let empfehlung = erwarte(&mut rx, |n| {
            matches!(n, ControlMessage::TextMessage(t) if t.nachricht.contains("Band-Empfehlungen"))
        })
        .await;
        if let ControlMessage::TextMessage(t) = empfehlung {
            assert!(t.nachricht.contains("JO59jw"));
        }
    }

    #[tokio::test]
    async fn hf_update_ohne_berechtigung_abgewiesen() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;

        let anfrage = HfBandSimulationUpdate {
            sfi: Some(250),
            ..Default::default()
        };
        nachricht_verarbeiten(
            &zustand,
            &session,
            ControlMessage::HfBandSimulationUpdate(anfrage),
        )
        .await
        .unwrap();

        erwarte(&mut rx, |n| matches!(n, ControlMessage::PermissionDenied(_))).await;
        assert_eq!(zustand.simulation.zustand().sfi, 120);
    }

    #[tokio::test]
    async fn hf_update_als_admin_wirkt_sofort() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;
        let user_id = session.daten().user_id;
        zustand
            .store
            .eigenschaft_setzen(user_id, EigenschaftsTag::Admin, "1")
            .await
            .unwrap();

        let mut bus_rx = zustand.bus.abonnieren(themen::AUSBREITUNG_AKTUALISIERT);
        let epoche_vorher = zustand.simulation.epoche();

        let anfrage = HfBandSimulationUpdate {
            sfi: Some(200),
            k_index: Some(1),
            ..Default::default()
        };
        nachricht_verarbeiten(
            &zustand,
            &session,
            ControlMessage::HfBandSimulationUpdate(anfrage),
        )
        .await
        .unwrap();

        // Zustand uebernommen, Epoche erhoeht, Cache leer
        let ionosphaere = zustand.simulation.zustand();
        assert_eq!(ionosphaere.sfi, 200);
        assert_eq!(ionosphaere.k_index, 1);
        assert!(zustand.simulation.epoche() > epoche_vorher);
        assert_eq!(zustand.simulation.cache_groesse(), 0);

        // Abonnenten und Clients werden informiert
        assert!(bus_rx.recv().await.is_ok());
        let update = erwarte(&mut rx, |n| {
            matches!(n, ControlMessage::PropagationUpdate(_))
        })
        .await;
        if let ControlMessage::PropagationUpdate(p) = update {
            assert_eq!(p.sfi, 200);
        }
    }

    #[tokio::test]
    async fn channel_listener_registrierung() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;
        let user_id = session.daten().user_id;

        let anfrage = ChannelListener {
            session: None,
            kanal_id: ChannelId(40),
            hinzufuegen: true,
            lautstaerke: Some(0.5),
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::ChannelListener(anfrage))
            .await
            .unwrap();

        assert!(zustand.mithoerer.hoert(user_id, ChannelId(40)));
        assert!(
            (zustand.mithoerer.lautstaerke(user_id, ChannelId(40)).faktor() - 0.5).abs() < 1e-6
        );
        erwarte(&mut rx, |n| matches!(n, ControlMessage::ChannelListener(_))).await;

        // Entfernen loest die Bindung
        let weg = ChannelListener {
            session: None,
            kanal_id: ChannelId(40),
            hinzufuegen: false,
            lautstaerke: None,
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::ChannelListener(weg))
            .await
            .unwrap();
        assert!(!zustand.mithoerer.hoert(user_id, ChannelId(40)));
    }

    #[tokio::test]
    async fn kanalwechsel_mit_enter_pruefung() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;
        let user_id = session.daten().user_id;

        // Enter auf Kanal 20 verweigern
        {
            let mut schicht = zustand.kanalschicht.write().unwrap();
            let crate::server_state::KanalSchicht { baum, acl } = &mut *schicht;
            acl.zeilen_setzen(
                baum,
                ChannelId(20),
                vec![AclZeile {
                    kanal_id: ChannelId(20),
                    user_id: Some(user_id),
                    gruppe: None,
                    erlauben: 0,
                    verweigern: Berechtigung::BETRETEN,
                    hier_anwenden: true,
                    unterkanaele_anwenden: false,
                    geerbt: false,
                }],
            );
        }

        let gesperrt = UserState {
            kanal_id: Some(ChannelId(20)),
            ..Default::default()
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::UserState(gesperrt))
            .await
            .unwrap();
        erwarte(&mut rx, |n| matches!(n, ControlMessage::PermissionDenied(_))).await;
        assert_eq!(session.daten().kanal, ChannelId::ROOT);

        // Kanal 40 ist offen
        let offen = UserState {
            kanal_id: Some(ChannelId(40)),
            ..Default::default()
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::UserState(offen))
            .await
            .unwrap();
        assert_eq!(session.daten().kanal, ChannelId(40));
        assert_eq!(zustand.router.kanal_von(session.id), Some(ChannelId(40)));
    }

    #[tokio::test]
    async fn voice_target_materialisierung() {
        let zustand = test_zustand();
        let (sprecher, _rx1) = test_session(&zustand, "DL1ABC").await;
        let (ziel, _rx2) = test_session(&zustand, "DL2XYZ").await;
        zustand.router.kanal_beitreten(ziel.id, ChannelId(40));

        let anfrage = VoiceTarget {
            slot: 5,
            ziele: vec![control::VoiceZiel {
                kanal_id: Some(ChannelId(40)),
                ..Default::default()
            }],
        };
        nachricht_verarbeiten(&zustand, &sprecher, ControlMessage::VoiceTarget(anfrage))
            .await
            .unwrap();

        assert_eq!(
            zustand.router.fluester().empfaenger(sprecher.id, 5),
            Some(vec![ziel.id])
        );
    }

    #[tokio::test]
    async fn fluester_wird_nach_kanalwechsel_neu_aufgeloest() {
        let zustand = test_zustand();
        let (sprecher, _rx1) = test_session(&zustand, "DL1ABC").await;
        let (ziel, _rx2) = test_session(&zustand, "DL2XYZ").await;
        let (dritte, _rx3) = test_session(&zustand, "DL3QRS").await;
        zustand.router.kanal_beitreten(ziel.id, ChannelId(40));

        // Slot 5 zielt auf Kanal 40
        nachricht_verarbeiten(
            &zustand,
            &sprecher,
            ControlMessage::VoiceTarget(VoiceTarget {
                slot: 5,
                ziele: vec![control::VoiceZiel {
                    kanal_id: Some(ChannelId(40)),
                    ..Default::default()
                }],
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            zustand.router.fluester().empfaenger(sprecher.id, 5),
            Some(vec![ziel.id])
        );

        // Die dritte Session betritt Kanal 40: der Slot muss sie nach
        // der Invalidierung automatisch enthalten
        nachricht_verarbeiten(
            &zustand,
            &dritte,
            ControlMessage::UserState(UserState {
                kanal_id: Some(ChannelId(40)),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let mut empfaenger = zustand
            .router
            .fluester()
            .empfaenger(sprecher.id, 5)
            .expect("Slot muss neu aufgeloest sein");
        empfaenger.sort();
        assert_eq!(empfaenger, vec![ziel.id, dritte.id]);

        // Das urspruengliche Ziel zieht weg: Slot schrumpft wieder
        nachricht_verarbeiten(
            &zustand,
            &ziel,
            ControlMessage::UserState(UserState {
                kanal_id: Some(ChannelId(20)),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            zustand.router.fluester().empfaenger(sprecher.id, 5),
            Some(vec![dritte.id])
        );
    }

    #[tokio::test]
    async fn user_list_deregistrierung() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;
        let user_id = session.daten().user_id;
        let opfer = zustand.store.registrieren("DL9ZZZ", None, None).await.unwrap();

        let eintrag = RegistrierterBenutzer {
            user_id: opfer.id,
            name: String::new(),
            zuletzt_gesehen: None,
            letzter_kanal: None,
        };

        // Ohne Write-Berechtigung: abgewiesen, Benutzer bleibt
        nachricht_verarbeiten(
            &zustand,
            &session,
            ControlMessage::UserList(UserList {
                benutzer: vec![eintrag.clone()],
            }),
        )
        .await
        .unwrap();
        erwarte(&mut rx, |n| matches!(n, ControlMessage::PermissionDenied(_))).await;
        assert!(zustand.store.laden(opfer.id).await.unwrap().is_some());

        // Als Admin: deregistriert und auf dem Bus gemeldet
        zustand
            .store
            .eigenschaft_setzen(user_id, EigenschaftsTag::Admin, "1")
            .await
            .unwrap();
        let mut bus_rx = zustand.bus.abonnieren(themen::BENUTZER_DEREGISTRIERT);
        nachricht_verarbeiten(
            &zustand,
            &session,
            ControlMessage::UserList(UserList {
                benutzer: vec![eintrag.clone()],
            }),
        )
        .await
        .unwrap();
        assert!(zustand.store.laden(opfer.id).await.unwrap().is_none());
        assert!(bus_rx.recv().await.is_ok());

        // Wiederholung ist ein No-op
        nachricht_verarbeiten(
            &zustand,
            &session,
            ControlMessage::UserList(UserList {
                benutzer: vec![eintrag],
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn crypt_resync_zaehlt() {
        let zustand = test_zustand();
        let (session, mut rx) = test_session(&zustand, "DL1ABC").await;

        let anfrage = CryptSetup {
            schluessel: None,
            client_nonce: Some(vec![0u8; 16]),
            server_nonce: None,
        };
        nachricht_verarbeiten(&zustand, &session, ControlMessage::CryptSetup(anfrage))
            .await
            .unwrap();

        assert_eq!(session.daten().crypt.resyncs, 1);
        let antwort = erwarte(&mut rx, |n| matches!(n, ControlMessage::CryptSetup(_))).await;
        if let ControlMessage::CryptSetup(c) = antwort {
            assert!(c.server_nonce.is_some());
        }
    }
}
