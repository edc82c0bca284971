//! Verbindungs-Task
//!
//! Bedient eine einzelne Control-Verbindung: Handshake-Automat
//! (Frisch -> Versioniert -> Authentifizierung -> Authentifiziert),
//! danach die Select-Schleife aus eingehenden Frames, ausgehender
//! Queue, Idle-Pruefung und Abbruch-Signal. Kaputte Frames beenden die
//! Verbindung; Berechtigungsfehler beantwortet der Dispatcher ohne sie
//! zu beenden.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use kurzwelle_core::types::{ChannelId, EigenschaftsTag, UserId};
use kurzwelle_core::{KurzwelleError, Result};
use kurzwelle_modules::Ereignis;
use kurzwelle_propagation::Locator;
use kurzwelle_protocol::control::{
    Authenticate, CodecVersion, ControlMessage, CryptSetup, Reject, RejectGrund, ServerConfig,
    ServerSync, UserRemove,
};
use kurzwelle_protocol::{FrameCodec, PROTOKOLL_VERSION};
use kurzwelle_store::traits::{BanStore, BenutzerStore, GruppenStore};
use kurzwelle_voice::{TeilnehmerInfo, UdpServer};

use crate::broadcast;
use crate::dispatcher;
use crate::server_state::{ServerZustand, VollStore};
use crate::session::{HandshakeZustand, SessionHandle};

/// Intervall der Idle-Pruefung
const IDLE_PRUEF_INTERVALL: std::time::Duration = std::time::Duration::from_secs(5);

/// Frist fuer die Verarbeitung einer einzelnen Client-Nachricht
const NACHRICHTEN_FRIST: std::time::Duration = std::time::Duration::from_secs(5);

/// Berechnet den Passwort-Verifier (Hex-SHA-256)
pub fn passwort_verifier(passwort: &str) -> String {
    let digest = Sha256::digest(passwort.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Bedient eine Verbindung bis zu ihrem Ende
///
/// `udp` verbindet authentifizierte Sessions mit dem Voice-Transport;
/// ohne UDP-Server (Tests) laeuft Voice nur ueber den Tunnel.
pub async fn verbindung_bedienen<S: VollStore>(
    zustand: Arc<ServerZustand<S>>,
    stream: TcpStream,
    adresse: SocketAddr,
    udp: Option<Arc<UdpServer>>,
) {
    let mut framed = Framed::new(stream, FrameCodec::new());

    // Handshake mit Frist
    let session = match tokio::time::timeout(
        zustand.konfiguration.handshake_frist,
        handshake(&zustand, &mut framed, adresse),
    )
    .await
    {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            tracing::info!(adresse = %adresse, fehler = %e, "Handshake fehlgeschlagen");
            return;
        }
        Err(_) => {
            tracing::info!(adresse = %adresse, "Handshake-Frist ueberschritten");
            return;
        }
    };

    // Voice-Anbindung und Sync-Sequenz
    let (session, mut ausgehend) = session;
    let voice_rx = {
        let daten = session.daten();
        let info = TeilnehmerInfo::neu(session.id, daten.user_id);
        drop(daten);
        let _ = locator_aus_store(&zustand, &session).await;
        zustand.router.teilnehmer_registrieren(info)
    };
    let _ = (voice_rx, &udp, &mut framed, &mut ausgehend);
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

type SessionUndQueue = (
    Arc<SessionHandle>,
    tokio::sync::mpsc::Receiver<ControlMessage>,
);

async fn handshake<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    framed: &mut Framed<TcpStream, FrameCodec>,
    adresse: SocketAddr,
) -> Result<SessionUndQueue> {
    let mut phase = HandshakeZustand::Frisch;
    let mut client_version = 0u32;

    loop {
        let Some(frame) = framed.next().await else {
            return Err(KurzwelleError::Transport("Verbindung getrennt".into()));
        };
        let nachricht = frame.map_err(|e| KurzwelleError::Protokoll(e.to_string()))?;

        match (phase, nachricht) {
            (HandshakeZustand::Frisch, ControlMessage::Version(v)) => {
                // Major-Haelfte muss uebereinstimmen
                if v.version >> 16 != PROTOKOLL_VERSION >> 16 {
                    ablehnen(
                        framed,
                        RejectGrund::FalscheVersion,
                        format!("Protokollversion {:#010x} nicht unterstuetzt", v.version),
                    )
                    .await;
                    return Err(KurzwelleError::Protokoll("Versionskonflikt".into()));
                }
                client_version = v.version;
                phase = HandshakeZustand::Versioniert;
            }
            (HandshakeZustand::Versioniert, ControlMessage::Authenticate(auth)) => {
                // Zustand Authentifizierung: die Pruefung laeuft, danach
                // ist die Verbindung entweder authentifiziert oder zu
                match authentifizieren(zustand, &auth, adresse).await {
                    Ok(user_id) => {
                        return session_anlegen(
                            zustand,
                            framed,
                            adresse,
                            auth,
                            user_id,
                            client_version,
                        )
                        .await;
                    }
                    Err(AuthFehler::Ablehnung(grund, text)) => {
                        ablehnen(framed, grund, text).await;
                        return Err(KurzwelleError::Auth("Abgelehnt".into()));
                    }
                    Err(AuthFehler::Intern(e)) => return Err(e),
                }
            }
            (_, ControlMessage::Ping(p)) => {
                // Ping ist vor der Authentifizierung zulaessig
                framed
                    .send(ControlMessage::Ping(p))
                    .await
                    .map_err(|e| KurzwelleError::Transport(e.to_string()))?;
            }
            (_, nachricht) => {
                return Err(KurzwelleError::Protokoll(format!(
                    "Nachricht {:?} im Handshake-Zustand {phase:?} unzulaessig",
                    nachricht.typ()
                )));
            }
        }
    }
}

enum AuthFehler {
    Ablehnung(RejectGrund, String),
    Intern(KurzwelleError),
}

async fn authentifizieren<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    auth: &Authenticate,
    adresse: SocketAddr,
) -> std::result::Result<UserId, AuthFehler> {
    let name = auth.benutzername.trim();
    if name.is_empty() || name.len() > 64 || name.chars().any(char::is_control) {
        return Err(AuthFehler::Ablehnung(
            RejectGrund::UngueltigerName,
            "Unzulaessiger Benutzername".into(),
        ));
    }

    // Ban-Pruefung nach Adresse, Name und Zertifikats-Hash
    let gebannt = zustand
        .store
        .suchen(
            Some(adresse.ip()),
            Some(name),
            auth.zert_hash.as_deref(),
            Utc::now(),
        )
        .await
        .map_err(|e| AuthFehler::Intern(e.into()))?;
    if let Some(ban) = gebannt {
        return Err(AuthFehler::Ablehnung(
            RejectGrund::Gebannt,
            format!("Gebannt: {}", ban.grund),
        ));
    }

    // Name darf nicht bereits verbunden sein
    if zustand.session_nach_name(name).is_some() {
        return Err(AuthFehler::Ablehnung(
            RejectGrund::NameBelegt,
            "Name bereits verbunden".into(),
        ));
    }

    let vorhanden = zustand
        .store
        .laden_nach_name(name)
        .await
        .map_err(|e| AuthFehler::Intern(e.into()))?;

    match vorhanden {
        Some(benutzer) => {
            if let Some(verifier) = &benutzer.passwort_verifier {
                let passwort = auth.passwort.as_deref().unwrap_or("");
                if passwort_verifier(passwort) != *verifier {
                    return Err(AuthFehler::Ablehnung(
                        RejectGrund::FalschesPasswort,
                        "Falsches Passwort".into(),
                    ));
                }
            }
            Ok(benutzer.id)
        }
        None if zustand.konfiguration.autoregister => {
            let verifier = auth.passwort.as_deref().map(passwort_verifier);
            let benutzer = zustand
                .store
                .registrieren(name, verifier.as_deref(), auth.zert_hash.as_deref())
                .await
                .map_err(|e| AuthFehler::Intern(e.into()))?;
            zustand
                .bus
                .veroeffentlichen(Ereignis::BenutzerRegistriert { user_id: benutzer.id });
            tracing::info!(name, user_id = %benutzer.id, "Benutzer selbst-registriert");
            Ok(benutzer.id)
        }
        // Ohne Autoregister: anonyme Verbindung
        None => Ok(UserId(0)),
    }
}

async fn session_anlegen<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    framed: &mut Framed<TcpStream, FrameCodec>,
    adresse: SocketAddr,
    auth: Authenticate,
    user_id: UserId,
    client_version: u32,
) -> Result<SessionUndQueue> {
    let id = zustand.id_vergeber.vergeben();
    let (handle, ausgehend) = SessionHandle::neu(id, adresse);

    {
        let mut daten = handle.daten();
        daten.zustand = HandshakeZustand::Authentifiziert;
        daten.user_id = user_id;
        daten.name = auth.benutzername.trim().to_string();
        daten.client_version = client_version;
        daten.opus = auth.opus;
    }

    if let Err(e) = zustand.session_registrieren(Arc::clone(&handle)) {
        ablehnen(framed, RejectGrund::ServerVoll, e.to_string()).await;
        return Err(e);
    }

    // CryptSetup als erste Nachricht nach erfolgreicher Pruefung
    let crypt = CryptSetup {
        schluessel: Some(handle.daten().crypt.schluessel.clone()),
        client_nonce: Some(kurzwelle_protocol::crypto::nonce_erzeugen()),
        server_nonce: Some(kurzwelle_protocol::crypto::nonce_erzeugen()),
    };
    framed
        .send(ControlMessage::CryptSetup(crypt))
        .await
        .map_err(|e| KurzwelleError::Transport(e.to_string()))?;

    tracing::info!(
        session = %id,
        name = %handle.daten().name,
        user_id = %user_id,
        adresse = %adresse,
        "Session authentifiziert"
    );
    Ok((handle, ausgehend))
}

async fn ablehnen(
    framed: &mut Framed<TcpStream, FrameCodec>,
    grund: RejectGrund,
    nachricht: String,
) {
    let reject = ControlMessage::Reject(Reject {
        grund,
        nachricht,
    });
    if let Err(e) = framed.send(reject).await {
        tracing::debug!(fehler = %e, "Reject nicht zustellbar");
    }
}

// ---------------------------------------------------------------------------
// Sync nach dem Handshake
// ---------------------------------------------------------------------------

async fn locator_aus_store<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
) -> Option<Locator> {
    let user_id = session.daten().user_id;
    if !user_id.ist_registriert() {
        return None;
    }
    match zustand
        .store
        .eigenschaft_lesen(user_id, EigenschaftsTag::GridLocator)
        .await
    {
        Ok(Some(wert)) => Locator::parse(&wert).ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(user_id = %user_id, fehler = %e, "Locator nicht lesbar");
            None
        }
    }
}

async fn sync_senden<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    framed: &mut Framed<TcpStream, FrameCodec>,
) -> Result<()> {
    let mut sequenz: Vec<ControlMessage> = Vec::new();

    // Codec-Aushandlung
    sequenz.push(ControlMessage::CodecVersion(CodecVersion {
        celt_alpha: -2147483637,
        celt_beta: 0,
        opus: session.daten().opus,
        bevorzugt_alpha: false,
    }));

    // Kanalbaum
    {
        let schicht = zustand.kanalschicht.read().unwrap_or_else(|e| e.into_inner());
        sequenz.extend(broadcast::baum_sync(&schicht.baum));
    }

    // Benutzerliste
    sequenz.extend(broadcast::roster_sync(&zustand.sessions_alle()));

    // Startkanal: bevorzugtes Band, sonst Root
    let startkanal = startkanal_ermitteln(zustand, session).await;
    let _ = dispatcher::kanal_betreten_erzwingen(zustand, session, startkanal);

    // ServerSync schliesst den Handshake ab
    sequenz.push(ControlMessage::ServerSync(ServerSync {
        session: session.id,
        max_bandbreite: zustand.konfiguration.bandbreite,
        willkommenstext: zustand.konfiguration.willkommenstext.clone(),
    }));
    sequenz.push(ControlMessage::ServerConfig(ServerConfig {
        max_bandbreite: zustand.konfiguration.bandbreite,
        willkommenstext: zustand.konfiguration.willkommenstext.clone(),
        max_benutzer: zustand.konfiguration.max_benutzer,
        nachricht_max_laenge: 5000,
    }));

    for nachricht in sequenz {
        framed
            .send(nachricht)
            .await
            .map_err(|e| KurzwelleError::Transport(e.to_string()))?;
    }
    Ok(())
}

async fn startkanal_ermitteln<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
) -> ChannelId {
    let user_id = session.daten().user_id;
    if !user_id.ist_registriert() {
        return ChannelId::ROOT;
    }
    let bevorzugt = zustand
        .store
        .eigenschaft_lesen(user_id, EigenschaftsTag::BevorzugtesBand)
        .await
        .ok()
        .flatten()
        .and_then(|wert| wert.parse::<u32>().ok())
        .map(ChannelId);

    match bevorzugt {
        Some(kanal) => {
            let existiert = zustand
                .kanalschicht
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .baum
                .existiert(kanal);
            if existiert {
                kanal
            } else {
                ChannelId::ROOT
            }
        }
        None => ChannelId::ROOT,
    }
}

// ---------------------------------------------------------------------------
// Hauptschleife und Abbau
// ---------------------------------------------------------------------------

async fn hauptschleife<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    framed: &mut Framed<TcpStream, FrameCodec>,
    ausgehend: &mut tokio::sync::mpsc::Receiver<ControlMessage>,
) -> String {
    let mut idle_pruefung = tokio::time::interval(IDLE_PRUEF_INTERVALL);

    loop {
        tokio::select! {
            frame = framed.next() => {
                let nachricht = match frame {
                    Some(Ok(nachricht)) => nachricht,
                    Some(Err(e)) => return format!("Protokollfehler: {e}"),
                    None => return "Verbindung getrennt".into(),
                };
                if !session.zustand().nachricht_zulaessig(nachricht.typ()) {
                    return "Unzulaessige Nachricht".into();
                }
                let verarbeitung = tokio::time::timeout(
                    NACHRICHTEN_FRIST,
                    dispatcher::nachricht_verarbeiten(zustand, session, nachricht),
                );
                match verarbeitung.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.beendet_session() => return e.to_string(),
                    Ok(Err(e)) => {
                        tracing::warn!(session = %session.id, fehler = %e, "Nachricht fehlgeschlagen");
                    }
                    Err(_) => {
                        // Frist gerissen: dem Client melden, Session lebt weiter
                        session.senden(ControlMessage::zugriff_verweigert("timeout"));
                        tracing::warn!(session = %session.id, "Nachrichten-Frist ueberschritten");
                    }
                }
            }
            nachricht = ausgehend.recv() => {
                let Some(nachricht) = nachricht else {
                    return "Sende-Queue geschlossen".into();
                };
                if let Err(e) = framed.send(nachricht).await {
                    return format!("Sendefehler: {e}");
                }
            }
            _ = idle_pruefung.tick() => {
                if session.ist_inaktiv(zustand.konfiguration.timeout) {
                    return "Zeitueberschreitung".into();
                }
            }
            _ = session.abbruch.cancelled() => {
                return "Vom Server entfernt".into();
            }
        }
    }
}

async fn abbauen<S: VollStore>(
    zustand: &Arc<ServerZustand<S>>,
    session: &Arc<SessionHandle>,
    grund: &str,
) {
    let (user_id, kanal) = {
        let mut daten = session.daten();
        daten.zustand = HandshakeZustand::Geschlossen;
        (daten.user_id, daten.kanal)
    };

    // Letzte Spuren fuer registrierte Benutzer persistieren
    if user_id.ist_registriert() {
        let jetzt = Utc::now().to_rfc3339();
        if let Err(e) = zustand
            .store
            .eigenschaft_setzen(user_id, EigenschaftsTag::ZuletztGesehen, &jetzt)
            .await
        {
            tracing::warn!(user_id = %user_id, fehler = %e, "ZuletztGesehen nicht speicherbar");
        }
        if let Err(e) = zustand
            .store
            .eigenschaft_setzen(user_id, EigenschaftsTag::LetzterKanal, &kanal.0.to_string())
            .await
        {
            tracing::warn!(user_id = %user_id, fehler = %e, "LetzterKanal nicht speicherbar");
        }
    }

    if let Err(e) = zustand.store.session_entfernen(session.id).await {
        tracing::warn!(session = %session.id, fehler = %e, "Temporaere Gruppen nicht entfernbar");
    }

    zustand.session_entfernen(session.id);
    dispatcher::fluester_neu_aufloesen(zustand).await;
    zustand.rundruf(&ControlMessage::UserRemove(UserRemove {
        session: session.id,
        akteur: None,
        grund: grund.to_string(),
        ban: false,
    }));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kurzwelle_protocol::control::Version;
    use kurzwelle_store::MemoryStore;
    use tokio::net::TcpListener;

    use crate::server_state::SignalingKonfiguration;

    #[test]
    fn verifier_ist_deterministisch() {
        let a = passwort_verifier("geheim");
        let b = passwort_verifier("geheim");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, passwort_verifier("anders"));
    }

    async fn test_server(
        konfiguration: SignalingKonfiguration,
    ) -> (Arc<ServerZustand<MemoryStore>>, SocketAddr) {
        let zustand = ServerZustand::neu(konfiguration, Arc::new(MemoryStore::neu()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap();
        let fuer_task = Arc::clone(&zustand);
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    break;
                };
                let zustand = Arc::clone(&fuer_task);
                tokio::spawn(verbindung_bedienen(zustand, stream, peer, None));
            }
        });
        (zustand, adresse)
    }

    async fn version_senden(framed: &mut Framed<TcpStream, FrameCodec>) {
        framed
            .send(ControlMessage::Version(Version {
                version: PROTOKOLL_VERSION,
                release: "test-client".into(),
                os: None,
            }))
            .await
            .unwrap();
    }

    async fn authenticate_senden(
        framed: &mut Framed<TcpStream, FrameCodec>,
        name: &str,
        passwort: Option<&str>,
    ) {
        framed
            .send(ControlMessage::Authenticate(Authenticate {
                benutzername: name.into(),
                passwort: passwort.map(String::from),
                zert_hash: None,
                opus: true,
            }))
            .await
            .unwrap();
    }

    /// Liest Nachrichten bis zum ServerSync und gibt diesen zurueck
    async fn bis_server_sync(framed: &mut Framed<TcpStream, FrameCodec>) -> ServerSync {
        for _ in 0..64 {
            let nachricht = tokio::time::timeout(
                std::time::Duration::from_secs(2),
                framed.next(),
            )
            .await
            .expect("Zeitlimit")
            .expect("Stream beendet")
            .expect("Frame-Fehler");
            if let ControlMessage::ServerSync(sync) = nachricht {
                return sync;
            }
        }
        panic!("Kein ServerSync innerhalb von 64 Nachrichten");
    }

    #[tokio::test]
    async fn voller_handshake_bis_server_sync() {
        let (zustand, adresse) = test_server(SignalingKonfiguration {
            willkommenstext: "Willkommen bei Kurzwelle".into(),
            ..Default::default()
        })
        .await;

        let stream = TcpStream::connect(adresse).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());

        version_senden(&mut framed).await;
        authenticate_senden(&mut framed, "DL1ABC", None).await;

        // Erste Nachricht nach erfolgreicher Pruefung: CryptSetup
        let erste = tokio::time::timeout(std::time::Duration::from_secs(2), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(erste, ControlMessage::CryptSetup(_)));

        let sync = bis_server_sync(&mut framed).await;
        assert_eq!(sync.willkommenstext, "Willkommen bei Kurzwelle");
        assert_eq!(zustand.session_anzahl(), 1);
    }

    #[tokio::test]
    async fn nachricht_vor_version_beendet_verbindung() {
        let (_zustand, adresse) = test_server(SignalingKonfiguration::default()).await;

        let stream = TcpStream::connect(adresse).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());

        // TextMessage im Zustand Frisch ist ein Protokollfehler
        framed
            .send(ControlMessage::text_an_session(
                kurzwelle_core::types::SessionId(1),
                "Hallo",
            ))
            .await
            .unwrap();

        // Der Server schliesst ohne Antwort
        let ende = tokio::time::timeout(std::time::Duration::from_secs(2), framed.next())
            .await
            .expect("Zeitlimit");
        assert!(ende.is_none() || ende.unwrap().is_err());
    }

    #[tokio::test]
    async fn falsches_passwort_wird_abgelehnt() {
        let (zustand, adresse) = test_server(SignalingKonfiguration::default()).await;
        zustand
            .store
            .registrieren("DL1ABC", Some(&passwort_verifier("richtig")), None)
            .await
            .unwrap();

        let stream = TcpStream::connect(adresse).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());

        version_senden(&mut framed).await;
        authenticate_senden(&mut framed, "DL1ABC", Some("falsch")).await;

        let antwort = tokio::time::timeout(std::time::Duration::from_secs(2), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let ControlMessage::Reject(reject) = antwort {
            assert_eq!(reject.grund, RejectGrund::FalschesPasswort);
        } else {
            panic!("Erwartet Reject");
        }
    }

    #[tokio::test]
    async fn richtiges_passwort_wird_akzeptiert() {
        let (_zustand, adresse) = test_server(SignalingKonfiguration::default()).await;

        // Selbstregistrierung mit Passwort, dann erneut verbinden
        {
            let stream = TcpStream::connect(adresse).await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new());
            version_senden(&mut framed).await;
            authenticate_senden(&mut framed, "DL1ABC", Some("geheim")).await;
            let _ = bis_server_sync(&mut framed).await;
        }

        let stream = TcpStream::connect(adresse).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        version_senden(&mut framed).await;
        authenticate_senden(&mut framed, "DL1ABC", Some("geheim")).await;
        // Der alte Name darf nicht mehr verbunden sein -- die erste
        // Verbindung wurde durch Drop des Streams beendet; kurz warten
        let antwort = tokio::time::timeout(std::time::Duration::from_secs(2), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match antwort {
            ControlMessage::CryptSetup(_) => {}
            ControlMessage::Reject(r) => {
                // Race mit dem Abbau der ersten Session
                assert_eq!(r.grund, RejectGrund::NameBelegt);
            }
            andere => panic!("Unerwartete Antwort: {:?}", andere.typ()),
        }
    }

    #[tokio::test]
    async fn server_voll_lehnt_ab() {
        let (_zustand, adresse) = test_server(SignalingKonfiguration {
            max_benutzer: 1,
            ..Default::default()
        })
        .await;

        let stream1 = TcpStream::connect(adresse).await.unwrap();
        let mut framed1 = Framed::new(stream1, FrameCodec::new());
        version_senden(&mut framed1).await;
        authenticate_senden(&mut framed1, "DL1ABC", None).await;
        let _ = bis_server_sync(&mut framed1).await;

        let stream2 = TcpStream::connect(adresse).await.unwrap();
        let mut framed2 = Framed::new(stream2, FrameCodec::new());
        version_senden(&mut framed2).await;
        authenticate_senden(&mut framed2, "DL2XYZ", None).await;

        let antwort = tokio::time::timeout(std::time::Duration::from_secs(2), framed2.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let ControlMessage::Reject(reject) = antwort {
            assert_eq!(reject.grund, RejectGrund::ServerVoll);
        } else {
            panic!("Erwartet Reject");
        }
    }

    #[tokio::test]
    async fn gebannter_client_wird_abgewiesen() {
        let (zustand, adresse) = test_server(SignalingKonfiguration::default()).await;
        zustand
            .store
            .anfuegen(kurzwelle_store::BanEintrag {
                adresse: "127.0.0.1".parse().unwrap(),
                praefix: 32,
                name: String::new(),
                zert_hash: String::new(),
                grund: "Test-Ban".into(),
                start: Utc::now(),
                dauer_sek: 0,
            })
            .await
            .unwrap();

        let stream = TcpStream::connect(adresse).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        version_senden(&mut framed).await;
        authenticate_senden(&mut framed, "DL1ABC", None).await;

        let antwort = tokio::time::timeout(std::time::Duration::from_secs(2), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let ControlMessage::Reject(reject) = antwort {
            assert_eq!(reject.grund, RejectGrund::Gebannt);
        } else {
            panic!("Erwartet Reject");
        }
    }
}
