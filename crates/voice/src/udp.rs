//! UDP Voice-Transport
//!
//! Bindet den UDP-Socket, empfaengt Voice-Pakete, ordnet sie ueber den
//! `VoiceZustand` einer Session zu und reicht sie an den `AudioRouter`
//! weiter. Pro Empfaenger laeuft ein eigener Sende-Task der die
//! Empfangs-Queue des Routers leert (verhindert Head-of-Line-Blocking).
//!
//! Pakete von unbekannten Adressen und nicht dekodierbare Pakete
//! werden kommentarlos verworfen; der Record-Layer der Session sitzt
//! davor und verbucht Krypto-Verwuerfe in seinen Zaehlern.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use kurzwelle_core::types::SessionId;
use kurzwelle_protocol::voice::{VoicePaket, MAX_VOICE_PAKET_GROESSE};

use crate::router::{AudioRouter, GeroutetesPaket};
use crate::state::VoiceZustand;

/// Empfangspuffer: maximale Paketgroesse plus Reserve
const UDP_PUFFER_GROESSE: usize = MAX_VOICE_PAKET_GROESSE + 64;

/// Konfiguration des UDP-Transports
#[derive(Debug, Clone)]
pub struct UdpKonfiguration {
    /// Bind-Adresse, z.B. "0.0.0.0:64738"
    pub bind_adresse: SocketAddr,
}

/// Der UDP Voice-Server
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    router: AudioRouter,
    zustand: Arc<VoiceZustand>,
}

impl UdpServer {
    /// Bindet den Socket und erstellt den Server
    pub async fn binden(
        konfiguration: UdpKonfiguration,
        router: AudioRouter,
        zustand: Arc<VoiceZustand>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(konfiguration.bind_adresse).await?;
        tracing::info!(adresse = %konfiguration.bind_adresse, "UDP Voice-Transport gebunden");
        Ok(Self {
            socket: Arc::new(socket),
            router,
            zustand,
        })
    }

    /// Lokale Bind-Adresse
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Startet den Sende-Task eines Teilnehmers
    ///
    /// Liest geroutete Pakete aus der Router-Queue und sendet die
    /// Paket-Bytes an den gebundenen Endpunkt. Die Jitter-, Rausch-
    /// und Lautstaerke-Tags konsumiert eine nachgelagerte Stufe
    /// (Verzoegerungsleitung, Rauschmischer) auf der Empfangsseite.
    pub fn sende_task_starten(
        &self,
        session: SessionId,
        mut queue: mpsc::Receiver<GeroutetesPaket>,
    ) -> tokio::task::JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let zustand = Arc::clone(&self.zustand);
        tokio::spawn(async move {
            while let Some(paket) = queue.recv().await {
                let Some(ziel) = zustand.adresse_von(session) else {
                    // Session (noch) ohne UDP-Bindung: Paket verfaellt
                    continue;
                };
                if let Err(e) = socket.send_to(&paket.daten, ziel).await {
                    tracing::warn!(session = %session, fehler = %e, "UDP-Sendefehler");
                }
            }
            tracing::debug!(session = %session, "Sende-Task beendet");
        })
    }

    /// Empfangsschleife: laeuft bis der Socket geschlossen wird
    pub async fn empfangen(&self) {
        let mut puffer = [0u8; UDP_PUFFER_GROESSE];
        loop {
            let (laenge, absender_adresse) = match self.socket.recv_from(&mut puffer).await {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                    continue;
                }
            };

            let Some(session) = self.zustand.session_von(absender_adresse) else {
                tracing::trace!(adresse = %absender_adresse, "Paket von ungebundener Adresse verworfen");
                continue;
            };

            let paket = match VoicePaket::decode(&puffer[..laenge]) {
                Ok(paket) => paket,
                Err(e) => {
                    tracing::trace!(session = %session, fehler = %e, "Kaputtes Voice-Paket verworfen");
                    continue;
                }
            };

            match paket {
                VoicePaket::Ping { zeitstempel_ms } => {
                    // Ping spiegeln (Latenzmessung + Liveness)
                    let antwort = VoicePaket::neu_ping(zeitstempel_ms).encode();
                    if let Err(e) = self.socket.send_to(&antwort, absender_adresse).await {
                        tracing::warn!(fehler = %e, "UDP-Ping-Antwort fehlgeschlagen");
                    }
                }
                audio @ VoicePaket::Audio { .. } => {
                    let jetzt = Utc::now();
                    let jetzt_ms = jetzt.timestamp_millis().max(0) as u64;
                    let mut rng = rand::thread_rng();
                    let ergebnis =
                        self.router
                            .paket_routen(session, &audio, jetzt, jetzt_ms, &mut rng);
                    tracing::trace!(
                        session = %session,
                        zugestellt = ergebnis.zugestellt,
                        schwelle = ergebnis.schwelle_verworfen,
                        schwund = ergebnis.schwund_verworfen,
                        "Voice-Paket geroutet"
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::TeilnehmerInfo;
    use kurzwelle_channels::MithoererManager;
    use kurzwelle_core::types::{ChannelId, UserId};
    use kurzwelle_modules::EventBus;
    use kurzwelle_propagation::HfBandSimulation;

    async fn test_server() -> (UdpServer, Arc<VoiceZustand>, AudioRouter) {
        let router = AudioRouter::neu(
            Arc::new(MithoererManager::neu()),
            Arc::new(HfBandSimulation::neu(EventBus::neu())),
        );
        let zustand = Arc::new(VoiceZustand::neu());
        let server = UdpServer::binden(
            UdpKonfiguration {
                bind_adresse: "127.0.0.1:0".parse().unwrap(),
            },
            router.clone(),
            Arc::clone(&zustand),
        )
        .await
        .unwrap();
        (server, zustand, router)
    }

    #[tokio::test]
    async fn ping_wird_gespiegelt() {
        let (server, zustand, _router) = test_server().await;
        let server_adresse = server.lokale_adresse().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_adresse = client.local_addr().unwrap();
        zustand.binden(SessionId(1), client_adresse);

        tokio::spawn(async move { server.empfangen().await });

        client
            .send_to(&VoicePaket::neu_ping(777).encode(), server_adresse)
            .await
            .unwrap();

        let mut puffer = [0u8; 64];
        let (laenge, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            client.recv_from(&mut puffer),
        )
        .await
        .expect("Zeitlimit beim Ping")
        .unwrap();

        let antwort = VoicePaket::decode(&puffer[..laenge]).unwrap();
        assert_eq!(antwort, VoicePaket::neu_ping(777));
    }

    #[tokio::test]
    async fn unbekannte_adresse_wird_ignoriert() {
        let (server, zustand, router) = test_server().await;
        let server_adresse = server.lokale_adresse().unwrap();

        // Empfaenger registrieren damit Zustellung messbar waere
        let mut rx = router.teilnehmer_registrieren(TeilnehmerInfo::neu(SessionId(2), UserId(2)));
        router.kanal_beitreten(SessionId(2), ChannelId(40));
        let _ = zustand;

        tokio::spawn(async move { server.empfangen().await });

        // Client ohne Bindung sendet ein Audio-Paket
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(
                &VoicePaket::neu_opus(0, 1, vec![1, 2, 3]).encode(),
                server_adresse,
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn audio_wird_an_gebundene_empfaenger_gesendet() {
        let (server, zustand, router) = test_server().await;
        let server_adresse = server.lokale_adresse().unwrap();

        // Sprecher (Session 1) und Empfaenger (Session 2) im selben Kanal
        let sprecher = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let empfaenger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        zustand.binden(SessionId(1), sprecher.local_addr().unwrap());
        zustand.binden(SessionId(2), empfaenger.local_addr().unwrap());

        let _rx1 = router.teilnehmer_registrieren(TeilnehmerInfo::neu(SessionId(1), UserId(1)));
        let rx2 = router.teilnehmer_registrieren(TeilnehmerInfo::neu(SessionId(2), UserId(2)));
        router.kanal_beitreten(SessionId(1), ChannelId(40));
        router.kanal_beitreten(SessionId(2), ChannelId(40));

        let sende_task = server.sende_task_starten(SessionId(2), rx2);
        tokio::spawn(async move { server.empfangen().await });

        let original = VoicePaket::neu_opus(0, 42, vec![0xAB; 30]);
        sprecher
            .send_to(&original.encode(), server_adresse)
            .await
            .unwrap();

        let mut puffer = [0u8; 256];
        let (laenge, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            empfaenger.recv_from(&mut puffer),
        )
        .await
        .expect("Zeitlimit beim Audio-Empfang")
        .unwrap();

        let angekommen = VoicePaket::decode(&puffer[..laenge]).unwrap();
        assert_eq!(angekommen, original);

        sende_task.abort();
    }
}
