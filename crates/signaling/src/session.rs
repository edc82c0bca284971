//! Session-Lebenszyklus
//!
//! Eine Session ist der transiente Zustand einer Client-Verbindung:
//! Handshake-Automat, Flags, Krypto-Zustand, letzter Lebenszeichen-
//! Zeitpunkt. Session-IDs werden pro Serverlauf monoton vergeben und
//! nie wiederverwendet.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use kurzwelle_core::types::{ChannelId, SessionId, UserId};
use kurzwelle_protocol::control::ControlMessage;
use kurzwelle_protocol::crypto::CryptZustand;
use kurzwelle_protocol::NachrichtenTyp;

/// Groesse der ausgehenden Control-Queue pro Session
pub const CONTROL_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// ID-Vergabe
// ---------------------------------------------------------------------------

/// Monotone Session-ID-Vergabe (nie wiederverwendet)
pub struct SessionIdVergeber {
    naechste: AtomicU32,
}

impl SessionIdVergeber {
    /// Erstellt einen Vergeber; die erste ID ist 1
    pub fn neu() -> Self {
        Self {
            naechste: AtomicU32::new(1),
        }
    }

    /// Vergibt die naechste ID
    pub fn vergeben(&self) -> SessionId {
        SessionId(self.naechste.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdVergeber {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Handshake-Automat
// ---------------------------------------------------------------------------

/// Zustaende des Verbindungs-Handshakes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeZustand {
    /// Verbunden, noch keine Version gesehen
    Frisch,
    /// Version empfangen, Authenticate steht aus
    Versioniert,
    /// Credential-Pruefung laeuft
    Authentifizierung,
    /// Normalbetrieb
    Authentifiziert,
    /// Verbindung beendet
    Geschlossen,
}

impl HandshakeZustand {
    /// Prueft ob eine Nachricht in diesem Zustand zulaessig ist
    ///
    /// Vor Abschluss der Authentifizierung sind nur Version,
    /// Authenticate und Ping erlaubt.
    pub fn nachricht_zulaessig(&self, typ: NachrichtenTyp) -> bool {
        match self {
            Self::Authentifiziert => true,
            Self::Geschlossen => false,
            _ => matches!(
                typ,
                NachrichtenTyp::Version | NachrichtenTyp::Authenticate | NachrichtenTyp::Ping
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Veraenderlicher Session-Zustand
#[derive(Debug)]
pub struct SessionDaten {
    pub zustand: HandshakeZustand,
    /// Benutzer-ID nach erfolgreicher Authentifizierung
    pub user_id: UserId,
    pub name: String,
    pub kanal: ChannelId,
    pub client_version: u32,
    /// Client unterstuetzt Opus
    pub opus: bool,

    // Moderations- und Selbst-Flags
    pub mute: bool,
    pub deaf: bool,
    pub selbst_mute: bool,
    pub selbst_deaf: bool,
    pub suppress: bool,
    pub prioritaets_sprecher: bool,
    pub aufnahme: bool,

    /// Krypto-Zustand des Voice-Kanals
    pub crypt: CryptZustand,
    /// Letztes Lebenszeichen (Ping oder Voice)
    pub letzte_aktivitaet: Instant,
}

/// Handle auf eine verbundene Session
///
/// Das Handle ist refcounted: Halter ausserhalb der Session-Map
/// duerfen es ueber den Lock-Bereich hinaus behalten.
pub struct SessionHandle {
    pub id: SessionId,
    pub adresse: SocketAddr,
    /// Ausgehende Control-Queue (vom Verbindungs-Task geleert)
    pub sende_tx: mpsc::Sender<ControlMessage>,
    /// Abbruch-Signal (Kick, Ban, Server-Stop)
    pub abbruch: tokio_util::sync::CancellationToken,
    daten: Mutex<SessionDaten>,
}

impl SessionHandle {
    /// Erstellt eine frische Session samt Empfangsende der Queue
    pub fn neu(
        id: SessionId,
        adresse: SocketAddr,
    ) -> (std::sync::Arc<Self>, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_GROESSE);
        let handle = std::sync::Arc::new(Self {
            id,
            adresse,
            sende_tx: tx,
            abbruch: tokio_util::sync::CancellationToken::new(),
            daten: Mutex::new(SessionDaten {
                zustand: HandshakeZustand::Frisch,
                user_id: UserId(0),
                name: String::new(),
                kanal: ChannelId::ROOT,
                client_version: 0,
                opus: false,
                mute: false,
                deaf: false,
                selbst_mute: false,
                selbst_deaf: false,
                suppress: false,
                prioritaets_sprecher: false,
                aufnahme: false,
                crypt: CryptZustand::neu(),
                letzte_aktivitaet: Instant::now(),
            }),
        });
        (handle, rx)
    }

    /// Zugriff auf die Session-Daten
    pub fn daten(&self) -> std::sync::MutexGuard<'_, SessionDaten> {
        self.daten.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Legt eine Nachricht in die ausgehende Queue (best-effort)
    pub fn senden(&self, nachricht: ControlMessage) {
        if let Err(e) = self.sende_tx.try_send(nachricht) {
            tracing::warn!(session = %self.id, fehler = %e, "Control-Queue voll oder geschlossen");
        }
    }

    /// Markiert ein Lebenszeichen
    pub fn aktivitaet_melden(&self) {
        self.daten().letzte_aktivitaet = Instant::now();
    }

    /// Prueft ob die Session das Idle-Limit ueberschritten hat
    pub fn ist_inaktiv(&self, limit: Duration) -> bool {
        self.daten().letzte_aktivitaet.elapsed() > limit
    }

    /// Aktueller Handshake-Zustand
    pub fn zustand(&self) -> HandshakeZustand {
        self.daten().zustand
    }

    /// Ob die Session fertig authentifiziert ist
    pub fn ist_authentifiziert(&self) -> bool {
        self.zustand() == HandshakeZustand::Authentifiziert
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn adresse() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn ids_monoton_und_eindeutig() {
        let vergeber = SessionIdVergeber::neu();
        let a = vergeber.vergeben();
        let b = vergeber.vergeben();
        let c = vergeber.vergeben();
        assert!(a < b && b < c);
        assert_eq!(a, SessionId(1));
    }

    #[test]
    fn handshake_gate_vor_authentifizierung() {
        for zustand in [
            HandshakeZustand::Frisch,
            HandshakeZustand::Versioniert,
            HandshakeZustand::Authentifizierung,
        ] {
            assert!(zustand.nachricht_zulaessig(NachrichtenTyp::Version));
            assert!(zustand.nachricht_zulaessig(NachrichtenTyp::Authenticate));
            assert!(zustand.nachricht_zulaessig(NachrichtenTyp::Ping));
            assert!(!zustand.nachricht_zulaessig(NachrichtenTyp::TextMessage));
            assert!(!zustand.nachricht_zulaessig(NachrichtenTyp::UserState));
            assert!(!zustand.nachricht_zulaessig(NachrichtenTyp::UdpTunnel));
        }
    }

    #[test]
    fn handshake_gate_nach_authentifizierung() {
        let zustand = HandshakeZustand::Authentifiziert;
        assert!(zustand.nachricht_zulaessig(NachrichtenTyp::TextMessage));
        assert!(zustand.nachricht_zulaessig(NachrichtenTyp::VoiceTarget));
    }

    #[test]
    fn geschlossen_erlaubt_nichts() {
        assert!(!HandshakeZustand::Geschlossen.nachricht_zulaessig(NachrichtenTyp::Ping));
    }

    #[test]
    fn aktivitaet_und_idle() {
        let (handle, _rx) = SessionHandle::neu(SessionId(1), adresse());
        assert!(!handle.ist_inaktiv(Duration::from_secs(30)));
        handle.daten().letzte_aktivitaet = Instant::now() - Duration::from_secs(60);
        assert!(handle.ist_inaktiv(Duration::from_secs(30)));
        handle.aktivitaet_melden();
        assert!(!handle.ist_inaktiv(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn senden_legt_in_queue() {
        let (handle, mut rx) = SessionHandle::neu(SessionId(1), adresse());
        handle.senden(ControlMessage::ping(5));
        let nachricht = rx.recv().await.unwrap();
        assert!(matches!(nachricht, ControlMessage::Ping(_)));
    }
}
