//! Control-Protokoll (TCP)
//!
//! Definiert alle Steuerungsnachrichten die ueber die Control-Verbindung
//! zwischen Client und Server ausgetauscht werden.
//!
//! ## Design
//! - Geschlossene Nachrichten-Enumeration mit festen numerischen Tags
//!   (Wire-Kompatibilitaet: die Zuordnung Typ -> Tag darf sich nie aendern)
//! - JSON-Serialisierung via serde (TCP, nicht zeitkritisch)
//! - Der 6-Byte-Frame-Header (Typ + Laenge) lebt in `wire.rs`

use serde::{Deserialize, Serialize};
use std::io;

use kurzwelle_core::types::{ChannelId, EigenschaftsTag, SessionId, UserId};

/// Protokollversion: zwei 16-Bit-Haelften (Major/Minor)
pub const PROTOKOLL_VERSION: u32 = 0x0001_0205;

// ---------------------------------------------------------------------------
// Nachrichten-Tags
// ---------------------------------------------------------------------------

/// Numerischer Wire-Tag einer Control-Nachricht (2 Bytes big-endian)
///
/// Die Werte sind fest und Teil des Protokolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NachrichtenTyp {
    Version = 0,
    UdpTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    Acl = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
    SuggestConfig = 25,
    PluginDataTransmission = 26,
    ChannelListener = 27,
    HfBandSimulationUpdate = 28,
    SignalQualityUpdate = 29,
    PropagationUpdate = 30,
}

impl NachrichtenTyp {
    /// Konvertiert einen Wire-Tag in die Enum-Variante
    pub fn from_u16(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Self::Version),
            1 => Some(Self::UdpTunnel),
            2 => Some(Self::Authenticate),
            3 => Some(Self::Ping),
            4 => Some(Self::Reject),
            5 => Some(Self::ServerSync),
            6 => Some(Self::ChannelRemove),
            7 => Some(Self::ChannelState),
            8 => Some(Self::UserRemove),
            9 => Some(Self::UserState),
            10 => Some(Self::BanList),
            11 => Some(Self::TextMessage),
            12 => Some(Self::PermissionDenied),
            13 => Some(Self::Acl),
            14 => Some(Self::QueryUsers),
            15 => Some(Self::CryptSetup),
            16 => Some(Self::ContextActionModify),
            17 => Some(Self::ContextAction),
            18 => Some(Self::UserList),
            19 => Some(Self::VoiceTarget),
            20 => Some(Self::PermissionQuery),
            21 => Some(Self::CodecVersion),
            22 => Some(Self::UserStats),
            23 => Some(Self::RequestBlob),
            24 => Some(Self::ServerConfig),
            25 => Some(Self::SuggestConfig),
            26 => Some(Self::PluginDataTransmission),
            27 => Some(Self::ChannelListener),
            28 => Some(Self::HfBandSimulationUpdate),
            29 => Some(Self::SignalQualityUpdate),
            30 => Some(Self::PropagationUpdate),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload-Strukturen
// ---------------------------------------------------------------------------

/// Versionsaustausch – erste Nachricht jeder Verbindung
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    /// Protokollversion (zwei 16-Bit-Haelften)
    pub version: u32,
    /// Freitext-Release des Clients
    pub release: String,
    /// Betriebssystem (optional, nur informativ)
    pub os: Option<String>,
}

/// Getunneltes Voice-Paket (UDP-Fallback ueber TCP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpTunnel {
    /// Rohes Voice-Paket inkl. erstem Byte (Typ/Ziel)
    pub daten: Vec<u8>,
}

/// Authentifizierungsanfrage des Clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticate {
    pub benutzername: String,
    pub passwort: Option<String>,
    /// Zertifikats-Hash (stark oder schwach)
    pub zert_hash: Option<String>,
    /// Client unterstuetzt Opus
    pub opus: bool,
}

/// Keepalive – beide Richtungen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Zeitstempel in Millisekunden fuer RTT-Messung
    pub zeitstempel_ms: u64,
    /// Anzahl erfolgreich entschluesselter Voice-Pakete
    pub gute_pakete: u64,
    /// Anzahl Krypto-Resyncs
    pub resyncs: u64,
}

/// Grund fuer eine Verbindungsablehnung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectGrund {
    FalscheVersion,
    UngueltigerName,
    FalschesPasswort,
    NameBelegt,
    ServerVoll,
    Gebannt,
    RateLimit,
    AuthFehler,
}

/// Ablehnung waehrend des Handshakes – danach wird geschlossen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reject {
    pub grund: RejectGrund,
    pub nachricht: String,
}

/// Abschluss des Handshakes: zugewiesene Session und Server-Parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSync {
    pub session: SessionId,
    /// Maximale Bitrate pro Benutzer in bit/s
    pub max_bandbreite: u32,
    pub willkommenstext: String,
}

/// Kanal wurde entfernt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRemove {
    pub kanal_id: ChannelId,
}

/// Zustand eines Kanals (Erstellung, Aenderung, Sync)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelState {
    pub kanal_id: Option<ChannelId>,
    pub parent: Option<ChannelId>,
    pub name: Option<String>,
    pub beschreibung: Option<String>,
    /// Permanente Links (bidirektional)
    pub links: Vec<ChannelId>,
    /// Dynamisch hinzugefuegte Links (offene Baender)
    pub links_hinzu: Vec<ChannelId>,
    pub links_weg: Vec<ChannelId>,
    pub position: Option<i32>,
    pub temporaer: Option<bool>,
}

/// Benutzer hat den Server verlassen (oder wurde entfernt)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRemove {
    pub session: SessionId,
    /// Wer die Entfernung ausgeloest hat (Kick/Ban)
    pub akteur: Option<SessionId>,
    pub grund: String,
    pub ban: bool,
}

/// Einzelne Benutzer-Eigenschaft im UserState
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EigenschaftsWert {
    pub tag: EigenschaftsTag,
    pub wert: String,
}

/// Zustand eines Benutzers (Aenderung oder Sync)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserState {
    pub session: Option<SessionId>,
    pub akteur: Option<SessionId>,
    pub user_id: Option<UserId>,
    pub name: Option<String>,
    pub kanal_id: Option<ChannelId>,
    pub self_mute: Option<bool>,
    pub self_deaf: Option<bool>,
    pub mute: Option<bool>,
    pub deaf: Option<bool>,
    pub suppress: Option<bool>,
    pub prioritaets_sprecher: Option<bool>,
    pub aufnahme: Option<bool>,
    /// Geaenderte persistierte Eigenschaften (z.B. Grid-Locator)
    pub eigenschaften: Vec<EigenschaftsWert>,
}

/// Ban-Eintrag auf dem Wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanInfo {
    pub adresse: String,
    /// Praefixlaenge der Maske
    pub maske: u8,
    pub name: String,
    pub zert_hash: String,
    pub grund: String,
    /// Startzeit als Unix-Sekunden
    pub start: i64,
    /// Dauer in Sekunden, 0 = permanent
    pub dauer_sek: u32,
}

/// Ban-Liste lesen oder ersetzen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanList {
    pub eintraege: Vec<BanInfo>,
    /// true = Client fragt die Liste nur ab
    pub abfrage: bool,
}

/// Textnachricht (auch fuer Server-Hinweise wie Band-Empfehlungen)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextMessage {
    pub absender: Option<SessionId>,
    pub sessions: Vec<SessionId>,
    pub kanaele: Vec<ChannelId>,
    /// Kanaele inklusive Unterkanaele
    pub baeume: Vec<ChannelId>,
    pub nachricht: String,
}

/// Berechtigungsfehler – die Session ueberlebt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDenied {
    pub grund: String,
    /// Verweigerte Berechtigung als Bitmaske (falls zutreffend)
    pub berechtigung: Option<u32>,
    pub kanal_id: Option<ChannelId>,
    pub session: Option<SessionId>,
}

/// ACL-Zeile auf dem Wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclInfo {
    pub user_id: Option<UserId>,
    pub gruppe: Option<String>,
    pub erlauben: u32,
    pub verweigern: u32,
    pub hier_anwenden: bool,
    pub unterkanaele_anwenden: bool,
    pub geerbt: bool,
}

/// ACL eines Kanals lesen oder schreiben
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acl {
    pub kanal_id: ChannelId,
    pub eintraege: Vec<AclInfo>,
    pub erbt_acl: bool,
    pub abfrage: bool,
}

/// Benutzer-Registry abfragen (IDs <-> Namen)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryUsers {
    pub ids: Vec<UserId>,
    pub namen: Vec<String>,
}

/// Krypto-Parameter fuer den Voice-Kanal
///
/// Ohne Felder ausser `client_nonce` fordert der Client einen Resync an.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptSetup {
    pub schluessel: Option<Vec<u8>>,
    pub client_nonce: Option<Vec<u8>>,
    pub server_nonce: Option<Vec<u8>>,
}

/// Kontextmenu-Aktion registrieren/entfernen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextActionModify {
    pub aktion: String,
    pub text: String,
    pub kontext: u32,
    /// true = hinzufuegen, false = entfernen
    pub hinzufuegen: bool,
}

/// Vom Client ausgeloeste Kontextaktion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAction {
    pub session: Option<SessionId>,
    pub kanal_id: Option<ChannelId>,
    pub aktion: String,
}

/// Registrierter Benutzer in der UserList
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrierterBenutzer {
    pub user_id: UserId,
    pub name: String,
    pub zuletzt_gesehen: Option<String>,
    pub letzter_kanal: Option<ChannelId>,
}

/// Liste aller registrierten Benutzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub benutzer: Vec<RegistrierterBenutzer>,
}

/// Einzelnes Ziel innerhalb eines Fluester-Slots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceZiel {
    pub sessions: Vec<SessionId>,
    pub kanal_id: Option<ChannelId>,
    /// Gruppenfilter: nur Mitglieder dieser Gruppe empfangen
    pub gruppe: Option<String>,
    /// Unterkanaele einschliessen
    pub rekursiv: bool,
    /// Gelinkte Kanaele einschliessen
    pub links: bool,
}

/// Fluester-Slot registrieren (Slots 1..=30)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTarget {
    pub slot: u8,
    pub ziele: Vec<VoiceZiel>,
}

/// Effektive Berechtigungen fuer einen Kanal abfragen/melden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionQuery {
    pub kanal_id: Option<ChannelId>,
    pub berechtigungen: Option<u32>,
    /// true = alle gecachten Berechtigungen des Clients verwerfen
    pub flush: bool,
}

/// Codec-Aushandlung
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecVersion {
    pub celt_alpha: i32,
    pub celt_beta: i32,
    pub opus: bool,
    pub bevorzugt_alpha: bool,
}

/// Verbindungsstatistik eines Benutzers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub session: Option<SessionId>,
    pub pakete_gut: u64,
    pub pakete_verloren: u64,
    pub resyncs: u64,
    pub adresse: Option<String>,
    pub opus: bool,
}

/// Grosse Blobs (Texturen, Kommentare) nachfordern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBlob {
    pub session_textur: Vec<SessionId>,
    pub session_kommentar: Vec<SessionId>,
    pub kanal_beschreibung: Vec<ChannelId>,
}

/// Server-Parameter nach dem Sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub max_bandbreite: u32,
    pub willkommenstext: String,
    pub max_benutzer: u32,
    pub nachricht_max_laenge: u32,
}

/// Empfohlene Client-Einstellungen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestConfig {
    pub version: Option<u32>,
    pub positional: Option<bool>,
    pub push_to_talk: Option<bool>,
}

/// Opake Datenuebertragung zwischen Client-Plugins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDataTransmission {
    pub absender: Option<SessionId>,
    pub empfaenger: Vec<SessionId>,
    pub daten: Vec<u8>,
    pub daten_id: String,
}

/// Mithoerer-Bindung hinzufuegen oder entfernen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelListener {
    pub session: Option<SessionId>,
    pub kanal_id: ChannelId,
    pub hinzufuegen: bool,
    /// Lautstaerke-Anpassung der Bindung (None = unveraendert)
    pub lautstaerke: Option<f32>,
}

/// Ionosphaeren-Parameter setzen (ConfigurePropagation erforderlich)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HfBandSimulationUpdate {
    pub sfi: Option<u16>,
    pub k_index: Option<u8>,
    pub jahreszeit: Option<u8>,
    pub auto_jahreszeit: Option<bool>,
}

/// Signalqualitaet zwischen zwei Sessions hat sich geaendert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalQualityUpdate {
    pub von_session: SessionId,
    pub zu_session: SessionId,
    pub qualitaet: f32,
}

/// Ausbreitungsbedingungen haben sich geaendert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationUpdate {
    pub sfi: u16,
    pub k_index: u8,
    pub jahreszeit: u8,
    pub muf: f32,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: ControlMessage
// ---------------------------------------------------------------------------

/// Alle moeglichen Control-Nachrichten
///
/// Die Enumeration ist geschlossen: unbekannte Wire-Tags fuehren zum
/// Verbindungsabbruch (Protokollfehler), nicht zum Ignorieren.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlMessage {
    Version(Version),
    UdpTunnel(UdpTunnel),
    Authenticate(Authenticate),
    Ping(Ping),
    Reject(Reject),
    ServerSync(ServerSync),
    ChannelRemove(ChannelRemove),
    ChannelState(ChannelState),
    UserRemove(UserRemove),
    UserState(UserState),
    BanList(BanList),
    TextMessage(TextMessage),
    PermissionDenied(PermissionDenied),
    Acl(Acl),
    QueryUsers(QueryUsers),
    CryptSetup(CryptSetup),
    ContextActionModify(ContextActionModify),
    ContextAction(ContextAction),
    UserList(UserList),
    VoiceTarget(VoiceTarget),
    PermissionQuery(PermissionQuery),
    CodecVersion(CodecVersion),
    UserStats(UserStats),
    RequestBlob(RequestBlob),
    ServerConfig(ServerConfig),
    SuggestConfig(SuggestConfig),
    PluginDataTransmission(PluginDataTransmission),
    ChannelListener(ChannelListener),
    HfBandSimulationUpdate(HfBandSimulationUpdate),
    SignalQualityUpdate(SignalQualityUpdate),
    PropagationUpdate(PropagationUpdate),
}

impl ControlMessage {
    /// Gibt den festen Wire-Tag dieser Nachricht zurueck
    pub fn typ(&self) -> NachrichtenTyp {
        match self {
            Self::Version(_) => NachrichtenTyp::Version,
            Self::UdpTunnel(_) => NachrichtenTyp::UdpTunnel,
            Self::Authenticate(_) => NachrichtenTyp::Authenticate,
            Self::Ping(_) => NachrichtenTyp::Ping,
            Self::Reject(_) => NachrichtenTyp::Reject,
            Self::ServerSync(_) => NachrichtenTyp::ServerSync,
            Self::ChannelRemove(_) => NachrichtenTyp::ChannelRemove,
            Self::ChannelState(_) => NachrichtenTyp::ChannelState,
            Self::UserRemove(_) => NachrichtenTyp::UserRemove,
            Self::UserState(_) => NachrichtenTyp::UserState,
            Self::BanList(_) => NachrichtenTyp::BanList,
            Self::TextMessage(_) => NachrichtenTyp::TextMessage,
            Self::PermissionDenied(_) => NachrichtenTyp::PermissionDenied,
            Self::Acl(_) => NachrichtenTyp::Acl,
            Self::QueryUsers(_) => NachrichtenTyp::QueryUsers,
            Self::CryptSetup(_) => NachrichtenTyp::CryptSetup,
            Self::ContextActionModify(_) => NachrichtenTyp::ContextActionModify,
            Self::ContextAction(_) => NachrichtenTyp::ContextAction,
            Self::UserList(_) => NachrichtenTyp::UserList,
            Self::VoiceTarget(_) => NachrichtenTyp::VoiceTarget,
            Self::PermissionQuery(_) => NachrichtenTyp::PermissionQuery,
            Self::CodecVersion(_) => NachrichtenTyp::CodecVersion,
            Self::UserStats(_) => NachrichtenTyp::UserStats,
            Self::RequestBlob(_) => NachrichtenTyp::RequestBlob,
            Self::ServerConfig(_) => NachrichtenTyp::ServerConfig,
            Self::SuggestConfig(_) => NachrichtenTyp::SuggestConfig,
            Self::PluginDataTransmission(_) => NachrichtenTyp::PluginDataTransmission,
            Self::ChannelListener(_) => NachrichtenTyp::ChannelListener,
            Self::HfBandSimulationUpdate(_) => NachrichtenTyp::HfBandSimulationUpdate,
            Self::SignalQualityUpdate(_) => NachrichtenTyp::SignalQualityUpdate,
            Self::PropagationUpdate(_) => NachrichtenTyp::PropagationUpdate,
        }
    }

    /// Serialisiert die Payload (ohne Frame-Header) als JSON-Bytes
    pub fn payload_kodieren(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Self::Version(m) => serde_json::to_vec(m),
            Self::UdpTunnel(m) => serde_json::to_vec(m),
            Self::Authenticate(m) => serde_json::to_vec(m),
            Self::Ping(m) => serde_json::to_vec(m),
            Self::Reject(m) => serde_json::to_vec(m),
            Self::ServerSync(m) => serde_json::to_vec(m),
            Self::ChannelRemove(m) => serde_json::to_vec(m),
            Self::ChannelState(m) => serde_json::to_vec(m),
            Self::UserRemove(m) => serde_json::to_vec(m),
            Self::UserState(m) => serde_json::to_vec(m),
            Self::BanList(m) => serde_json::to_vec(m),
            Self::TextMessage(m) => serde_json::to_vec(m),
            Self::PermissionDenied(m) => serde_json::to_vec(m),
            Self::Acl(m) => serde_json::to_vec(m),
            Self::QueryUsers(m) => serde_json::to_vec(m),
            Self::CryptSetup(m) => serde_json::to_vec(m),
            Self::ContextActionModify(m) => serde_json::to_vec(m),
            Self::ContextAction(m) => serde_json::to_vec(m),
            Self::UserList(m) => serde_json::to_vec(m),
            Self::VoiceTarget(m) => serde_json::to_vec(m),
            Self::PermissionQuery(m) => serde_json::to_vec(m),
            Self::CodecVersion(m) => serde_json::to_vec(m),
            Self::UserStats(m) => serde_json::to_vec(m),
            Self::RequestBlob(m) => serde_json::to_vec(m),
            Self::ServerConfig(m) => serde_json::to_vec(m),
            Self::SuggestConfig(m) => serde_json::to_vec(m),
            Self::PluginDataTransmission(m) => serde_json::to_vec(m),
            Self::ChannelListener(m) => serde_json::to_vec(m),
            Self::HfBandSimulationUpdate(m) => serde_json::to_vec(m),
            Self::SignalQualityUpdate(m) => serde_json::to_vec(m),
            Self::PropagationUpdate(m) => serde_json::to_vec(m),
        }
    }

    /// Deserialisiert eine Payload anhand des Wire-Tags
    pub fn payload_dekodieren(typ: NachrichtenTyp, bytes: &[u8]) -> io::Result<Self> {
        fn json<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> io::Result<T> {
            serde_json::from_slice(bytes).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Payload-Deserialisierung fehlgeschlagen: {e}"),
                )
            })
        }

        Ok(match typ {
            NachrichtenTyp::Version => Self::Version(json(bytes)?),
            NachrichtenTyp::UdpTunnel => Self::UdpTunnel(json(bytes)?),
            NachrichtenTyp::Authenticate => Self::Authenticate(json(bytes)?),
            NachrichtenTyp::Ping => Self::Ping(json(bytes)?),
            NachrichtenTyp::Reject => Self::Reject(json(bytes)?),
            NachrichtenTyp::ServerSync => Self::ServerSync(json(bytes)?),
            NachrichtenTyp::ChannelRemove => Self::ChannelRemove(json(bytes)?),
            NachrichtenTyp::ChannelState => Self::ChannelState(json(bytes)?),
            NachrichtenTyp::UserRemove => Self::UserRemove(json(bytes)?),
            NachrichtenTyp::UserState => Self::UserState(json(bytes)?),
            NachrichtenTyp::BanList => Self::BanList(json(bytes)?),
            NachrichtenTyp::TextMessage => Self::TextMessage(json(bytes)?),
            NachrichtenTyp::PermissionDenied => Self::PermissionDenied(json(bytes)?),
            NachrichtenTyp::Acl => Self::Acl(json(bytes)?),
            NachrichtenTyp::QueryUsers => Self::QueryUsers(json(bytes)?),
            NachrichtenTyp::CryptSetup => Self::CryptSetup(json(bytes)?),
            NachrichtenTyp::ContextActionModify => Self::ContextActionModify(json(bytes)?),
            NachrichtenTyp::ContextAction => Self::ContextAction(json(bytes)?),
            NachrichtenTyp::UserList => Self::UserList(json(bytes)?),
            NachrichtenTyp::VoiceTarget => Self::VoiceTarget(json(bytes)?),
            NachrichtenTyp::PermissionQuery => Self::PermissionQuery(json(bytes)?),
            NachrichtenTyp::CodecVersion => Self::CodecVersion(json(bytes)?),
            NachrichtenTyp::UserStats => Self::UserStats(json(bytes)?),
            NachrichtenTyp::RequestBlob => Self::RequestBlob(json(bytes)?),
            NachrichtenTyp::ServerConfig => Self::ServerConfig(json(bytes)?),
            NachrichtenTyp::SuggestConfig => Self::SuggestConfig(json(bytes)?),
            NachrichtenTyp::PluginDataTransmission => Self::PluginDataTransmission(json(bytes)?),
            NachrichtenTyp::ChannelListener => Self::ChannelListener(json(bytes)?),
            NachrichtenTyp::HfBandSimulationUpdate => Self::HfBandSimulationUpdate(json(bytes)?),
            NachrichtenTyp::SignalQualityUpdate => Self::SignalQualityUpdate(json(bytes)?),
            NachrichtenTyp::PropagationUpdate => Self::PropagationUpdate(json(bytes)?),
        })
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(zeitstempel_ms: u64) -> Self {
        Self::Ping(Ping {
            zeitstempel_ms,
            gute_pakete: 0,
            resyncs: 0,
        })
    }

    /// Erstellt eine Textnachricht an eine einzelne Session
    pub fn text_an_session(ziel: SessionId, nachricht: impl Into<String>) -> Self {
        Self::TextMessage(TextMessage {
            absender: None,
            sessions: vec![ziel],
            kanaele: Vec::new(),
            baeume: Vec::new(),
            nachricht: nachricht.into(),
        })
    }

    /// Erstellt eine PermissionDenied-Antwort
    pub fn zugriff_verweigert(grund: impl Into<String>) -> Self {
        Self::PermissionDenied(PermissionDenied {
            grund: grund.into(),
            berechtigung: None,
            kanal_id: None,
            session: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_sind_stabil() {
        // Wire-Kompatibilitaet: diese Zuordnung darf sich nie aendern
        assert_eq!(NachrichtenTyp::Version as u16, 0);
        assert_eq!(NachrichtenTyp::UdpTunnel as u16, 1);
        assert_eq!(NachrichtenTyp::Authenticate as u16, 2);
        assert_eq!(NachrichtenTyp::Ping as u16, 3);
        assert_eq!(NachrichtenTyp::ServerSync as u16, 5);
        assert_eq!(NachrichtenTyp::UserState as u16, 9);
        assert_eq!(NachrichtenTyp::CryptSetup as u16, 15);
        assert_eq!(NachrichtenTyp::VoiceTarget as u16, 19);
        assert_eq!(NachrichtenTyp::ChannelListener as u16, 27);
        assert_eq!(NachrichtenTyp::HfBandSimulationUpdate as u16, 28);
        assert_eq!(NachrichtenTyp::SignalQualityUpdate as u16, 29);
        assert_eq!(NachrichtenTyp::PropagationUpdate as u16, 30);
    }

    #[test]
    fn tag_round_trip_alle_typen() {
        for tag in 0u16..=30 {
            let typ = NachrichtenTyp::from_u16(tag).expect("Tag muss bekannt sein");
            assert_eq!(typ as u16, tag);
        }
        assert!(NachrichtenTyp::from_u16(31).is_none());
        assert!(NachrichtenTyp::from_u16(u16::MAX).is_none());
    }

    #[test]
    fn payload_round_trip_ping() {
        let msg = ControlMessage::ping(123456789);
        let bytes = msg.payload_kodieren().unwrap();
        let decoded = ControlMessage::payload_dekodieren(msg.typ(), &bytes).unwrap();
        if let ControlMessage::Ping(p) = decoded {
            assert_eq!(p.zeitstempel_ms, 123456789);
        } else {
            panic!("Erwartet Ping");
        }
    }

    #[test]
    fn payload_round_trip_user_state_mit_eigenschaften() {
        let msg = ControlMessage::UserState(UserState {
            session: Some(SessionId(3)),
            eigenschaften: vec![EigenschaftsWert {
                tag: EigenschaftsTag::GridLocator,
                wert: "JO59jw".into(),
            }],
            ..Default::default()
        });
        let bytes = msg.payload_kodieren().unwrap();
        let decoded = ControlMessage::payload_dekodieren(NachrichtenTyp::UserState, &bytes).unwrap();
        if let ControlMessage::UserState(s) = decoded {
            assert_eq!(s.session, Some(SessionId(3)));
            assert_eq!(s.eigenschaften[0].wert, "JO59jw");
        } else {
            panic!("Erwartet UserState");
        }
    }

    #[test]
    fn payload_round_trip_hf_update() {
        let msg = ControlMessage::HfBandSimulationUpdate(HfBandSimulationUpdate {
            sfi: Some(180),
            k_index: Some(2),
            jahreszeit: None,
            auto_jahreszeit: Some(true),
        });
        let bytes = msg.payload_kodieren().unwrap();
        let decoded =
            ControlMessage::payload_dekodieren(NachrichtenTyp::HfBandSimulationUpdate, &bytes)
                .unwrap();
        if let ControlMessage::HfBandSimulationUpdate(u) = decoded {
            assert_eq!(u.sfi, Some(180));
            assert_eq!(u.k_index, Some(2));
        } else {
            panic!("Erwartet HfBandSimulationUpdate");
        }
    }

    #[test]
    fn payload_dekodieren_kaputtes_json() {
        let result = ControlMessage::payload_dekodieren(NachrichtenTyp::Ping, b"kein json");
        assert!(result.is_err());
    }

    #[test]
    fn voice_ziel_standard() {
        let ziel = VoiceZiel::default();
        assert!(ziel.sessions.is_empty());
        assert!(!ziel.rekursiv);
        assert!(ziel.gruppe.is_none());
    }
}
