//! Kurzwelle Protocol – Wire-Protokoll des Servers
//!
//! - `control`: Steuerungsnachrichten (TCP) mit fester Tag-Zuordnung
//! - `wire`: Frame-Codec (2-Byte-Typ + 4-Byte-Laenge)
//! - `voice`: binaeres Voice-Paketformat (UDP / UDPTunnel)
//! - `crypto`: Krypto-Zustand und Record-Layer-Schnittstelle

pub mod control;
pub mod crypto;
pub mod voice;
pub mod wire;

pub use control::{ControlMessage, NachrichtenTyp, PROTOKOLL_VERSION};
pub use voice::{VoicePaket, VoicePaketKopf, VoiceTyp, ZielTyp};
pub use wire::FrameCodec;
