//! Kurzwelle Voice – Audio-Routing und UDP-Transport
//!
//! - `router`: Empfaenger-Ermittlung und Ausbreitungs-Degradation
//! - `whisper`: Fluester-Slots mit materialisiertem Empfaenger-Cache
//! - `state`: Session-zu-Endpunkt-Bindung
//! - `udp`: UDP-Socket, Empfangsschleife, Sende-Tasks

pub mod router;
pub mod state;
pub mod udp;
pub mod whisper;

pub use router::{AudioRouter, GeroutetesPaket, RoutingErgebnis, TeilnehmerInfo};
pub use state::VoiceZustand;
pub use udp::{UdpKonfiguration, UdpServer};
pub use whisper::{FluesterDefinition, FluesterRegister};
