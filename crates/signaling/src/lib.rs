//! Kurzwelle Signaling – die Control-Plane des Servers
//!
//! - `session`: Session-Lebenszyklus und Handshake-Automat
//! - `server_state`: geteilter Zustand aller Verbindungs-Tasks
//! - `connection`: Verbindungs-Task (Handshake, Select-Schleife, Abbau)
//! - `dispatcher`: Verarbeitung authentifizierter Nachrichten
//! - `broadcast`: Sync- und Rundruf-Nachrichten

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod server_state;
pub mod session;

pub use connection::{passwort_verifier, verbindung_bedienen};
pub use dispatcher::fluester_neu_aufloesen;
pub use server_state::{ServerZustand, SignalingKonfiguration, VollStore};
pub use session::{HandshakeZustand, SessionHandle, SessionIdVergeber};
