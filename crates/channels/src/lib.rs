//! Kurzwelle Channels – Kanalbaum, ACL und Mithoerer
//!
//! - `tree`: Kanalbaum mit permanenten und dynamischen Links
//! - `acl`: Berechtigungs-Bits und Auswertung mit Cache
//! - `listener`: Mithoerer-Bindungen und Lautstaerke-Anpassung

pub mod acl;
pub mod listener;
pub mod tree;

pub use acl::{AclBewertung, Berechtigung, BenutzerKontext};
pub use listener::{AnpassungsTyp, LautstaerkeAnpassung, MithoererManager};
pub use tree::{Kanal, KanalBaum};
