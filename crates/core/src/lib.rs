//! Kurzwelle Core – gemeinsame Typen und Fehler
//!
//! Fundament-Crate ohne Abhaengigkeiten auf andere Workspace-Mitglieder.
//! Enthaelt die ID-Newtypes, die Benutzer-Eigenschafts-Tags und den
//! zentralen Fehler-Enum.

pub mod error;
pub mod types;

pub use error::{KurzwelleError, Result};
