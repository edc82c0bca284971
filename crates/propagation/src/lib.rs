//! Kurzwelle Propagation – das HF-Ausbreitungsmodell
//!
//! - `grid`: Maidenhead-Locator und Grosskreis-Distanz
//! - `sun`: Sonnenzenitwinkel und Tag/Nacht-Bestimmung
//! - `ionosphere`: Ionosphaeren-Zustand, foF2, F-Schicht, MUF
//! - `simulation`: Signalstaerke mit epochen-gebundenem Paar-Cache
//! - `fading`: paketweises Schwund-Modell
//! - `band`: Band-Leiter, Empfehlung und offene Baender

pub mod band;
pub mod fading;
pub mod grid;
pub mod ionosphere;
pub mod simulation;
pub mod sun;

pub use fading::SchwundEffekte;
pub use grid::{distanz_km, Locator};
pub use ionosphere::{IonosphaerenZustand, Jahreszeit};
pub use simulation::{HfBandSimulation, KOMMUNIKATIONS_SCHWELLE};
