//! Sonnenstand
//!
//! Berechnet den Sonnenzenitwinkel fuer einen Ort und Zeitpunkt:
//! Deklination aus dem Jahrestag, Stundenwinkel aus Ortszeit und
//! Laengengrad-Korrektur. Tag heisst Zenitwinkel < 90 Grad.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::grid::Locator;

/// Zenitwinkel-Grenze fuer "Tag"
pub const TAG_GRENZE_GRAD: f64 = 90.0;

/// Sonnenzenitwinkel in Grad fuer Koordinaten und Zeitpunkt (UTC)
pub fn zenitwinkel_grad(breite: f64, laenge: f64, zeit: DateTime<Utc>) -> f64 {
    // Jahrestag 0-basiert
    let jahrestag = f64::from(zeit.ordinal0());
    let stunde = f64::from(zeit.hour()) + f64::from(zeit.minute()) / 60.0;

    // Sonnendeklination
    let deklination =
        23.45 * (2.0 * std::f64::consts::PI * (284.0 + jahrestag) / 365.0).sin();

    // Zeitkorrektur in Minuten; UTC hat Offset 0
    let zeitkorrektur = 4.0 * laenge;

    // Stundenwinkel
    let stundenwinkel = 15.0 * (stunde + zeitkorrektur / 60.0 - 12.0);

    let breite_rad = breite.to_radians();
    let deklination_rad = deklination.to_radians();
    let stundenwinkel_rad = stundenwinkel.to_radians();

    let cos_zenit = breite_rad.sin() * deklination_rad.sin()
        + breite_rad.cos() * deklination_rad.cos() * stundenwinkel_rad.cos();

    cos_zenit.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Sonnenzenitwinkel fuer einen Locator-Mittelpunkt
pub fn zenitwinkel_fuer_locator(locator: &Locator, zeit: DateTime<Utc>) -> f64 {
    let (breite, laenge) = locator.koordinaten();
    zenitwinkel_grad(breite, laenge, zeit)
}

/// Prueft ob an einem Locator gerade Tag ist
pub fn ist_tag(locator: &Locator, zeit: DateTime<Utc>) -> bool {
    zenitwinkel_fuer_locator(locator, zeit) < TAG_GRENZE_GRAD
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
