//! Maidenhead-Locator
//!
//! Ein Locator kodiert ein Rechteck auf der Erdoberflaeche in 4 oder 6
//! Zeichen: Feld (2 Buchstaben A..R), Quadrat (2 Ziffern), optional
//! Subquadrat (2 Buchstaben a..x). Die Dekodierung liefert den
//! Mittelpunkt des kleinsten kodierten Rechtecks.

use serde::{Deserialize, Serialize};

use kurzwelle_core::{KurzwelleError, Result};

/// Erdradius in Kilometern (Kugelmodell)
pub const ERDRADIUS_KM: f64 = 6371.0;

/// Validierter Maidenhead-Locator (normalisiert: "AB12cd")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    /// Parst und normalisiert einen Locator
    ///
    /// # Fehler
    /// - `Validierung` wenn das Format nicht `[A-R]{2}[0-9]{2}([a-x]{2})?` ist
    pub fn parse(roh: &str) -> Result<Self> {
        let zeichen: Vec<char> = roh.chars().collect();
        if zeichen.len() != 4 && zeichen.len() != 6 {
            return Err(Self::format_fehler(roh));
        }

        let feld_lon = zeichen[0].to_ascii_uppercase();
        let feld_lat = zeichen[1].to_ascii_uppercase();
        if !('A'..='R').contains(&feld_lon) || !('A'..='R').contains(&feld_lat) {
            return Err(Self::format_fehler(roh));
        }
        if !zeichen[2].is_ascii_digit() || !zeichen[3].is_ascii_digit() {
            return Err(Self::format_fehler(roh));
        }

        let mut normalisiert = String::with_capacity(zeichen.len());
        normalisiert.push(feld_lon);
        normalisiert.push(feld_lat);
        normalisiert.push(zeichen[2]);
        normalisiert.push(zeichen[3]);

        if zeichen.len() == 6 {
            let sub_lon = zeichen[4].to_ascii_lowercase();
            let sub_lat = zeichen[5].to_ascii_lowercase();
            if !('a'..='x').contains(&sub_lon) || !('a'..='x').contains(&sub_lat) {
                return Err(Self::format_fehler(roh));
            }
            normalisiert.push(sub_lon);
            normalisiert.push(sub_lat);
        }

        Ok(Self(normalisiert))
    }

    fn format_fehler(roh: &str) -> KurzwelleError {
        KurzwelleError::Validierung(format!(
            "Ungueltiger Maidenhead-Locator {roh:?} (erwartet z.B. 'AB12' oder 'AB12cd')"
        ))
    }

    /// Normalisierte Darstellung
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dekodiert den Locator zum Mittelpunkt des kleinsten Rechtecks
    ///
    /// Rueckgabe: (Breite, Laenge) in Grad.
    pub fn koordinaten(&self) -> (f64, f64) {
        let zeichen: Vec<char> = self.0.chars().collect();

        let feld_lon = (zeichen[0] as u8 - b'A') as f64;
        let feld_lat = (zeichen[1] as u8 - b'A') as f64;
        let quadrat_lon = (zeichen[2] as u8 - b'0') as f64;
        let quadrat_lat = (zeichen[3] as u8 - b'0') as f64;

        let mut laenge = feld_lon * 20.0 + quadrat_lon * 2.0 - 180.0;
        let mut breite = feld_lat * 10.0 + quadrat_lat - 90.0;

        if zeichen.len() >= 6 {
            let sub_lon = (zeichen[4] as u8 - b'a') as f64;
            let sub_lat = (zeichen[5] as u8 - b'a') as f64;
            laenge += sub_lon * 2.0 / 24.0;
            breite += sub_lat / 24.0;
            // Mittelpunkt des Subquadrats
            laenge += 1.0 / 24.0;
            breite += 1.0 / 48.0;
        } else {
            // Mittelpunkt des Quadrats
            laenge += 1.0;
            breite += 0.5;
        }

        (breite, laenge)
    }

    /// Kodiert Koordinaten als Locator
    ///
    /// `praezision` ist 4 oder 6 Zeichen; andere Werte werden auf 4
    /// abgerundet bzw. auf 6 gekappt.
    pub fn aus_koordinaten(breite: f64, laenge: f64, praezision: usize) -> Self {
        let mut laenge = laenge;
        while laenge < -180.0 {
            laenge += 360.0;
        }
        while laenge > 180.0 {
            laenge -= 360.0;
        }
        let breite = breite.clamp(-90.0, 90.0);

        let lon_basis = laenge + 180.0;
        let lat_basis = breite + 90.0;

        // Obergrenzen kappen damit 180.0/90.0 nicht in Feld "S" fallen
        let feld_lon = ((lon_basis / 20.0) as u8).min(17);
        let feld_lat = ((lat_basis / 10.0) as u8).min(17);
        let quadrat_lon = (((lon_basis - f64::from(feld_lon) * 20.0) / 2.0) as u8).min(9);
        let quadrat_lat = ((lat_basis - f64::from(feld_lat) * 10.0) as u8).min(9);

        let mut locator = String::with_capacity(6);
        locator.push((b'A' + feld_lon) as char);
        locator.push((b'A' + feld_lat) as char);
        locator.push((b'0' + quadrat_lon) as char);
        locator.push((b'0' + quadrat_lat) as char);

        if praezision >= 6 {
            let rest_lon = lon_basis - f64::from(feld_lon) * 20.0 - f64::from(quadrat_lon) * 2.0;
            let rest_lat = lat_basis - f64::from(feld_lat) * 10.0 - f64::from(quadrat_lat);
            let sub_lon = ((rest_lon * 12.0) as u8).min(23);
            let sub_lat = ((rest_lat * 24.0) as u8).min(23);
            locator.push((b'a' + sub_lon) as char);
            locator.push((b'a' + sub_lat) as char);
        }

        Self(locator)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Locator {
    type Err = KurzwelleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Grosskreis-Distanz zweier Locator-Mittelpunkte in Kilometern
///
/// Haversine-Formel auf einer Kugel mit R = 6371 km.
pub fn distanz_km(a: &Locator, b: &Locator) -> f64 {
    let (lat1, lon1) = a.koordinaten();
    let (lat2, lon2) = b.koordinaten();

    let lat1 = lat1.to_radians();
    let lon1 = lon1.to_radians();
    let lat2 = lat2.to_radians();
    let lon2 = lon2.to_radians();

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    ERDRADIUS_KM * c
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
