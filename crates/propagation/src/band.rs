//! Bandplan und Band-Empfehlung
//!
//! Die Band-Kanaele des Servers entsprechen den Amateurfunk-Baendern
//! der festen Leiter {10, 12, 15, 17, 20, 30, 40, 80, 160} Meter.
//! Die Empfehlung fuer eine Strecke ergibt sich aus Distanz und MUF;
//! Strecken unter 500 km bekommen unabhaengig von der MUF das 20m-Band.

/// Band-Leiter in Metern, von hoch- zu niederfrequent
pub const BAND_LEITER: [u16; 9] = [10, 12, 15, 17, 20, 30, 40, 80, 160];

/// Prueft ob eine Meterangabe ein bekanntes Band ist
pub fn ist_band(meter: u16) -> bool {
    BAND_LEITER.contains(&meter)
}

/// Empfiehlt ein Band (in Metern) fuer Distanz und MUF
pub fn band_empfehlen(distanz_km: f64, muf_mhz: f64) -> u16 {
    // Kurzstrecke: festes 20m-Band, unabhaengig von der MUF
    if distanz_km < 500.0 {
        return 20;
    }

    // Mittelstrecke: Dreiwege-Wahl
    if distanz_km < 2000.0 {
        return if muf_mhz > 21.0 {
            15
        } else if muf_mhz > 14.0 {
            20
        } else {
            40
        };
    }

    // Langstrecke: von oben die Leiter herab
    if muf_mhz > 28.0 {
        10
    } else if muf_mhz > 24.0 {
        12
    } else if muf_mhz > 21.0 {
        15
    } else if muf_mhz > 18.0 {
        17
    } else if muf_mhz > 14.0 {
        20
    } else if muf_mhz > 10.0 {
        30
    } else if muf_mhz > 7.0 {
        40
    } else if muf_mhz > 3.5 {
        80
    } else {
        160
    }
}

/// Offene Baender nach Sonnenfluss und K-Index
///
/// Hohe Sonnenaktivitaet oeffnet die hohen Baender; ein gestoertes
/// Erdmagnetfeld (K > 5) schliesst sie wieder.
pub fn offene_baender(sfi: u16, k_index: u8) -> Vec<u16> {
    let mut baender: Vec<u16> = if sfi > 150 {
        vec![10, 12, 15]
    } else if sfi > 100 {
        vec![15, 17, 20]
    } else {
        vec![40, 80, 160]
    };

    if k_index > 5 {
        baender.retain(|b| !matches!(b, 10 | 12 | 15));
    }

    baender
}

/// Baut den Empfehlungs-Text fuer einen Benutzer
///
/// Wird als Textnachricht verschickt wenn sich die Bedingungen aendern
/// oder der Benutzer seinen Locator setzt.
pub fn empfehlungs_text(locator: &str, ist_tag: bool, sfi: u16, k_index: u8) -> String {
    let mut text = format!(
        "Band-Empfehlungen fuer {} ({}):\n",
        locator,
        if ist_tag { "Tag" } else { "Nacht" }
    );
    text.push_str(&format!("Sonnenflussindex: {sfi}, K-Index: {k_index}\n"));

    if ist_tag {
        if sfi > 150 {
            text.push_str("Hervorragende DX-Bedingungen auf den hohen Baendern.\n");
            text.push_str("Empfohlene Baender: 10m, 12m, 15m, 17m, 20m");
        } else if sfi > 100 {
            text.push_str("Gute DX-Bedingungen auf den mittleren Baendern.\n");
            text.push_str("Empfohlene Baender: 15m, 17m, 20m, 30m");
        } else {
            text.push_str("Maessige Bedingungen, untere Baender bevorzugen.\n");
            text.push_str("Empfohlene Baender: 20m, 30m, 40m");
        }
    } else {
        text.push_str("Nachts tragen die unteren Baender.\n");
        text.push_str("Empfohlene Baender: 40m, 80m, 160m");
        // Im Sonnenfleckenmaximum bleibt 20m auch nachts offen
        if sfi > 150 {
            text.push_str(", 20m");
        }
    }

    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
