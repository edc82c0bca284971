//! Schwund-Modell
//!
//! Leitet aus einer Signalstaerke s die paketweisen Degradationswerte
//! ab: Paketverlust-Wahrscheinlichkeit, Jitter und Rauschfaktor. Das
//! Modell kombiniert eine langsame Komponente (Periode 5-7 s, QSB),
//! eine schnelle Flatter-Komponente (100-400 ms, Mehrwege), einen
//! Zufallsanteil und gelegentliche tiefe Einbrueche. Beide Perioden
//! werden pro Aufruf neu gezogen.

use rand::Rng;

/// Obergrenze der Paketverlust-Wahrscheinlichkeit
pub const MAX_PAKETVERLUST: f32 = 0.95;

/// Obergrenze fuer Jitter und Rauschfaktor
pub const MAX_JITTER_RAUSCHEN: f32 = 0.9;

/// Degradationswerte fuer ein einzelnes Paket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchwundEffekte {
    /// Wahrscheinlichkeit das Paket zu verwerfen, [0, 0.95]
    pub paketverlust: f32,
    /// Zeitversatz-Faktor fuer die Verzoegerungsleitung, [0, 0.9]
    pub jitter: f32,
    /// Faktor fuer den additiven Rauschmischer, [0, 0.9]
    pub rauschen: f32,
    /// Ob dieser Aufruf in einen tiefen Einbruch gefallen ist
    pub tiefer_schwund: bool,
}

impl SchwundEffekte {
    /// Effekte ohne jede Degradation (Durchreichen)
    pub fn identitaet() -> Self {
        Self {
            paketverlust: 0.0,
            jitter: 0.0,
            rauschen: 0.0,
            tiefer_schwund: false,
        }
    }
}

/// Berechnet die Schwund-Effekte fuer eine Signalstaerke
///
/// `jetzt_ms` ist die Wanduhr in Millisekunden; der RNG wird injiziert
/// damit Tests deterministisch bleiben.
pub fn schwund_berechnen(
    signalstaerke: f32,
    jetzt_ms: u64,
    rng: &mut impl Rng,
) -> SchwundEffekte {
    let basis_degradation = (1.0 - signalstaerke).clamp(0.0, 1.0);

    // Langsame Komponente: graduelle Ionosphaeren-Aenderungen
    let langsame_periode = 5000.0 + 2000.0 * rng.gen::<f32>();
    let langsame_phase = (jetzt_ms % langsame_periode as u64) as f32 / langsame_periode;
    let langsam = 0.5 * (1.0 + (2.0 * std::f32::consts::PI * langsame_phase).sin());

    // Schnelle Flatter-Komponente: Mehrwege-Effekte
    let schnelle_periode = 100.0 + 300.0 * rng.gen::<f32>();
    let schnelle_phase = (jetzt_ms % schnelle_periode as u64) as f32 / schnelle_periode;
    let schnell = 0.3 * (1.0 + (2.0 * std::f32::consts::PI * schnelle_phase * 3.0).sin());

    // Unvorhersehbare Kurzzeit-Stoerungen
    let zufall = 0.2 * rng.gen::<f32>();

    // Nichtlinearer Grundschwund
    let grundschwund = basis_degradation.powf(1.3);

    // Gelegentliche tiefe Einbrueche, wahrscheinlicher bei schwachem Signal
    let tiefer_schwund = rng.gen::<f32>() < (0.05 + 0.15 * basis_degradation);
    let einbruch = if tiefer_schwund {
        0.7 + 0.3 * rng.gen::<f32>()
    } else {
        0.0
    };

    let verlust_faktor =
        grundschwund * (0.5 + 0.3 * langsam + 0.1 * schnell + zufall + einbruch);

    let jitter = basis_degradation * (0.4 + 0.2 * langsam + 0.3 * schnell + 0.1 * zufall);
    let rauschen = basis_degradation * (0.6 + 0.1 * langsam + 0.2 * schnell + 0.1 * zufall);

    SchwundEffekte {
        paketverlust: verlust_faktor.clamp(0.0, MAX_PAKETVERLUST),
        jitter: jitter.clamp(0.0, MAX_JITTER_RAUSCHEN),
        rauschen: rauschen.clamp(0.0, MAX_JITTER_RAUSCHEN),
        tiefer_schwund,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn volles_signal_ohne_degradation() {
        let mut rng = StdRng::seed_from_u64(7);
        let effekte = schwund_berechnen(1.0, 123_456, &mut rng);
        assert_eq!(effekte.paketverlust, 0.0);
        assert_eq!(effekte.jitter, 0.0);
        assert_eq!(effekte.rauschen, 0.0);
    }

    #[test]
    fn grenzen_werden_eingehalten() {
        let mut rng = StdRng::seed_from_u64(42);
        for s in [0.0f32, 0.05, 0.3, 0.7, 0.99] {
            for ms in [0u64, 999, 123_456_789] {
                let e = schwund_berechnen(s, ms, &mut rng);
                assert!((0.0..=MAX_PAKETVERLUST).contains(&e.paketverlust));
                assert!((0.0..=MAX_JITTER_RAUSCHEN).contains(&e.jitter));
                assert!((0.0..=MAX_JITTER_RAUSCHEN).contains(&e.rauschen));
            }
        }
    }

    #[test]
    fn schwaches_signal_degradiert_staerker() {
        // Gleicher Seed -> gleiche Zufallszuege; nur die Signalstaerke
        // unterscheidet die beiden Rechnungen
        let mut rng_stark = StdRng::seed_from_u64(99);
        let mut rng_schwach = StdRng::seed_from_u64(99);

        let stark = schwund_berechnen(0.9, 50_000, &mut rng_stark);
        let schwach = schwund_berechnen(0.1, 50_000, &mut rng_schwach);

        assert!(schwach.paketverlust >= stark.paketverlust);
        assert!(schwach.jitter >= stark.jitter);
        assert!(schwach.rauschen >= stark.rauschen);
    }

    #[test]
    fn tiefer_schwund_tritt_bei_schwachem_signal_auf() {
        // Bei s = 0 liegt die Einbruch-Wahrscheinlichkeit bei 20 Prozent;
        // ueber viele Aufrufe muss er vorkommen
        let mut rng = StdRng::seed_from_u64(1);
        let mut gesehen = false;
        for ms in 0..500u64 {
            if schwund_berechnen(0.0, ms * 20, &mut rng).tiefer_schwund {
                gesehen = true;
                break;
            }
        }
        assert!(gesehen, "Tiefer Schwund kam in 500 Aufrufen nie vor");
    }

    #[test]
    fn identitaet_ist_neutral() {
        let e = SchwundEffekte::identitaet();
        assert_eq!(e.paketverlust, 0.0);
        assert_eq!(e.jitter, 0.0);
        assert_eq!(e.rauschen, 0.0);
        assert!(!e.tiefer_schwund);
    }
}
