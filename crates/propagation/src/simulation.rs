//! HF-Band-Simulation
//!
//! Zentrale Koordination des Ausbreitungsmodells: haelt den
//! Ionosphaeren-Zustand, memoisiert Paar-Signalstaerken unter der
//! aktuellen Epoche und veroeffentlicht Zustandsaenderungen auf dem
//! Event-Bus.
//!
//! ## Epochen-Disziplin
//!
//! Jede Mutation von SFI, K-Index oder Jahreszeit erhoeht die Epoche,
//! leert den Paar-Cache und veroeffentlicht danach die Benachrichtigung:
//! die Epochen-Erhoehung passiert strikt vor jeder nachgelagerten
//! Cache-Befuellung oder Zustellung. Sperr-Reihenfolge ist immer
//! Zustand -> Cache; veroeffentlicht wird erst nach Freigabe beider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;

use kurzwelle_modules::bus::{Ereignis, EventBus};

use crate::band;
use crate::fading::{schwund_berechnen, SchwundEffekte};
use crate::grid::{distanz_km, Locator};
use crate::ionosphere::{IonosphaerenZustand, Jahreszeit};
use crate::sun;

/// Mindest-Signalstaerke fuer Kommunikation
pub const KOMMUNIKATIONS_SCHWELLE: f32 = 0.05;

/// Cache-Eintrag: Signalstaerke unter einer Epoche
#[derive(Debug, Clone, Copy)]
struct PaarEintrag {
    staerke: f32,
    epoche: u64,
}

/// Die HF-Band-Simulation des Servers
pub struct HfBandSimulation {
    zustand: Mutex<IonosphaerenZustand>,
    paar_cache: Mutex<HashMap<(String, String), PaarEintrag>>,
    bus: EventBus,
    /// Koalesziert ueberlappende periodische Aktualisierungen
    aktualisierung_laeuft: AtomicBool,
}

impl HfBandSimulation {
    /// Erstellt die Simulation mit Standard-Zustand
    pub fn neu(bus: EventBus) -> Self {
        Self::mit_zustand(bus, IonosphaerenZustand::neu())
    }

    /// Erstellt die Simulation mit vorgegebenem Zustand
    pub fn mit_zustand(bus: EventBus, zustand: IonosphaerenZustand) -> Self {
        Self {
            zustand: Mutex::new(zustand),
            paar_cache: Mutex::new(HashMap::new()),
            bus,
            aktualisierung_laeuft: AtomicBool::new(false),
        }
    }

    fn zustand_sperren(&self) -> std::sync::MutexGuard<'_, IonosphaerenZustand> {
        self.zustand.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_sperren(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), PaarEintrag>> {
        self.paar_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Momentaufnahme des Ionosphaeren-Zustands
    pub fn zustand(&self) -> IonosphaerenZustand {
        self.zustand_sperren().clone()
    }

    /// Aktuelle Epoche
    pub fn epoche(&self) -> u64 {
        self.zustand_sperren().epoche
    }

    /// Anzahl der Eintraege im Paar-Cache
    pub fn cache_groesse(&self) -> usize {
        self.cache_sperren().len()
    }

    // -----------------------------------------------------------------------
    // Zustands-Mutationen
    // -----------------------------------------------------------------------

    /// Setzt den Sonnenflussindex (geklemmt auf [60, 300])
    pub fn sfi_setzen(&self, sfi: u16) {
        let sfi = IonosphaerenZustand::sfi_klemmen(sfi);
        self.mutieren(|zustand| {
            if zustand.sfi == sfi {
                return false;
            }
            zustand.sfi = sfi;
            true
        });
    }

    /// Setzt den K-Index (geklemmt auf [0, 9])
    pub fn k_index_setzen(&self, k_index: u8) {
        let k_index = IonosphaerenZustand::k_index_klemmen(k_index);
        self.mutieren(|zustand| {
            if zustand.k_index == k_index {
                return false;
            }
            zustand.k_index = k_index;
            true
        });
    }

    /// Setzt die Jahreszeit und schaltet die Automatik ab
    pub fn jahreszeit_setzen(&self, jahreszeit: Jahreszeit) {
        self.mutieren(|zustand| {
            zustand.auto_jahreszeit = false;
            if zustand.jahreszeit == jahreszeit {
                return false;
            }
            zustand.jahreszeit = jahreszeit;
            true
        });
    }

    /// Schaltet die automatische Jahreszeit an oder ab
    pub fn auto_jahreszeit_setzen(&self, aktiv: bool, jetzt: DateTime<Utc>) {
        self.mutieren(|zustand| {
            zustand.auto_jahreszeit = aktiv;
            if !aktiv {
                return false;
            }
            let neue = Jahreszeit::aus_monat(jetzt.month());
            if zustand.jahreszeit == neue {
                return false;
            }
            zustand.jahreszeit = neue;
            true
        });
    }

    /// Spielt externe Sonnenwetter-Daten ein (SWPC, DXView)
    ///
    /// Der Abruf selbst liegt ausserhalb des Servers; hier landet nur
    /// das Ergebnis des Fetchers.
    pub fn externe_daten_einspielen(
        &self,
        quelle: &str,
        sfi: Option<u16>,
        k_index: Option<u8>,
    ) {
        let erfolg = sfi.is_some() || k_index.is_some();
        if let Some(sfi) = sfi {
            self.sfi_setzen(sfi);
        }
        if let Some(k) = k_index {
            self.k_index_setzen(k);
        }
        self.bus.veroeffentlichen(Ereignis::ExterneDatenAktualisiert {
            quelle: quelle.to_string(),
            erfolg,
        });
    }

    /// Gemeinsamer Mutations-Pfad: Epoche hoch, Cache leer, Ereignis raus
    fn mutieren(&self, aenderung: impl FnOnce(&mut IonosphaerenZustand) -> bool) {
        let ereignis = {
            let mut zustand = self.zustand_sperren();
            if !aenderung(&mut zustand) {
                return;
            }
            zustand.epoche += 1;
            self.cache_sperren().clear();
            Ereignis::AusbreitungAktualisiert {
                sfi: zustand.sfi,
                k_index: zustand.k_index,
                jahreszeit: zustand.jahreszeit as u8,
                epoche: zustand.epoche,
            }
        };
        // Benachrichtigen erst nach Freigabe beider Sperren
        self.bus.veroeffentlichen(ereignis);
    }

    /// Periodische Aktualisierung (Jahreszeit-Automatik + Cache-Neuaufbau)
    ///
    /// Re-entrant-sicher: laeuft bereits ein Tick, wird dieser Aufruf
    /// koalesziert (uebersprungen, nie eingereiht). Gibt `false`
    /// zurueck wenn uebersprungen wurde.
    pub fn aktualisieren(&self, jetzt: DateTime<Utc>) -> bool {
        if self
            .aktualisierung_laeuft
            .swap(true, Ordering::AcqRel)
        {
            tracing::debug!("Ausbreitungs-Tick uebersprungen (vorheriger laeuft noch)");
            return false;
        }

        let ereignis = {
            let mut zustand = self.zustand_sperren();
            if zustand.auto_jahreszeit {
                zustand.jahreszeit = Jahreszeit::aus_monat(jetzt.month());
            }
            zustand.epoche += 1;
            self.cache_sperren().clear();
            Ereignis::AusbreitungAktualisiert {
                sfi: zustand.sfi,
                k_index: zustand.k_index,
                jahreszeit: zustand.jahreszeit as u8,
                epoche: zustand.epoche,
            }
        };
        self.bus.veroeffentlichen(ereignis);

        self.aktualisierung_laeuft.store(false, Ordering::Release);
        true
    }

    // -----------------------------------------------------------------------
    // Signalstaerke
    // -----------------------------------------------------------------------

    /// Signalstaerke zwischen zwei Locators, [0, 1]
    ///
    /// Memoisiert pro ungeordnetem Paar unter der aktuellen Epoche;
    /// `lookup(a, b) == lookup(b, a)` gilt immer. Der RNG speist den
    /// stochastischen Faktor und wird pro Berechnung einmal gezogen.
    pub fn signalstaerke(
        &self,
        a: &Locator,
        b: &Locator,
        jetzt: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> f32 {
        let schluessel = Self::paar_schluessel(a, b);

        let epoche = self.zustand_sperren().epoche;
        if let Some(eintrag) = self.cache_sperren().get(&schluessel) {
            if eintrag.epoche == epoche {
                return eintrag.staerke;
            }
        }

        let distanz = distanz_km(a, b);

        let tag_a = sun::ist_tag(a, jetzt);
        let tag_b = sun::ist_tag(b, jetzt);

        // MUF fuer die Strecke; Aenderung wird gemeldet
        let (staerke, muf_geaendert, muf) = {
            let mut zustand = self.zustand_sperren();
            let muf = zustand.muf_fuer_distanz(distanz) as f32;
            let muf_geaendert = (zustand.muf - muf).abs() > f32::EPSILON;
            zustand.muf = muf;

            // 1. Distanzfaktor: umgekehrt proportional
            let distanzfaktor = 1.0 / (1.0 + distanz / 1000.0);

            // 2. Tageszeitfaktor
            let tageszeitfaktor = match (tag_a, tag_b) {
                (true, true) => 1.0,
                (false, false) => 0.8,
                _ => 0.5,
            };

            // 3. Sonnenaktivitaet
            let sonnenfaktor = (f64::from(zustand.sfi) / 200.0).clamp(0.1, 1.0);

            // 4. Geomagnetik (umgekehrt proportional zum K-Index)
            let geomagnetikfaktor =
                (1.0 - f64::from(zustand.k_index) / 9.0).clamp(0.1, 1.0);

            // 5. Jahreszeit
            let jahreszeitfaktor = match zustand.jahreszeit {
                Jahreszeit::Winter => 0.7,
                Jahreszeit::Fruehling => 0.9,
                Jahreszeit::Sommer => 1.0,
                Jahreszeit::Herbst => 0.8,
            };

            // 6. Stochastik (Sporadic-E, kurzzeitige Schwankungen)
            let zufallsfaktor = 0.8 + 0.2 * rng.gen::<f64>();

            let staerke = (distanzfaktor
                * tageszeitfaktor
                * sonnenfaktor
                * geomagnetikfaktor
                * jahreszeitfaktor
                * zufallsfaktor)
                .clamp(0.0, 1.0) as f32;

            (staerke, muf_geaendert, muf)
        };

        // Symmetrische Befuellung ueber den geordneten Schluessel.
        // Hat inzwischen eine Mutation die Epoche erhoeht, darf der
        // veraltete Wert den geleerten Cache nicht wieder befuellen.
        {
            let aktuelle_epoche = self.zustand_sperren().epoche;
            if aktuelle_epoche == epoche {
                self.cache_sperren()
                    .insert(schluessel, PaarEintrag { staerke, epoche });
            }
        }

        if muf_geaendert {
            self.bus.veroeffentlichen(Ereignis::MufGeaendert { muf });
        }
        self.bus.veroeffentlichen(Ereignis::SignalstaerkeGeaendert {
            grid_a: a.as_str().to_string(),
            grid_b: b.as_str().to_string(),
            staerke,
        });

        staerke
    }

    fn paar_schluessel(a: &Locator, b: &Locator) -> (String, String) {
        let (erster, zweiter) = if a.as_str() <= b.as_str() {
            (a, b)
        } else {
            (b, a)
        };
        (erster.as_str().to_string(), zweiter.as_str().to_string())
    }

    /// Prueft ob eine Signalstaerke fuer Kommunikation ausreicht
    pub fn kann_kommunizieren(staerke: f32) -> bool {
        staerke >= KOMMUNIKATIONS_SCHWELLE
    }

    /// Schwund-Effekte fuer eine Signalstaerke
    pub fn schwund(
        &self,
        staerke: f32,
        jetzt_ms: u64,
        rng: &mut impl Rng,
    ) -> SchwundEffekte {
        schwund_berechnen(staerke, jetzt_ms, rng)
    }

    /// Band-Empfehlung fuer eine Strecke unter dem aktuellen Zustand
    pub fn band_empfehlen(&self, distanz_km: f64) -> u16 {
        let muf = self.zustand_sperren().muf_fuer_distanz(distanz_km);
        band::band_empfehlen(distanz_km, muf)
    }

    /// Aktuell offene Baender
    pub fn offene_baender(&self) -> Vec<u16> {
        let zustand = self.zustand_sperren();
        band::offene_baender(zustand.sfi, zustand.k_index)
    }

    /// Paare offener Baender fuer die dynamischen Kanal-Links
    pub fn offene_band_paare(&self) -> Vec<(u16, u16)> {
        let baender = self.offene_baender();
        let mut paare = Vec::new();
        for (i, a) in baender.iter().enumerate() {
            for b in baender.iter().skip(i + 1) {
                paare.push((*a, *b));
            }
        }
        paare
    }

    /// Empfehlungs-Text fuer einen Benutzer-Locator
    pub fn empfehlungs_text(&self, locator: &Locator, jetzt: DateTime<Utc>) -> String {
        let tag = sun::ist_tag(locator, jetzt);
        let zustand = self.zustand_sperren();
        band::empfehlungs_text(locator.as_str(), tag, zustand.sfi, zustand.k_index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
