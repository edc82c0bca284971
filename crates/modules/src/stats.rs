//! Benutzer-Statistik-Modul
//!
//! Clients laden CSV-Dateien mit Lernstatistiken hoch; das Modul legt
//! sie unter `<state-dir>/user-stats/<benutzername>/<datei>` ab.
//!
//! ## Dateiformat
//!
//! UTF-8-CSV. Die Kopfzeile muss (case-insensitiv) die Tokens
//! `username`, `characters learned`, `time per character`,
//! `features unlocked` und `emailadress` enthalten. In jeder Datenzeile
//! muss die Anzahl der whitespace-getrennten Tokens im Feld
//! "characters learned" der Anzahl im Feld "time per character"
//! entsprechen. Beim Schreiben werden Zeit-Tokens aufgefuellt bzw.
//! gekuerzt bis beide Felder gleich lang sind.

use std::fs;
use std::path::{Path, PathBuf};

use kurzwelle_core::{KurzwelleError, Result};

use crate::bus::Ereignis;
use crate::manager::ServerModul;

/// Pflicht-Tokens der CSV-Kopfzeile
const PFLICHT_HEADER: [&str; 5] = [
    "username",
    "characters learned",
    "time per character",
    "features unlocked",
    "emailadress",
];

/// Verwaltung der Benutzer-Statistikdateien
pub struct UserStatistikModul {
    verzeichnis: PathBuf,
}

impl UserStatistikModul {
    /// Erstellt das Modul mit dem Statistik-Wurzelverzeichnis
    pub fn neu(verzeichnis: impl Into<PathBuf>) -> Self {
        Self {
            verzeichnis: verzeichnis.into(),
        }
    }

    /// Statistik-Wurzelverzeichnis
    pub fn verzeichnis(&self) -> &Path {
        &self.verzeichnis
    }

    fn benutzer_verzeichnis(&self, benutzer: &str) -> PathBuf {
        self.verzeichnis.join(benutzer)
    }

    fn name_pruefen(name: &str, art: &str) -> Result<()> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(KurzwelleError::Validierung(format!(
                "Unzulaessiger {art}: {name:?}"
            )));
        }
        Ok(())
    }

    /// Validiert und speichert eine hochgeladene Statistikdatei
    ///
    /// # Fehler
    /// - `Validierung` bei kaputtem CSV-Inhalt oder unzulaessigen Namen
    /// - `Speicher` wenn das Verzeichnis nicht beschreibbar ist
    pub fn datei_verarbeiten(
        &self,
        benutzer: &str,
        dateiname: &str,
        daten: &[u8],
    ) -> Result<()> {
        Self::name_pruefen(benutzer, "Benutzername")?;
        Self::name_pruefen(dateiname, "Dateiname")?;
        Self::validieren(daten)?;

        let normalisiert = Self::normalisieren(daten)?;

        let benutzer_dir = self.benutzer_verzeichnis(benutzer);
        fs::create_dir_all(&benutzer_dir)
            .map_err(|e| KurzwelleError::Speicher(format!("Statistik-Verzeichnis: {e}")))?;

        let pfad = benutzer_dir.join(dateiname);
        fs::write(&pfad, normalisiert)
            .map_err(|e| KurzwelleError::Speicher(format!("Statistik-Datei: {e}")))?;

        tracing::debug!(benutzer, datei = dateiname, "Statistikdatei gespeichert");
        Ok(())
    }

    /// Prueft ob fuer einen Benutzer Statistikdateien vorliegen
    pub fn hat_statistiken(&self, benutzer: &str) -> bool {
        !self.statistik_dateien(benutzer).is_empty()
    }

    /// Listet die Statistikdateien eines Benutzers
    pub fn statistik_dateien(&self, benutzer: &str) -> Vec<String> {
        let dir = self.benutzer_verzeichnis(benutzer);
        let Ok(eintraege) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut dateien: Vec<String> = eintraege
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        dateien.sort();
        dateien
    }

    /// Validiert den CSV-Inhalt gegen den Header- und Zeilen-Vertrag
    pub fn validieren(daten: &[u8]) -> Result<()> {
        let inhalt = std::str::from_utf8(daten)
            .map_err(|_| KurzwelleError::Validierung("Statistikdatei ist kein UTF-8".into()))?;
        let zeilen: Vec<&str> = inhalt.lines().filter(|z| !z.trim().is_empty()).collect();

        let Some(header) = zeilen.first() else {
            return Err(KurzwelleError::Validierung("Leere Statistikdatei".into()));
        };

        let header_klein = header.to_lowercase();
        for pflicht in PFLICHT_HEADER {
            if !header_klein.contains(pflicht) {
                return Err(KurzwelleError::Validierung(format!(
                    "Kopfzeile ohne Pflicht-Token {pflicht:?}"
                )));
            }
        }

        for (nr, zeile) in zeilen.iter().enumerate().skip(1) {
            let felder: Vec<&str> = zeile.split(',').collect();
            if felder.len() < 5 {
                return Err(KurzwelleError::Validierung(format!(
                    "Zeile {} hat {} Felder (mindestens 5 erwartet)",
                    nr + 1,
                    felder.len()
                )));
            }

            let zeichen: Vec<&str> = felder[1].split_whitespace().collect();
            let zeiten: Vec<&str> = felder[2].split_whitespace().collect();
            if !zeichen.is_empty() && zeichen.len() != zeiten.len() {
                return Err(KurzwelleError::Validierung(format!(
                    "Zeile {}: {} Zeichen aber {} Zeitwerte",
                    nr + 1,
                    zeichen.len(),
                    zeiten.len()
                )));
            }
        }

        Ok(())
    }

    /// Normalisiert Datenzeilen: Zeit-Tokens auffuellen/kuerzen,
    /// fehlende Felder ergaenzen
    fn normalisieren(daten: &[u8]) -> Result<String> {
        let inhalt = std::str::from_utf8(daten)
            .map_err(|_| KurzwelleError::Validierung("Statistikdatei ist kein UTF-8".into()))?;
        let zeilen: Vec<&str> = inhalt.lines().filter(|z| !z.trim().is_empty()).collect();

        let mut ergebnis: Vec<String> = Vec::with_capacity(zeilen.len());
        // Kopfzeile unveraendert uebernehmen
        if let Some(header) = zeilen.first() {
            ergebnis.push((*header).to_string());
        }

        for zeile in zeilen.iter().skip(1) {
            let mut felder: Vec<String> = zeile.split(',').map(String::from).collect();
            while felder.len() < 5 {
                felder.push(String::new());
            }

            let zeichen: Vec<String> = felder[1].split_whitespace().map(String::from).collect();
            let mut zeiten: Vec<String> = felder[2].split_whitespace().map(String::from).collect();

            if !zeichen.is_empty() {
                while zeiten.len() < zeichen.len() {
                    zeiten.push("0".to_string());
                }
                zeiten.truncate(zeichen.len());
                felder[1] = zeichen.join(" ");
                felder[2] = zeiten.join(" ");
            }

            ergebnis.push(felder.join(","));
        }

        Ok(ergebnis.join("\n"))
    }
}

impl ServerModul for UserStatistikModul {
    fn name(&self) -> &str {
        "UserStatistik"
    }

    fn beschreibung(&self) -> &str {
        "Sammlung und Ablage der Benutzer-Lernstatistiken"
    }

    fn initialisieren(&self) -> Result<()> {
        fs::create_dir_all(&self.verzeichnis)
            .map_err(|e| KurzwelleError::Speicher(format!("Statistik-Verzeichnis: {e}")))?;
        tracing::info!(verzeichnis = %self.verzeichnis.display(), "Statistik-Modul initialisiert");
        Ok(())
    }

    fn ereignis(&self, ereignis: &Ereignis) {
        // Deregistrierte Benutzer behalten ihre abgelegten Dateien;
        // das Modul reagiert nur informativ.
        if let Ereignis::BenutzerDeregistriert { user_id } = ereignis {
            tracing::debug!(user_id = %user_id, "Benutzer deregistriert, Statistikdateien bleiben erhalten");
        }
    }
}

/// Standard-Statistikverzeichnis relativ zum State-Verzeichnis
pub fn standard_verzeichnis(state_dir: &Path) -> PathBuf {
    state_dir.join("user-stats")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
