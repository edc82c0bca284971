//! Krypto-Zustand fuer den Voice-Kanal
//!
//! Die eigentlichen Primitiven (AES-OCB o.ae.) sind hier nicht
//! implementiert -- der Record-Layer ist als Trait austauschbar.
//! Dieses Modul verwaltet den per CryptSetup ausgehandelten Zustand:
//! Schluessel, Sende- und Empfangs-Nonce sowie die Zaehler fuer
//! verworfene Pakete und Resyncs. Fehlgeschlagene Entschluesselung
//! fuehrt zum stillen Verwerfen des Pakets, nie zum Verbindungsabbruch.

use rand::RngCore;

/// Schluessellaenge in Bytes
pub const SCHLUESSEL_LAENGE: usize = 16;

/// Nonce-Laenge in Bytes
pub const NONCE_LAENGE: usize = 16;

/// Erzeugt einen zufaelligen Schluessel fuer CryptSetup
pub fn schluessel_erzeugen() -> Vec<u8> {
    let mut buf = vec![0u8; SCHLUESSEL_LAENGE];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Erzeugt eine zufaellige Start-Nonce fuer CryptSetup
pub fn nonce_erzeugen() -> Vec<u8> {
    let mut buf = vec![0u8; NONCE_LAENGE];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

// ---------------------------------------------------------------------------
// Record-Layer-Trait
// ---------------------------------------------------------------------------

/// Austauschbarer Record-Layer fuer Voice-Pakete
///
/// Implementierungen versiegeln ausgehende und oeffnen eingehende
/// Pakete. `oeffnen` gibt `None` zurueck wenn das Paket verworfen
/// werden muss (Replay, kaputte Nonce, Manipulation).
pub trait RecordLayer: Send {
    /// Versiegelt ein ausgehendes Paket
    fn versiegeln(&mut self, klartext: &[u8]) -> Vec<u8>;

    /// Oeffnet ein eingehendes Paket; `None` = still verwerfen
    fn oeffnen(&mut self, paket: &[u8]) -> Option<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// CryptZustand
// ---------------------------------------------------------------------------

/// Per-Session Krypto-Zustand mit Nonce- und Fehlerbuchhaltung
#[derive(Debug, Clone)]
pub struct CryptZustand {
    /// Ausgehandelter Schluessel
    pub schluessel: Vec<u8>,
    /// Naechste Sende-Nonce (monoton)
    pub sende_nonce: u64,
    /// Hoechste gesehene Empfangs-Nonce
    pub empfangs_nonce: u64,
    /// Erfolgreich geoeffnete Pakete
    pub gut: u64,
    /// Still verworfene Pakete
    pub verworfen: u64,
    /// Durchgefuehrte Resyncs
    pub resyncs: u64,
}

impl CryptZustand {
    /// Erstellt einen neuen Zustand mit frischem Schluessel
    pub fn neu() -> Self {
        Self {
            schluessel: schluessel_erzeugen(),
            sende_nonce: 0,
            empfangs_nonce: 0,
            gut: 0,
            verworfen: 0,
            resyncs: 0,
        }
    }

    /// Vergibt die naechste Sende-Nonce
    pub fn naechste_sende_nonce(&mut self) -> u64 {
        let nonce = self.sende_nonce;
        self.sende_nonce += 1;
        nonce
    }

    /// Prueft eine eingehende Nonce
    ///
    /// Akzeptiert streng monoton steigende Werte. Ein Rueckschritt
    /// bedeutet Replay oder Desynchronisation: das Paket wird
    /// verworfen und gezaehlt.
    pub fn eingang_pruefen(&mut self, nonce: u64) -> bool {
        if nonce >= self.empfangs_nonce {
            self.empfangs_nonce = nonce + 1;
            self.gut += 1;
            true
        } else {
            self.verworfen += 1;
            false
        }
    }

    /// Setzt die Empfangsseite nach einem CryptSetup-Resync zurueck
    pub fn resync(&mut self, neue_nonce: u64) {
        self.empfangs_nonce = neue_nonce;
        self.resyncs += 1;
    }

    /// Verhaeltnis verworfener zu allen gesehenen Paketen
    pub fn verlustrate(&self) -> f64 {
        let gesamt = self.gut + self.verworfen;
        if gesamt == 0 {
            0.0
        } else {
            self.verworfen as f64 / gesamt as f64
        }
    }
}

impl Default for CryptZustand {
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schluessel_und_nonce_laengen() {
        assert_eq!(schluessel_erzeugen().len(), SCHLUESSEL_LAENGE);
        assert_eq!(nonce_erzeugen().len(), NONCE_LAENGE);
    }

    #[test]
    fn sende_nonce_monoton() {
        let mut z = CryptZustand::neu();
        assert_eq!(z.naechste_sende_nonce(), 0);
        assert_eq!(z.naechste_sende_nonce(), 1);
        assert_eq!(z.naechste_sende_nonce(), 2);
    }

    #[test]
    fn eingang_akzeptiert_monoton() {
        let mut z = CryptZustand::neu();
        assert!(z.eingang_pruefen(0));
        assert!(z.eingang_pruefen(1));
        // Sprung nach vorne ist ok (verlorene Pakete)
        assert!(z.eingang_pruefen(10));
        assert_eq!(z.gut, 3);
    }

    #[test]
    fn eingang_verwirft_replay() {
        let mut z = CryptZustand::neu();
        assert!(z.eingang_pruefen(5));
        // Rueckschritt: still verwerfen
        assert!(!z.eingang_pruefen(3));
        assert_eq!(z.verworfen, 1);
        assert_eq!(z.gut, 1);
    }

    #[test]
    fn resync_setzt_empfang_zurueck() {
        let mut z = CryptZustand::neu();
        assert!(z.eingang_pruefen(100));
        assert!(!z.eingang_pruefen(0));

        z.resync(0);
        assert_eq!(z.resyncs, 1);
        assert!(z.eingang_pruefen(0));
    }

    #[test]
    fn verlustrate_berechnung() {
        let mut z = CryptZustand::neu();
        assert_eq!(z.verlustrate(), 0.0);
        z.eingang_pruefen(10);
        z.eingang_pruefen(5);
        assert!((z.verlustrate() - 0.5).abs() < f64::EPSILON);
    }
}
