//! Datensaetze der Store-Schicht

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use kurzwelle_core::types::{ChannelId, UserId};

/// Registrierter Benutzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenutzerRecord {
    pub id: UserId,
    /// Eindeutiger Name; Lookup ist case-insensitiv
    pub name: String,
    /// Passwort-Verifier (Hash), None = nur Zertifikat
    pub passwort_verifier: Option<String>,
    /// Zertifikats-Hash (stark oder schwach)
    pub zert_hash: Option<String>,
    pub erstellt_am: DateTime<Utc>,
}

/// Persistierte ACL-Zeile eines Kanals
///
/// Genau eines von `user_id` und `gruppe` ist gesetzt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclZeile {
    pub kanal_id: ChannelId,
    pub user_id: Option<UserId>,
    pub gruppe: Option<String>,
    /// Erlaubte Berechtigungen (Bitmaske)
    pub erlauben: u32,
    /// Verweigerte Berechtigungen (Bitmaske)
    pub verweigern: u32,
    /// Gilt fuer den Kanal selbst
    pub hier_anwenden: bool,
    /// Gilt fuer Unterkanaele
    pub unterkanaele_anwenden: bool,
    /// Aus einem Elternkanal geerbt (nur Anzeige, nicht persistiert)
    pub geerbt: bool,
}

// ---------------------------------------------------------------------------
// Bans
// ---------------------------------------------------------------------------

/// Ban-Eintrag: Adresse mit Praefix, Name, Zertifikats-Hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanEintrag {
    pub adresse: IpAddr,
    /// Praefixlaenge der Adressmaske (0..=32 bzw. 0..=128)
    pub praefix: u8,
    pub name: String,
    pub zert_hash: String,
    pub grund: String,
    pub start: DateTime<Utc>,
    /// Dauer in Sekunden, 0 = permanent
    pub dauer_sek: u32,
}

impl BanEintrag {
    /// Prueft ob der Ban zum Zeitpunkt `jetzt` abgelaufen ist
    pub fn ist_abgelaufen(&self, jetzt: DateTime<Utc>) -> bool {
        if self.dauer_sek == 0 {
            return false;
        }
        jetzt >= self.start + Duration::seconds(i64::from(self.dauer_sek))
    }

    /// Verbleibende Ban-Dauer in Sekunden; None = permanent
    pub fn verbleibend_sek(&self, jetzt: DateTime<Utc>) -> Option<i64> {
        if self.dauer_sek == 0 {
            return None;
        }
        let ende = self.start + Duration::seconds(i64::from(self.dauer_sek));
        Some((ende - jetzt).num_seconds().max(0))
    }

    /// Prueft ob eine Adresse unter die Maske dieses Bans faellt
    pub fn adresse_passt(&self, adresse: IpAddr) -> bool {
        fn praefix_passt(a: &[u8], b: &[u8], praefix: u8) -> bool {
            let volle_bytes = usize::from(praefix / 8);
            let rest_bits = praefix % 8;
            if a[..volle_bytes] != b[..volle_bytes] {
                return false;
            }
            if rest_bits == 0 {
                return true;
            }
            let maske = 0xFFu8 << (8 - rest_bits);
            (a[volle_bytes] & maske) == (b[volle_bytes] & maske)
        }

        match (self.adresse, adresse) {
            (IpAddr::V4(eigene), IpAddr::V4(andere)) => {
                praefix_passt(&eigene.octets(), &andere.octets(), self.praefix.min(32))
            }
            (IpAddr::V6(eigene), IpAddr::V6(andere)) => {
                praefix_passt(&eigene.octets(), &andere.octets(), self.praefix.min(128))
            }
            _ => false,
        }
    }

    /// Prueft ob der Ban auf Adresse, Namen oder Hash zutrifft
    pub fn trifft_zu(
        &self,
        adresse: Option<IpAddr>,
        name: Option<&str>,
        zert_hash: Option<&str>,
        jetzt: DateTime<Utc>,
    ) -> bool {
        if self.ist_abgelaufen(jetzt) {
            return false;
        }
        if let Some(addr) = adresse {
            if self.adresse_passt(addr) {
                return true;
            }
        }
        if let Some(n) = name {
            if !self.name.is_empty() && self.name.eq_ignore_ascii_case(n) {
                return true;
            }
        }
        if let Some(h) = zert_hash {
            if !self.zert_hash.is_empty() && self.zert_hash == h {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban(adresse: &str, praefix: u8, dauer_sek: u32) -> BanEintrag {
        BanEintrag {
            adresse: adresse.parse().unwrap(),
            praefix,
            name: String::new(),
            zert_hash: String::new(),
            grund: "Test".into(),
            start: Utc::now(),
            dauer_sek,
        }
    }

    #[test]
    fn permanenter_ban_laeuft_nie_ab() {
        let b = ban("10.0.0.1", 32, 0);
        assert!(!b.ist_abgelaufen(Utc::now() + Duration::days(365 * 100)));
        assert!(b.verbleibend_sek(Utc::now()).is_none());
    }

    #[test]
    fn zeitlicher_ban_laeuft_ab() {
        let b = ban("10.0.0.1", 32, 60);
        assert!(!b.ist_abgelaufen(b.start + Duration::seconds(59)));
        assert!(b.ist_abgelaufen(b.start + Duration::seconds(60)));
    }

    #[test]
    fn adressmaske_v4() {
        let b = ban("192.168.1.0", 24, 0);
        assert!(b.adresse_passt("192.168.1.55".parse().unwrap()));
        assert!(!b.adresse_passt("192.168.2.55".parse().unwrap()));
    }

    #[test]
    fn adressmaske_teilbyte() {
        // /25 teilt das letzte Oktett: 0..127 passt, 128..255 nicht
        let b = ban("192.168.1.0", 25, 0);
        assert!(b.adresse_passt("192.168.1.127".parse().unwrap()));
        assert!(!b.adresse_passt("192.168.1.128".parse().unwrap()));
    }

    #[test]
    fn v4_ban_trifft_keine_v6_adresse() {
        let b = ban("10.0.0.0", 8, 0);
        assert!(!b.adresse_passt("::1".parse().unwrap()));
    }

    #[test]
    fn ban_nach_name_case_insensitiv() {
        let mut b = ban("10.0.0.1", 32, 0);
        b.name = "DL1ABC".into();
        assert!(b.trifft_zu(None, Some("dl1abc"), None, Utc::now()));
        assert!(!b.trifft_zu(None, Some("dl2xyz"), None, Utc::now()));
    }

    #[test]
    fn abgelaufener_ban_trifft_nicht() {
        let mut b = ban("10.0.0.1", 32, 1);
        b.name = "DL1ABC".into();
        let spaeter = b.start + Duration::seconds(2);
        assert!(!b.trifft_zu(Some("10.0.0.1".parse().unwrap()), None, None, spaeter));
    }
}
