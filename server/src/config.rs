//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist. Die Sektionen `[channels]`, `[channel_links]`,
//! `[channel_description]`, `[acl]` und `[hf_propagation]` richten
//! Bandplan, Links, Berechtigungen und das Ausbreitungsmodell ein.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use kurzwelle_channels::Berechtigung;
use kurzwelle_core::types::ChannelId;
use kurzwelle_core::{KurzwelleError, Result};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerKonfiguration {
    /// Pfad/URL des persistenten Stores
    pub database: String,
    /// Maximale gleichzeitige Sessions
    pub users: u32,
    /// TCP-Listen-Port; UDP wird auf denselben Port gebunden
    pub port: u16,
    /// Bind-Adresse; leer = alle Interfaces
    pub host: String,
    /// Bitraten-Obergrenze pro Benutzer in bit/s
    pub bandwidth: u32,
    /// Idle-Sekunden bis zum Verbindungsabbau
    pub timeout: u64,
    /// Nachricht im ServerSync
    pub welcometext: String,
    /// Unbekannte Namen als Selbstregistrierung annehmen
    pub autoregister: bool,

    /// Kanal-ID -> Name
    pub channels: HashMap<String, String>,
    /// Kanal-ID -> Beschreibung
    pub channel_description: HashMap<String, String>,
    /// Kanal-ID -> kommagetrennte Liste gelinkter IDs (bidirektional)
    pub channel_links: HashMap<String, String>,
    /// Metadaten-Feld -> Typ (text, bool, select:...)
    pub metadata_fields: HashMap<String, String>,
    /// Kanal-ID -> ACL-Zeilen (`<principal>:±perm,...`; mehrere mit ';')
    pub acl: HashMap<String, String>,

    pub hf_propagation: HfPropagationKonfiguration,
}

impl Default for ServerKonfiguration {
    fn default() -> Self {
        Self {
            database: "kurzwelle.db".into(),
            users: 100,
            port: 64738,
            host: String::new(),
            bandwidth: 72_000,
            timeout: 30,
            welcometext: String::new(),
            autoregister: true,
            channels: HashMap::new(),
            channel_description: HashMap::new(),
            channel_links: HashMap::new(),
            metadata_fields: HashMap::new(),
            acl: HashMap::new(),
            hf_propagation: HfPropagationKonfiguration::default(),
        }
    }
}

/// Einstellungen des Ausbreitungsmodells
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HfPropagationKonfiguration {
    pub enabled: bool,
    pub use_external_data: bool,
    pub use_dxview_data: bool,
    pub use_swpc_data: bool,
    /// Sonnenflussindex (60-300)
    pub solar_flux_index: u16,
    /// K-Index (0-9)
    pub k_index: u8,
    /// Jahreszeit automatisch aus dem Datum ableiten
    pub auto_season: bool,
    /// Jahreszeit (0=Winter .. 3=Herbst) wenn nicht automatisch
    pub season: u8,
    /// Aktualisierungs-Intervall in Minuten
    pub update_interval: u64,
}

impl Default for HfPropagationKonfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            use_external_data: false,
            use_dxview_data: false,
            use_swpc_data: false,
            solar_flux_index: 120,
            k_index: 3,
            auto_season: true,
            season: 0,
            update_interval: 30,
        }
    }
}

impl ServerKonfiguration {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt).map_err(|e| {
                KurzwelleError::Konfiguration(format!("Konfigurationsfehler in '{pfad}': {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(KurzwelleError::Konfiguration(format!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            ))),
        }
    }

    /// Vollstaendige Bind-Adresse fuer TCP und UDP
    pub fn bind_adresse(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }

    /// Geparste Kanal-Definitionen, nach ID sortiert
    pub fn kanaele_parsen(&self) -> Result<Vec<(ChannelId, String)>> {
        let mut kanaele = Vec::with_capacity(self.channels.len());
        for (id, name) in &self.channels {
            let id: u32 = id.parse().map_err(|_| {
                KurzwelleError::Konfiguration(format!("Ungueltige Kanal-ID: {id:?}"))
            })?;
            kanaele.push((ChannelId(id), name.clone()));
        }
        kanaele.sort_by_key(|(id, _)| *id);
        Ok(kanaele)
    }

    /// Geparste Link-Paare (bidirektional)
    pub fn links_parsen(&self) -> Result<Vec<(ChannelId, ChannelId)>> {
        let mut paare = Vec::new();
        for (id, liste) in &self.channel_links {
            let von: u32 = id.parse().map_err(|_| {
                KurzwelleError::Konfiguration(format!("Ungueltige Kanal-ID: {id:?}"))
            })?;
            for ziel in liste.split(',').map(str::trim).filter(|z| !z.is_empty()) {
                let nach: u32 = ziel.parse().map_err(|_| {
                    KurzwelleError::Konfiguration(format!("Ungueltige Link-ID: {ziel:?}"))
                })?;
                paare.push((ChannelId(von), ChannelId(nach)));
            }
        }
        Ok(paare)
    }

    /// Geparste ACL-Zeilen
    pub fn acl_parsen(&self) -> Result<Vec<GeparsteAclZeile>> {
        let mut zeilen = Vec::new();
        for (id, wert) in &self.acl {
            let kanal: u32 = id.parse().map_err(|_| {
                KurzwelleError::Konfiguration(format!("Ungueltige Kanal-ID: {id:?}"))
            })?;
            for eintrag in wert.split(';').map(str::trim).filter(|e| !e.is_empty()) {
                zeilen.push(acl_eintrag_parsen(ChannelId(kanal), eintrag)?);
            }
        }
        Ok(zeilen)
    }
}

// ---------------------------------------------------------------------------
// ACL-Parsing
// ---------------------------------------------------------------------------

/// Prinzipal einer konfigurierten ACL-Zeile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prinzipal {
    /// Gruppenname (`@all`, `@admin`, `@moderator`, `~<gruppe>`)
    Gruppe(String),
    /// Benutzername (`#<name>`); wird beim Start aufgeloest
    Benutzer(String),
}

/// Eine geparste ACL-Konfigurationszeile
#[derive(Debug, Clone, PartialEq)]
pub struct GeparsteAclZeile {
    pub kanal: ChannelId,
    pub prinzipal: Prinzipal,
    pub erlauben: u32,
    pub verweigern: u32,
}

fn acl_eintrag_parsen(kanal: ChannelId, eintrag: &str) -> Result<GeparsteAclZeile> {
    let (prinzipal_roh, berechtigungen) = eintrag.split_once(':').ok_or_else(|| {
        KurzwelleError::Konfiguration(format!("ACL-Eintrag ohne ':': {eintrag:?}"))
    })?;

    let prinzipal = match prinzipal_roh.trim() {
        "@all" => Prinzipal::Gruppe("all".into()),
        "@admin" => Prinzipal::Gruppe("admin".into()),
        "@moderator" => Prinzipal::Gruppe("moderator".into()),
        rest if rest.starts_with('~') => Prinzipal::Gruppe(rest[1..].to_string()),
        rest if rest.starts_with('#') => Prinzipal::Benutzer(rest[1..].to_string()),
        andere => {
            return Err(KurzwelleError::Konfiguration(format!(
                "Unbekannter ACL-Prinzipal: {andere:?}"
            )))
        }
    };

    let mut erlauben = 0u32;
    let mut verweigern = 0u32;
    for teil in berechtigungen.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        // strip_prefix statt Byte-Index: ein Unicode-Vorzeichen (z.B.
        // ein kopiertes U+2212) ist ein Konfigurationsfehler, kein Panic
        let (name, erlaubt) = if let Some(rest) = teil.strip_prefix('+') {
            (rest, true)
        } else if let Some(rest) = teil.strip_prefix('-') {
            (rest, false)
        } else {
            return Err(KurzwelleError::Konfiguration(format!(
                "Berechtigung ohne Vorzeichen: {teil:?}"
            )));
        };
        let bit = berechtigung_aus_name(name).ok_or_else(|| {
            KurzwelleError::Konfiguration(format!("Unbekannte Berechtigung: {name:?}"))
        })?;
        if erlaubt {
            erlauben |= bit;
        } else {
            verweigern |= bit;
        }
    }

    Ok(GeparsteAclZeile {
        kanal,
        prinzipal,
        erlauben,
        verweigern,
    })
}

/// Abbildung der Berechtigungs-Namen auf die Bitmasken
fn berechtigung_aus_name(name: &str) -> Option<u32> {
    Some(match name.to_ascii_lowercase().as_str() {
        "write" => Berechtigung::SCHREIBEN,
        "traverse" => Berechtigung::DURCHQUEREN,
        "enter" => Berechtigung::BETRETEN,
        "speak" => Berechtigung::SPRECHEN,
        "mutedeafen" => Berechtigung::MUTE_DEAF,
        "move" => Berechtigung::VERSCHIEBEN,
        "makechannel" => Berechtigung::KANAL_ANLEGEN,
        "linkchannel" => Berechtigung::KANAL_LINKEN,
        "whisper" => Berechtigung::FLUESTERN,
        "textmessage" => Berechtigung::TEXTNACHRICHT,
        "maketempchannel" => Berechtigung::TEMP_KANAL_ANLEGEN,
        "listen" => Berechtigung::MITHOEREN,
        "setgridlocator" => Berechtigung::GRID_LOCATOR_SETZEN,
        "modifybandplan" => Berechtigung::BANDPLAN_AENDERN,
        "configurepropagation" => Berechtigung::AUSBREITUNG_KONFIGURIEREN,
        "all" => Berechtigung::ALLE,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_konfiguration() {
        let cfg = ServerKonfiguration::default();
        assert_eq!(cfg.users, 100);
        assert_eq!(cfg.port, 64738);
        assert_eq!(cfg.bandwidth, 72_000);
        assert_eq!(cfg.timeout, 30);
        assert!(cfg.autoregister);
        assert_eq!(cfg.hf_propagation.solar_flux_index, 120);
        assert_eq!(cfg.hf_propagation.k_index, 3);
        assert_eq!(cfg.hf_propagation.update_interval, 30);
        assert!(cfg.hf_propagation.auto_season);
    }

    #[test]
    fn bind_adresse_leer_und_gesetzt() {
        let mut cfg = ServerKonfiguration::default();
        assert_eq!(cfg.bind_adresse(), "0.0.0.0:64738");
        cfg.host = "10.0.0.5".into();
        cfg.port = 9000;
        assert_eq!(cfg.bind_adresse(), "10.0.0.5:9000");
    }

    #[test]
    fn konfiguration_aus_toml() {
        let toml = r#"
            users = 50
            welcometext = "73 de Kurzwelle"

            [channels]
            20 = "20m"
            40 = "40m"

            [channel_links]
            20 = "40"

            [hf_propagation]
            solar_flux_index = 180
            auto_season = false
            season = 2
        "#;
        let cfg: ServerKonfiguration = toml::from_str(toml).unwrap();
        assert_eq!(cfg.users, 50);
        assert_eq!(cfg.welcometext, "73 de Kurzwelle");
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.port, 64738);
        assert_eq!(cfg.hf_propagation.solar_flux_index, 180);
        assert!(!cfg.hf_propagation.auto_season);
        assert_eq!(cfg.hf_propagation.season, 2);

        let kanaele = cfg.kanaele_parsen().unwrap();
        assert_eq!(
            kanaele,
            vec![
                (ChannelId(20), "20m".to_string()),
                (ChannelId(40), "40m".to_string())
            ]
        );
        assert_eq!(cfg.links_parsen().unwrap(), vec![(ChannelId(20), ChannelId(40))]);
    }

    #[test]
    fn kanal_links_mehrere_ziele() {
        let mut cfg = ServerKonfiguration::default();
        cfg.channel_links.insert("40".into(), "80, 160".into());
        let mut paare = cfg.links_parsen().unwrap();
        paare.sort();
        assert_eq!(
            paare,
            vec![(ChannelId(40), ChannelId(80)), (ChannelId(40), ChannelId(160))]
        );
    }

    #[test]
    fn ungueltige_kanal_id_ist_fehler() {
        let mut cfg = ServerKonfiguration::default();
        cfg.channels.insert("zwanzig".into(), "20m".into());
        assert!(cfg.kanaele_parsen().is_err());
    }

    #[test]
    fn acl_parsen_gruppen_und_benutzer() {
        let mut cfg = ServerKonfiguration::default();
        cfg.acl.insert(
            "40".into(),
            "@all:+speak,-whisper; #DL1ABC:+configurepropagation".into(),
        );

        let zeilen = cfg.acl_parsen().unwrap();
        assert_eq!(zeilen.len(), 2);

        let alle = &zeilen[0];
        assert_eq!(alle.prinzipal, Prinzipal::Gruppe("all".into()));
        assert_eq!(alle.erlauben, Berechtigung::SPRECHEN);
        assert_eq!(alle.verweigern, Berechtigung::FLUESTERN);

        let benutzer = &zeilen[1];
        assert_eq!(benutzer.prinzipal, Prinzipal::Benutzer("DL1ABC".into()));
        assert_eq!(benutzer.erlauben, Berechtigung::AUSBREITUNG_KONFIGURIEREN);
    }

    #[test]
    fn acl_tilde_gruppe() {
        let mut cfg = ServerKonfiguration::default();
        cfg.acl.insert("0".into(), "~cw-runde:+whisper".into());
        let zeilen = cfg.acl_parsen().unwrap();
        assert_eq!(zeilen[0].prinzipal, Prinzipal::Gruppe("cw-runde".into()));
    }

    #[test]
    fn acl_kaputte_eintraege() {
        let mut cfg = ServerKonfiguration::default();
        cfg.acl.insert("0".into(), "ohne-doppelpunkt".into());
        assert!(cfg.acl_parsen().is_err());

        cfg.acl.insert("0".into(), "@all:speak".into());
        assert!(cfg.acl_parsen().is_err());

        cfg.acl.insert("0".into(), "@all:+fliegen".into());
        assert!(cfg.acl_parsen().is_err());
    }

    #[test]
    fn acl_unicode_vorzeichen_sauber_abgelehnt() {
        // Kopierte Sonderzeichen (U+2212, U+00B1) statt ASCII-Vorzeichen
        // muessen einen Konfigurationsfehler geben, keinen Panic
        let mut cfg = ServerKonfiguration::default();
        cfg.acl.insert("0".into(), "@all:\u{2212}speak".into());
        assert!(matches!(
            cfg.acl_parsen(),
            Err(KurzwelleError::Konfiguration(_))
        ));

        cfg.acl.insert("0".into(), "@all:\u{b1}whisper".into());
        assert!(matches!(
            cfg.acl_parsen(),
            Err(KurzwelleError::Konfiguration(_))
        ));
    }

    #[test]
    fn metadata_fields_werden_uebernommen() {
        let toml = r#"
            [metadata_fields]
            maidenheadgrid = "text"
            listening_only = "bool"
            antenna = "select:Dipol,Yagi,Vertikal"
        "#;
        let cfg: ServerKonfiguration = toml::from_str(toml).unwrap();
        assert_eq!(cfg.metadata_fields.len(), 3);
        assert_eq!(cfg.metadata_fields["maidenheadgrid"], "text");
    }
}
