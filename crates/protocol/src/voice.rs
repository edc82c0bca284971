//! Voice-Protokoll (UDP)
//!
//! Definiert die binaere Paketstruktur fuer die Audio-Uebertragung via UDP
//! (oder getunnelt ueber UDPTunnel). Das Opus-Encoding erfolgt im Client;
//! der Server leitet Pakete weiter und dekodiert die Nutzdaten nicht.
//!
//! ## Paketformat (kein serde, performance-kritisch)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Erstes Byte: ttttt fff (5-Bit-Ziel, 3-Bit-Typ)
//!  1       4   Sequenznummer (big-endian) -- nur Audio-Pakete
//!  5+      N   Codec-Nutzdaten (opak)
//! ```
//!
//! Ping-Pakete tragen statt Sequenz und Nutzdaten einen 8-Byte-Zeitstempel.

use std::io;

/// Maximale Voice-Paketlaenge: 2 KiB
pub const MAX_VOICE_PAKET_GROESSE: usize = 2 * 1024;

/// Ziel-Wert fuer normale Kanal-Sprache
pub const ZIEL_NORMAL: u8 = 0;

/// Ziel-Wert fuer Server-Loopback
pub const ZIEL_LOOPBACK: u8 = 31;

// ---------------------------------------------------------------------------
// VoiceTyp
// ---------------------------------------------------------------------------

/// 3-Bit-Typ im ersten Byte eines Voice-Pakets
///
/// Andere Werte werden kommentarlos verworfen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceTyp {
    /// Altes CELT-Format
    Legacy = 0,
    /// UDP-Ping (Latenzmessung + Adress-Bindung)
    Ping = 1,
    /// Opus-Frames
    Opus = 4,
}

impl VoiceTyp {
    /// Konvertiert die unteren 3 Bits eines Bytes in einen `VoiceTyp`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte & 0x07 {
            0 => Some(Self::Legacy),
            1 => Some(Self::Ping),
            4 => Some(Self::Opus),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ziel
// ---------------------------------------------------------------------------

/// Interpretiertes 5-Bit-Ziel eines Voice-Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZielTyp {
    /// 0: normale Sprache in den aktuellen Kanal
    Kanal,
    /// 1..=30: Fluester-Slot
    Fluester(u8),
    /// 31: Server-Loopback (Echo an den Absender)
    Loopback,
}

impl ZielTyp {
    /// Interpretiert den rohen 5-Bit-Zielwert
    pub fn from_raw(ziel: u8) -> Self {
        match ziel {
            ZIEL_NORMAL => Self::Kanal,
            ZIEL_LOOPBACK => Self::Loopback,
            slot => Self::Fluester(slot),
        }
    }

    /// Gibt den rohen 5-Bit-Wert zurueck
    pub fn raw(&self) -> u8 {
        match self {
            Self::Kanal => ZIEL_NORMAL,
            Self::Fluester(slot) => *slot,
            Self::Loopback => ZIEL_LOOPBACK,
        }
    }
}

// ---------------------------------------------------------------------------
// VoicePaketKopf
// ---------------------------------------------------------------------------

/// Erstes Byte eines Voice-Pakets: 5-Bit-Ziel + 3-Bit-Typ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePaketKopf {
    pub typ: VoiceTyp,
    pub ziel: u8,
}

impl VoicePaketKopf {
    /// Erstellt einen neuen Kopf; das Ziel wird auf 5 Bits maskiert
    pub fn neu(typ: VoiceTyp, ziel: u8) -> Self {
        Self {
            typ,
            ziel: ziel & 0x1F,
        }
    }

    /// Serialisiert den Kopf als erstes Byte
    pub fn encode(&self) -> u8 {
        (self.ziel << 3) | (self.typ as u8)
    }

    /// Dekodiert das erste Byte; `None` bei unbekanntem Typ
    pub fn decode(byte: u8) -> Option<Self> {
        let typ = VoiceTyp::from_u8(byte)?;
        Some(Self {
            typ,
            ziel: byte >> 3,
        })
    }

    /// Interpretiertes Ziel
    pub fn ziel_typ(&self) -> ZielTyp {
        ZielTyp::from_raw(self.ziel)
    }
}

// ---------------------------------------------------------------------------
// VoicePaket
// ---------------------------------------------------------------------------

/// Vollstaendiges Voice-Paket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoicePaket {
    /// UDP-Ping: Zeitstempel wird vom Server gespiegelt
    Ping { zeitstempel_ms: u64 },
    /// Audio-Frame (Legacy oder Opus); Nutzdaten bleiben opak
    Audio {
        kopf: VoicePaketKopf,
        /// Monoton steigende Sequenznummer des Sprechers
        sequenz: u32,
        nutzdaten: Vec<u8>,
    },
}

impl VoicePaket {
    /// Erstellt ein Opus-Audio-Paket
    pub fn neu_opus(ziel: u8, sequenz: u32, nutzdaten: Vec<u8>) -> Self {
        Self::Audio {
            kopf: VoicePaketKopf::neu(VoiceTyp::Opus, ziel),
            sequenz,
            nutzdaten,
        }
    }

    /// Erstellt ein Ping-Paket
    pub fn neu_ping(zeitstempel_ms: u64) -> Self {
        Self::Ping { zeitstempel_ms }
    }

    /// Serialisiert das gesamte Paket in einen Byte-Vec
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ping { zeitstempel_ms } => {
                let mut buf = Vec::with_capacity(9);
                buf.push(VoicePaketKopf::neu(VoiceTyp::Ping, 0).encode());
                buf.extend_from_slice(&zeitstempel_ms.to_be_bytes());
                buf
            }
            Self::Audio {
                kopf,
                sequenz,
                nutzdaten,
            } => {
                let mut buf = Vec::with_capacity(5 + nutzdaten.len());
                buf.push(kopf.encode());
                buf.extend_from_slice(&sequenz.to_be_bytes());
                buf.extend_from_slice(nutzdaten);
                buf
            }
        }
    }

    /// Deserialisiert ein Paket aus einem Byte-Slice und validiert es
    ///
    /// # Fehler
    /// - `InvalidData` bei unbekanntem Typ, zu kurzem oder zu langem Paket
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Leeres Voice-Paket",
            ));
        }
        if buf.len() > MAX_VOICE_PAKET_GROESSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Voice-Paket zu lang: {} Bytes (Maximum {})",
                    buf.len(),
                    MAX_VOICE_PAKET_GROESSE
                ),
            ));
        }

        let kopf = VoicePaketKopf::decode(buf[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unbekannter Voice-Typ in Byte {:#04x}", buf[0]),
            )
        })?;

        match kopf.typ {
            VoiceTyp::Ping => {
                if buf.len() < 9 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Ping-Paket zu kurz",
                    ));
                }
                let zeitstempel_ms = u64::from_be_bytes([
                    buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8],
                ]);
                Ok(Self::Ping { zeitstempel_ms })
            }
            VoiceTyp::Legacy | VoiceTyp::Opus => {
                if buf.len() < 5 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Audio-Paket zu kurz fuer Sequenznummer",
                    ));
                }
                let sequenz = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
                Ok(Self::Audio {
                    kopf,
                    sequenz,
                    nutzdaten: buf[5..].to_vec(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kopf_encode_decode_round_trip() {
        for ziel in 0u8..=31 {
            let kopf = VoicePaketKopf::neu(VoiceTyp::Opus, ziel);
            let decoded = VoicePaketKopf::decode(kopf.encode()).expect("Kopf muss dekodierbar sein");
            assert_eq!(kopf, decoded);
        }
    }

    #[test]
    fn kopf_bit_layout() {
        // Ziel 5 (Fluester-Slot), Typ Opus (4): 00101 100
        let kopf = VoicePaketKopf::neu(VoiceTyp::Opus, 5);
        assert_eq!(kopf.encode(), 0b0010_1100);
        // Ziel 31 (Loopback), Typ Legacy (0): 11111 000
        let kopf = VoicePaketKopf::neu(VoiceTyp::Legacy, 31);
        assert_eq!(kopf.encode(), 0b1111_1000);
    }

    #[test]
    fn kopf_unbekannter_typ_verworfen() {
        // Typ-Bits 2, 3, 5, 6, 7 sind nicht vergeben
        for typ in [2u8, 3, 5, 6, 7] {
            assert!(VoicePaketKopf::decode(typ).is_none());
        }
    }

    #[test]
    fn ziel_interpretation() {
        assert_eq!(ZielTyp::from_raw(0), ZielTyp::Kanal);
        assert_eq!(ZielTyp::from_raw(31), ZielTyp::Loopback);
        assert_eq!(ZielTyp::from_raw(7), ZielTyp::Fluester(7));
        assert_eq!(ZielTyp::Fluester(30).raw(), 30);
    }

    #[test]
    fn audio_paket_round_trip() {
        let paket = VoicePaket::neu_opus(0, 100, vec![0xAB; 60]);
        let encoded = paket.encode();
        assert_eq!(encoded.len(), 5 + 60);

        let decoded = VoicePaket::decode(&encoded).expect("Decode muss erfolgreich sein");
        assert_eq!(decoded, paket);
    }

    #[test]
    fn ping_paket_round_trip() {
        let paket = VoicePaket::neu_ping(0xDEAD_BEEF_CAFE);
        let encoded = paket.encode();
        assert_eq!(encoded.len(), 9);

        let decoded = VoicePaket::decode(&encoded).unwrap();
        assert_eq!(decoded, paket);
    }

    #[test]
    fn sequenz_big_endian() {
        let paket = VoicePaket::neu_opus(0, 0x0102_0304, vec![]);
        let encoded = paket.encode();
        assert_eq!(&encoded[1..5], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn leeres_paket_ist_fehler() {
        assert!(VoicePaket::decode(&[]).is_err());
    }

    #[test]
    fn zu_langes_paket_ist_fehler() {
        let mut buf = VoicePaket::neu_opus(0, 1, vec![]).encode();
        buf.extend(vec![0u8; MAX_VOICE_PAKET_GROESSE]);
        assert!(VoicePaket::decode(&buf).is_err());
    }

    #[test]
    fn audio_ohne_sequenz_ist_fehler() {
        // Nur erstes Byte + 2 Bytes: zu kurz fuer die Sequenznummer
        let buf = [VoicePaketKopf::neu(VoiceTyp::Opus, 0).encode(), 0x00, 0x01];
        assert!(VoicePaket::decode(&buf).is_err());
    }

    #[test]
    fn leere_nutzdaten_ok() {
        let paket = VoicePaket::neu_opus(3, 7, vec![]);
        let decoded = VoicePaket::decode(&paket.encode()).unwrap();
        if let VoicePaket::Audio { nutzdaten, .. } = decoded {
            assert!(nutzdaten.is_empty());
        } else {
            panic!("Erwartet Audio");
        }
    }
}
