//! Wire-Format fuer die Control-Verbindung
//!
//! Frame-basiertes Protokoll: Typ(u16 big-endian) + Laenge(u32 big-endian)
//! + serialisierte Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+----...----+
//! | Typ (u16 BE)    | Laenge (u32 BE)                   | Payload   |
//! +--------+--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 6 Header-Bytes).
//! Unbekannte Typ-Tags sind ein Protokollfehler und beenden die Verbindung.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::control::{ControlMessage, NachrichtenTyp};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Maximale Control-Nachrichtenlaenge: 128 KiB
pub const MAX_CONTROL_LAENGE: usize = 128 * 1024;

/// Groesse des Frame-Headers in Bytes (Typ + Laenge)
pub const HEADER_GROESSE: usize = 6;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer die Control-Verbindung
///
/// Implementiert `Encoder<ControlMessage>` und `Decoder` fuer nahtlose
/// Integration mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Payload-Laenge in Bytes
    max_laenge: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limit (128 KiB)
    pub fn new() -> Self {
        Self {
            max_laenge: MAX_CONTROL_LAENGE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefiniertem Limit
    pub fn mit_max_laenge(max_laenge: usize) -> Self {
        Self { max_laenge }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = ControlMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf den vollstaendigen 6-Byte-Header
        if src.len() < HEADER_GROESSE {
            return Ok(None);
        }

        let tag = u16::from_be_bytes([src[0], src[1]]);
        let laenge = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;

        if laenge > self.max_laenge {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    laenge, self.max_laenge
                ),
            ));
        }

        // Geschlossene Enumeration: unbekannter Tag = Protokollfehler
        let typ = NachrichtenTyp::from_u16(tag).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unbekannter Nachrichten-Tag: {tag}"),
            )
        })?;

        let gesamt = HEADER_GROESSE + laenge;
        if src.len() < gesamt {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(HEADER_GROESSE);
        let payload = src.split_to(laenge);

        ControlMessage::payload_dekodieren(typ, &payload).map(Some)
    }
}

impl Encoder<ControlMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.payload_kodieren().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Payload-Serialisierung fehlgeschlagen: {e}"),
            )
        })?;

        if payload.len() > self.max_laenge {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    payload.len(),
                    self.max_laenge
                ),
            ));
        }

        dst.reserve(HEADER_GROESSE + payload.len());
        dst.put_u16(item.typ() as u16);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen fuer direktes async Lesen/Schreiben
// ---------------------------------------------------------------------------

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// # Fehler
/// - `UnexpectedEof` wenn die Verbindung vor Abschluss des Frames getrennt wird
/// - `InvalidData` bei unbekanntem Tag, kaputter Payload oder zu grossem Frame
pub async fn frame_lesen<R>(reader: &mut R, max_laenge: usize) -> io::Result<ControlMessage>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_GROESSE];
    reader.read_exact(&mut header).await?;

    let tag = u16::from_be_bytes([header[0], header[1]]);
    let laenge = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;

    if laenge > max_laenge {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame zu gross: {laenge} Bytes (Maximum: {max_laenge} Bytes)"),
        ));
    }

    let typ = NachrichtenTyp::from_u16(tag).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unbekannter Nachrichten-Tag: {tag}"),
        )
    })?;

    let mut payload = vec![0u8; laenge];
    reader.read_exact(&mut payload).await?;

    ControlMessage::payload_dekodieren(typ, &payload)
}

/// Schreibt einen einzelnen Frame in einen `AsyncWrite`
pub async fn frame_schreiben<W>(
    writer: &mut W,
    nachricht: &ControlMessage,
    max_laenge: usize,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = nachricht.payload_kodieren().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Payload-Serialisierung fehlgeschlagen: {e}"),
        )
    })?;

    if payload.len() > max_laenge {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Nachricht zu gross: {} Bytes (Maximum: {max_laenge} Bytes)",
                payload.len()
            ),
        ));
    }

    writer.write_all(&(nachricht.typ() as u16).to_be_bytes()).await?;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
