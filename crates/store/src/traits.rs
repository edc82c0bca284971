//! Store-Vertraege
//!
//! Das Repository-Pattern entkoppelt den Server von der konkreten
//! Persistenz. Alle mutierenden Operationen sind atomar (ganz oder
//! gar nicht) und untereinander serialisierbar.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use kurzwelle_core::types::{ChannelId, EigenschaftsTag, SessionId, UserId};

use crate::error::StoreResult;
use crate::models::{AclZeile, BanEintrag, BenutzerRecord};

/// Store fuer registrierte Benutzer und ihre Eigenschaften
#[allow(async_fn_in_trait)]
pub trait BenutzerStore: Send + Sync {
    /// Registriert einen neuen Benutzer
    ///
    /// # Fehler
    /// - `Konflikt` wenn der Name (case-insensitiv) bereits vergeben ist
    async fn registrieren(
        &self,
        name: &str,
        passwort_verifier: Option<&str>,
        zert_hash: Option<&str>,
    ) -> StoreResult<BenutzerRecord>;

    /// Loescht einen Benutzer; `false` wenn die ID unbekannt war (No-op)
    async fn deregistrieren(&self, id: UserId) -> StoreResult<bool>;

    /// Laedt einen Benutzer anhand seiner ID
    async fn laden(&self, id: UserId) -> StoreResult<Option<BenutzerRecord>>;

    /// Laedt einen Benutzer anhand seines Namens (case-insensitiv)
    async fn laden_nach_name(&self, name: &str) -> StoreResult<Option<BenutzerRecord>>;

    /// Liest eine Eigenschaft
    async fn eigenschaft_lesen(
        &self,
        id: UserId,
        tag: EigenschaftsTag,
    ) -> StoreResult<Option<String>>;

    /// Setzt eine Eigenschaft (ueberschreibt einen vorhandenen Wert)
    async fn eigenschaft_setzen(
        &self,
        id: UserId,
        tag: EigenschaftsTag,
        wert: &str,
    ) -> StoreResult<()>;

    /// Alle registrierten Benutzer
    async fn alle(&self) -> StoreResult<Vec<BenutzerRecord>>;
}

/// Store fuer die Ban-Liste
#[allow(async_fn_in_trait)]
pub trait BanStore: Send + Sync {
    /// Alle Ban-Eintraege (auch abgelaufene)
    async fn alle(&self) -> StoreResult<Vec<BanEintrag>>;

    /// Fuegt einen Ban an
    async fn anfuegen(&self, ban: BanEintrag) -> StoreResult<()>;

    /// Ersetzt die gesamte Liste (BanList-Schreibzugriff des Clients)
    async fn ersetzen(&self, bans: Vec<BanEintrag>) -> StoreResult<()>;

    /// Entfernt alle Eintraege die exakt `ban` entsprechen; Anzahl entfernt
    async fn entfernen(&self, ban: &BanEintrag) -> StoreResult<usize>;

    /// Sucht einen aktiven Ban fuer Adresse/Name/Hash
    async fn suchen(
        &self,
        adresse: Option<IpAddr>,
        name: Option<&str>,
        zert_hash: Option<&str>,
        jetzt: DateTime<Utc>,
    ) -> StoreResult<Option<BanEintrag>>;
}

/// Store fuer ACL-Zeilen pro Kanal
#[allow(async_fn_in_trait)]
pub trait AclStore: Send + Sync {
    /// Alle Zeilen eines Kanals in definierter Reihenfolge
    async fn zeilen(&self, kanal_id: ChannelId) -> StoreResult<Vec<AclZeile>>;

    /// Ersetzt die Zeilen eines Kanals
    async fn setzen(&self, kanal_id: ChannelId, zeilen: Vec<AclZeile>) -> StoreResult<()>;
}

/// Store fuer Textur-Blobs (Avatare)
#[allow(async_fn_in_trait)]
pub trait TexturStore: Send + Sync {
    /// Laedt den Blob eines Benutzers
    async fn lesen(&self, id: UserId) -> StoreResult<Option<Vec<u8>>>;

    /// Schreibt den Blob eines Benutzers
    async fn schreiben(&self, id: UserId, daten: &[u8]) -> StoreResult<()>;
}

/// Store fuer temporaere Gruppenmitgliedschaften
///
/// Temporaere Gruppen sind an (Session, Kanal) gebunden und verschwinden
/// mit der Session.
#[allow(async_fn_in_trait)]
pub trait GruppenStore: Send + Sync {
    /// Fuegt eine Session einer temporaeren Gruppe hinzu
    async fn hinzufuegen(
        &self,
        session: SessionId,
        kanal_id: ChannelId,
        gruppe: &str,
    ) -> StoreResult<()>;

    /// Gruppen einer Session in einem Kanal
    async fn gruppen_von(
        &self,
        session: SessionId,
        kanal_id: ChannelId,
    ) -> StoreResult<Vec<String>>;

    /// Entfernt alle Mitgliedschaften einer Session (Session-Ende)
    async fn session_entfernen(&self, session: SessionId) -> StoreResult<()>;
}
