//! In-Memory-Store
//!
//! Referenz-Implementierung aller Store-Vertraege hinter einem einzigen
//! Mutex: jede Mutation ist dadurch atomar und serialisierbar. Dient als
//! Standard-Backend fuer Entwicklung und Tests; eine SQL-Implementierung
//! erfuellt dieselben Traits.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use kurzwelle_core::types::{ChannelId, EigenschaftsTag, SessionId, UserId};

use crate::error::{StoreError, StoreResult};
use crate::models::{AclZeile, BanEintrag, BenutzerRecord};
use crate::traits::{AclStore, BanStore, BenutzerStore, GruppenStore, TexturStore};

#[derive(Default)]
struct Inner {
    naechste_user_id: i64,
    benutzer: HashMap<UserId, BenutzerRecord>,
    eigenschaften: HashMap<(UserId, EigenschaftsTag), String>,
    texturen: HashMap<UserId, Vec<u8>>,
    bans: Vec<BanEintrag>,
    acl: HashMap<ChannelId, Vec<AclZeile>>,
    temp_gruppen: HashMap<(SessionId, ChannelId), Vec<String>>,
}

/// In-Memory-Backend fuer alle Store-Vertraege
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Erstellt einen leeren Store
    pub fn neu() -> Self {
        Self {
            inner: Mutex::new(Inner {
                naechste_user_id: 1,
                ..Default::default()
            }),
        }
    }

    fn sperren(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning heisst: ein Schreiber ist mitten in einer Mutation
        // abgestuerzt. Der Zustand ist dann nicht vertrauenswuerdig.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::neu()
    }
}

impl BenutzerStore for MemoryStore {
    async fn registrieren(
        &self,
        name: &str,
        passwort_verifier: Option<&str>,
        zert_hash: Option<&str>,
    ) -> StoreResult<BenutzerRecord> {
        let mut inner = self.sperren();

        let belegt = inner
            .benutzer
            .values()
            .any(|b| b.name.eq_ignore_ascii_case(name));
        if belegt {
            return Err(StoreError::Konflikt(format!(
                "Name bereits registriert: {name}"
            )));
        }

        let id = UserId(inner.naechste_user_id);
        inner.naechste_user_id += 1;

        let record = BenutzerRecord {
            id,
            name: name.to_string(),
            passwort_verifier: passwort_verifier.map(String::from),
            zert_hash: zert_hash.map(String::from),
            erstellt_am: Utc::now(),
        };
        inner.benutzer.insert(id, record.clone());

        tracing::debug!(user_id = %id, name, "Benutzer registriert");
        Ok(record)
    }

    async fn deregistrieren(&self, id: UserId) -> StoreResult<bool> {
        let mut inner = self.sperren();
        let entfernt = inner.benutzer.remove(&id).is_some();
        if entfernt {
            inner.eigenschaften.retain(|(uid, _), _| *uid != id);
            inner.texturen.remove(&id);
            tracing::debug!(user_id = %id, "Benutzer deregistriert");
        }
        Ok(entfernt)
    }

    async fn laden(&self, id: UserId) -> StoreResult<Option<BenutzerRecord>> {
        Ok(self.sperren().benutzer.get(&id).cloned())
    }

    async fn laden_nach_name(&self, name: &str) -> StoreResult<Option<BenutzerRecord>> {
        Ok(self
            .sperren()
            .benutzer
            .values()
            .find(|b| b.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn eigenschaft_lesen(
        &self,
        id: UserId,
        tag: EigenschaftsTag,
    ) -> StoreResult<Option<String>> {
        Ok(self.sperren().eigenschaften.get(&(id, tag)).cloned())
    }

    async fn eigenschaft_setzen(
        &self,
        id: UserId,
        tag: EigenschaftsTag,
        wert: &str,
    ) -> StoreResult<()> {
        let mut inner = self.sperren();
        if !inner.benutzer.contains_key(&id) {
            return Err(StoreError::NichtGefunden(format!("Benutzer {id}")));
        }
        inner.eigenschaften.insert((id, tag), wert.to_string());
        Ok(())
    }

    async fn alle(&self) -> StoreResult<Vec<BenutzerRecord>> {
        let mut liste: Vec<_> = self.sperren().benutzer.values().cloned().collect();
        liste.sort_by_key(|b| b.id);
        Ok(liste)
    }
}

impl BanStore for MemoryStore {
    async fn alle(&self) -> StoreResult<Vec<BanEintrag>> {
        Ok(self.sperren().bans.clone())
    }

    async fn anfuegen(&self, ban: BanEintrag) -> StoreResult<()> {
        self.sperren().bans.push(ban);
        Ok(())
    }

    async fn ersetzen(&self, bans: Vec<BanEintrag>) -> StoreResult<()> {
        self.sperren().bans = bans;
        Ok(())
    }

    async fn entfernen(&self, ban: &BanEintrag) -> StoreResult<usize> {
        let mut inner = self.sperren();
        let vorher = inner.bans.len();
        inner.bans.retain(|b| b != ban);
        Ok(vorher - inner.bans.len())
    }

    async fn suchen(
        &self,
        adresse: Option<IpAddr>,
        name: Option<&str>,
        zert_hash: Option<&str>,
        jetzt: DateTime<Utc>,
    ) -> StoreResult<Option<BanEintrag>> {
        Ok(self
            .sperren()
            .bans
            .iter()
            .find(|b| b.trifft_zu(adresse, name, zert_hash, jetzt))
            .cloned())
    }
}

impl AclStore for MemoryStore {
    async fn zeilen(&self, kanal_id: ChannelId) -> StoreResult<Vec<AclZeile>> {
        Ok(self.sperren().acl.get(&kanal_id).cloned().unwrap_or_default())
    }

    async fn setzen(&self, kanal_id: ChannelId, zeilen: Vec<AclZeile>) -> StoreResult<()> {
        self.sperren().acl.insert(kanal_id, zeilen);
        Ok(())
    }
}

impl TexturStore for MemoryStore {
    async fn lesen(&self, id: UserId) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.sperren().texturen.get(&id).cloned())
    }

    async fn schreiben(&self, id: UserId, daten: &[u8]) -> StoreResult<()> {
        let mut inner = self.sperren();
        if !inner.benutzer.contains_key(&id) {
            return Err(StoreError::NichtGefunden(format!("Benutzer {id}")));
        }
        inner.texturen.insert(id, daten.to_vec());
        Ok(())
    }
}

impl GruppenStore for MemoryStore {
    async fn hinzufuegen(
        &self,
        session: SessionId,
        kanal_id: ChannelId,
        gruppe: &str,
    ) -> StoreResult<()> {
        let mut inner = self.sperren();
        let gruppen = inner.temp_gruppen.entry((session, kanal_id)).or_default();
        if !gruppen.iter().any(|g| g == gruppe) {
            gruppen.push(gruppe.to_string());
        }
        Ok(())
    }

    async fn gruppen_von(
        &self,
        session: SessionId,
        kanal_id: ChannelId,
    ) -> StoreResult<Vec<String>> {
        Ok(self
            .sperren()
            .temp_gruppen
            .get(&(session, kanal_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn session_entfernen(&self, session: SessionId) -> StoreResult<()> {
        self.sperren()
            .temp_gruppen
            .retain(|(s, _), _| *s != session);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
