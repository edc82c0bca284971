//! Kanalbaum
//!
//! Kanaele bilden einen Baum ueber ihre Eltern-IDs; Kanal 0 ist der Root
//! und existiert immer. Links sind ein ungerichteter Overlay-Graph:
//! permanente Links stammen aus der Konfiguration, dynamische Links
//! werden vom Ausbreitungsmodell gesetzt (offene Baender) und bei jeder
//! Neuberechnung ersetzt -- permanente Links bleiben dabei unberuehrt.
//!
//! Der Baum selbst ist nicht gelockt; der Aufrufer haelt die
//! Reader/Writer-Sperre der Kanalschicht.

use std::collections::{BTreeSet, HashMap};

use kurzwelle_core::{types::ChannelId, KurzwelleError, Result};

/// Ein Kanal im Baum
#[derive(Debug, Clone)]
pub struct Kanal {
    pub id: ChannelId,
    pub name: String,
    pub beschreibung: String,
    /// Eltern-Kanal; None nur beim Root
    pub parent: Option<ChannelId>,
    /// Kinder in Anzeige-Reihenfolge
    pub kinder: Vec<ChannelId>,
    /// Permanente Links aus der Konfiguration (bidirektional)
    pub perm_links: BTreeSet<ChannelId>,
    /// Dynamische Links des Ausbreitungsmodells (offene Baender)
    pub dyn_links: BTreeSet<ChannelId>,
    pub position: i32,
    pub temporaer: bool,
}

impl Kanal {
    fn neu(id: ChannelId, name: impl Into<String>, parent: Option<ChannelId>) -> Self {
        Self {
            id,
            name: name.into(),
            beschreibung: String::new(),
            parent,
            kinder: Vec::new(),
            perm_links: BTreeSet::new(),
            dyn_links: BTreeSet::new(),
            position: 0,
            temporaer: false,
        }
    }

    /// Alle gelinkten Kanaele (permanent + dynamisch)
    pub fn gelinkte(&self) -> BTreeSet<ChannelId> {
        self.perm_links.union(&self.dyn_links).copied().collect()
    }
}

/// Der Kanalbaum des Servers
#[derive(Debug)]
pub struct KanalBaum {
    kanaele: HashMap<ChannelId, Kanal>,
    naechste_id: u32,
}

impl KanalBaum {
    /// Erstellt einen Baum der nur den Root-Kanal enthaelt
    pub fn neu() -> Self {
        let mut kanaele = HashMap::new();
        kanaele.insert(ChannelId::ROOT, Kanal::neu(ChannelId::ROOT, "Root", None));
        Self {
            kanaele,
            naechste_id: 1,
        }
    }

    /// Gibt einen Kanal zurueck
    pub fn kanal(&self, id: ChannelId) -> Option<&Kanal> {
        self.kanaele.get(&id)
    }

    /// Veraenderlicher Zugriff auf einen Kanal
    pub fn kanal_mut(&mut self, id: ChannelId) -> Option<&mut Kanal> {
        self.kanaele.get_mut(&id)
    }

    /// Prueft ob eine Kanal-ID existiert
    pub fn existiert(&self, id: ChannelId) -> bool {
        self.kanaele.contains_key(&id)
    }

    /// Alle Kanal-IDs (unsortiert)
    pub fn alle_ids(&self) -> Vec<ChannelId> {
        self.kanaele.keys().copied().collect()
    }

    /// Anzahl der Kanaele
    pub fn anzahl(&self) -> usize {
        self.kanaele.len()
    }

    /// Legt einen Kanal mit vergebener ID an (automatische Vergabe)
    pub fn anlegen(
        &mut self,
        parent: ChannelId,
        name: impl Into<String>,
        temporaer: bool,
    ) -> Result<ChannelId> {
        let id = ChannelId(self.naechste_id);
        self.naechste_id += 1;
        self.anlegen_mit_id(id, parent, name)?;
        if let Some(k) = self.kanaele.get_mut(&id) {
            k.temporaer = temporaer;
        }
        Ok(id)
    }

    /// Legt einen Kanal mit fester ID an (Konfigurations-Setup)
    pub fn anlegen_mit_id(
        &mut self,
        id: ChannelId,
        parent: ChannelId,
        name: impl Into<String>,
    ) -> Result<()> {
        if self.kanaele.contains_key(&id) {
            return Err(KurzwelleError::Konflikt(format!(
                "Kanal existiert bereits: {id}"
            )));
        }
        if !self.kanaele.contains_key(&parent) {
            return Err(KurzwelleError::NichtGefunden(format!(
                "Elternkanal: {parent}"
            )));
        }

        self.kanaele.insert(id, Kanal::neu(id, name, Some(parent)));
        self.kanaele
            .get_mut(&parent)
            .expect("Elternkanal wurde gerade geprueft")
            .kinder
            .push(id);

        if id.0 >= self.naechste_id {
            self.naechste_id = id.0 + 1;
        }
        Ok(())
    }

    /// Entfernt einen Kanal samt Unterbaum; gibt die entfernten IDs zurueck
    ///
    /// Der Root-Kanal kann nicht entfernt werden.
    pub fn entfernen(&mut self, id: ChannelId) -> Result<Vec<ChannelId>> {
        if id.ist_root() {
            return Err(KurzwelleError::Validierung(
                "Root-Kanal kann nicht entfernt werden".into(),
            ));
        }
        if !self.kanaele.contains_key(&id) {
            return Err(KurzwelleError::NichtGefunden(format!("Kanal: {id}")));
        }

        let entfernte = self.unterbaum(id);
        for weg_id in &entfernte {
            self.kanaele.remove(weg_id);
        }

        // Verweise aus Eltern-Kinderlisten und Link-Mengen entfernen
        for kanal in self.kanaele.values_mut() {
            kanal.kinder.retain(|k| !entfernte.contains(k));
            for weg_id in &entfernte {
                kanal.perm_links.remove(weg_id);
                kanal.dyn_links.remove(weg_id);
            }
        }

        Ok(entfernte)
    }

    /// Haengt einen Kanal unter einen neuen Elternkanal
    ///
    /// # Fehler
    /// - `Validierung` wenn der Zug einen Zyklus erzeugen wuerde
    pub fn verschieben(&mut self, id: ChannelId, neuer_parent: ChannelId) -> Result<()> {
        if id.ist_root() {
            return Err(KurzwelleError::Validierung(
                "Root-Kanal kann nicht verschoben werden".into(),
            ));
        }
        if !self.kanaele.contains_key(&id) || !self.kanaele.contains_key(&neuer_parent) {
            return Err(KurzwelleError::NichtGefunden(format!(
                "Kanal oder Ziel: {id} -> {neuer_parent}"
            )));
        }
        // Zyklus-Pruefung: das Ziel darf nicht im Unterbaum von `id` liegen
        if self.unterbaum(id).contains(&neuer_parent) {
            return Err(KurzwelleError::Validierung(format!(
                "Zyklus: {neuer_parent} liegt unter {id}"
            )));
        }

        let alter_parent = self
            .kanaele
            .get(&id)
            .and_then(|k| k.parent)
            .expect("Nicht-Root hat immer einen Elternkanal");
        if let Some(alt) = self.kanaele.get_mut(&alter_parent) {
            alt.kinder.retain(|k| *k != id);
        }
        self.kanaele
            .get_mut(&neuer_parent)
            .expect("Ziel wurde geprueft")
            .kinder
            .push(id);
        self.kanaele
            .get_mut(&id)
            .expect("Kanal wurde geprueft")
            .parent = Some(neuer_parent);
        Ok(())
    }

    /// Unterbaum eines Kanals in Preorder (inkl. des Kanals selbst)
    pub fn unterbaum(&self, id: ChannelId) -> Vec<ChannelId> {
        let mut ergebnis = Vec::new();
        let mut stapel = vec![id];
        while let Some(aktuell) = stapel.pop() {
            if let Some(kanal) = self.kanaele.get(&aktuell) {
                ergebnis.push(aktuell);
                for kind in kanal.kinder.iter().rev() {
                    stapel.push(*kind);
                }
            }
        }
        ergebnis
    }

    /// Vorfahren vom Root bis zum Elternkanal von `id`
    pub fn vorfahren(&self, id: ChannelId) -> Vec<ChannelId> {
        let mut kette = Vec::new();
        let mut aktuell = self.kanaele.get(&id).and_then(|k| k.parent);
        while let Some(p) = aktuell {
            kette.push(p);
            aktuell = self.kanaele.get(&p).and_then(|k| k.parent);
        }
        kette.reverse();
        kette
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Setzt einen permanenten Link (bidirektional)
    pub fn perm_link_setzen(&mut self, a: ChannelId, b: ChannelId) -> Result<()> {
        if a == b {
            return Err(KurzwelleError::Validierung("Link auf sich selbst".into()));
        }
        if !self.kanaele.contains_key(&a) || !self.kanaele.contains_key(&b) {
            return Err(KurzwelleError::NichtGefunden(format!("Link {a} <-> {b}")));
        }
        self.kanaele.get_mut(&a).expect("geprueft").perm_links.insert(b);
        self.kanaele.get_mut(&b).expect("geprueft").perm_links.insert(a);
        Ok(())
    }

    /// Entfernt einen permanenten Link (beide Richtungen)
    pub fn perm_link_entfernen(&mut self, a: ChannelId, b: ChannelId) {
        if let Some(k) = self.kanaele.get_mut(&a) {
            k.perm_links.remove(&b);
        }
        if let Some(k) = self.kanaele.get_mut(&b) {
            k.perm_links.remove(&a);
        }
    }

    /// Ersetzt saemtliche dynamischen Links durch die uebergebenen Paare
    ///
    /// Wird vom Ausbreitungsmodell bei jeder Neuberechnung der offenen
    /// Baender aufgerufen. Permanente Links bleiben unberuehrt.
    pub fn dyn_links_ersetzen(&mut self, paare: &[(ChannelId, ChannelId)]) {
        for kanal in self.kanaele.values_mut() {
            kanal.dyn_links.clear();
        }
        for (a, b) in paare {
            if a == b || !self.kanaele.contains_key(a) || !self.kanaele.contains_key(b) {
                continue;
            }
            self.kanaele.get_mut(a).expect("geprueft").dyn_links.insert(*b);
            self.kanaele.get_mut(b).expect("geprueft").dyn_links.insert(*a);
        }
    }
}

impl Default for KanalBaum {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
