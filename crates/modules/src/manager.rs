//! Modul-Verwaltung
//!
//! Server-Module sind entkoppelte Erweiterungen (Ausbreitung, Statistik,
//! Benutzerdaten) die Ereignisse vom Bus empfangen. Die Verteilung
//! faechert ueber einen begrenzten Worker-Pool auf; ein Modul das bei
//! der Verarbeitung panict darf die uebrigen Module nicht blockieren
//! oder den Prozess beenden.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use kurzwelle_core::{KurzwelleError, Result};

use crate::bus::{Ereignis, EventBus};

/// Schnittstelle eines Server-Moduls
pub trait ServerModul: Send + Sync + 'static {
    /// Eindeutiger Modulname
    fn name(&self) -> &str;

    /// Modulversion (nur informativ)
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Kurzbeschreibung
    fn beschreibung(&self) -> &str;

    /// Wird einmalig beim Serverstart aufgerufen
    fn initialisieren(&self) -> Result<()> {
        Ok(())
    }

    /// Wird beim Herunterfahren aufgerufen (umgekehrte Registrierungs-Reihenfolge)
    fn herunterfahren(&self) {}

    /// Verarbeitet ein Bus-Ereignis
    ///
    /// Laeuft auf dem Worker-Pool; darf blockieren, aber nicht ewig.
    fn ereignis(&self, ereignis: &Ereignis);
}

/// Verwaltung und Ereignis-Verteilung aller registrierten Module
pub struct ModulManager {
    module: std::sync::RwLock<Vec<Arc<dyn ServerModul>>>,
    /// Begrenzung der parallelen Ereignis-Verarbeitung
    pool: Arc<Semaphore>,
    pool_groesse: usize,
}

impl ModulManager {
    /// Erstellt einen Manager mit Pool-Groesse = Hardware-Parallelitaet
    pub fn neu() -> Self {
        let kerne = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::mit_pool_groesse(kerne)
    }

    /// Erstellt einen Manager mit fester Pool-Groesse
    pub fn mit_pool_groesse(pool_groesse: usize) -> Self {
        let pool_groesse = pool_groesse.max(1);
        Self {
            module: std::sync::RwLock::new(Vec::new()),
            pool: Arc::new(Semaphore::new(pool_groesse)),
            pool_groesse,
        }
    }

    /// Anzahl Worker im Pool
    pub fn pool_groesse(&self) -> usize {
        self.pool_groesse
    }

    /// Registriert ein Modul
    ///
    /// # Fehler
    /// - `Konflikt` wenn bereits ein Modul mit diesem Namen existiert
    pub fn registrieren(&self, modul: Arc<dyn ServerModul>) -> Result<()> {
        let mut module = self.module.write().unwrap_or_else(|e| e.into_inner());
        if module.iter().any(|m| m.name() == modul.name()) {
            return Err(KurzwelleError::Konflikt(format!(
                "Modul bereits registriert: {}",
                modul.name()
            )));
        }
        tracing::info!(
            modul = modul.name(),
            version = modul.version(),
            "Modul registriert"
        );
        module.push(modul);
        Ok(())
    }

    /// Namen aller registrierten Module
    pub fn modul_namen(&self) -> Vec<String> {
        self.module
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Initialisiert alle Module; `false` wenn mindestens eines scheitert
    pub fn initialisieren_alle(&self) -> bool {
        let module = self.module.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut alle_ok = true;
        for modul in module {
            match modul.initialisieren() {
                Ok(()) => tracing::info!(modul = modul.name(), "Modul initialisiert"),
                Err(e) => {
                    tracing::error!(modul = modul.name(), fehler = %e, "Modul-Initialisierung fehlgeschlagen");
                    alle_ok = false;
                }
            }
        }
        alle_ok
    }

    /// Faehrt alle Module in umgekehrter Registrierungs-Reihenfolge herunter
    pub fn herunterfahren_alle(&self) {
        let module = self.module.read().unwrap_or_else(|e| e.into_inner()).clone();
        for modul in module.iter().rev() {
            tracing::info!(modul = modul.name(), "Modul wird heruntergefahren");
            modul.herunterfahren();
        }
    }

    /// Verteilt ein Ereignis parallel an alle Module
    ///
    /// Jedes Modul laeuft als eigener Task auf dem begrenzten Pool.
    /// Ein Panic in einem Modul wird isoliert und geloggt; die uebrigen
    /// Module erhalten das Ereignis trotzdem.
    pub async fn ereignis_verteilen(&self, ereignis: Ereignis) {
        let module = self.module.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut tasks = JoinSet::new();

        for modul in module {
            let pool = Arc::clone(&self.pool);
            let ereignis = ereignis.clone();
            tasks.spawn(async move {
                let _ticket = pool
                    .acquire_owned()
                    .await
                    .expect("Semaphore wird nie geschlossen");
                let name = modul.name().to_string();
                let ergebnis = tokio::task::spawn_blocking(move || {
                    catch_unwind(AssertUnwindSafe(|| modul.ereignis(&ereignis)))
                })
                .await;
                match ergebnis {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        tracing::error!(modul = name, "Modul hat bei der Ereignis-Verarbeitung panict");
                    }
                    Err(e) => {
                        tracing::error!(modul = name, fehler = %e, "Modul-Task abgebrochen");
                    }
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Verbindet den Manager mit dem Bus: abonniert die Themen und
    /// verteilt eingehende Ereignisse im Hintergrund
    pub fn verteiler_starten(
        manager: Arc<Self>,
        bus: &EventBus,
        themen: &[&str],
    ) -> Vec<tokio::task::JoinHandle<()>> {
        themen
            .iter()
            .map(|thema| {
                let mut rx = bus.abonnieren(thema);
                let manager = Arc::clone(&manager);
                let thema = thema.to_string();
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(ereignis) => manager.ereignis_verteilen(ereignis).await,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(anzahl)) => {
                                tracing::warn!(thema, verpasst = anzahl, "Modul-Verteiler hinkt hinterher");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            })
            .collect()
    }
}

impl Default for ModulManager {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
