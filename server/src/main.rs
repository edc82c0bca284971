//! Kurzwelle Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den
//! Server. Exit-Codes: 0 = normales Ende, 1 = Konfigurations- oder
//! Bind-Fehler, 2 = Laufzeitfehler.

use std::process::ExitCode;

use clap::Parser;

use kurzwelle_core::KurzwelleError;
use kurzwelle_server::config::ServerKonfiguration;
use kurzwelle_server::Server;

/// HF-Propagation Voice-Conferencing Server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Pfad zur Konfigurationsdatei
    #[arg(short = 'c', long = "config", default_value = "kurzwelle.toml")]
    config: String,

    /// Pfad/URL des persistenten Stores (ueberschreibt die Konfiguration)
    #[arg(short = 'd', long = "database")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    logging_initialisieren();

    let mut konfiguration = match ServerKonfiguration::laden(&args.config) {
        Ok(konfiguration) => konfiguration,
        Err(e) => {
            tracing::error!(fehler = %e, "Konfiguration nicht ladbar");
            return ExitCode::from(1);
        }
    };
    if let Some(database) = args.database {
        konfiguration.database = database;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config,
        "Kurzwelle-Server wird initialisiert"
    );

    match Server::neu(konfiguration).starten().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(KurzwelleError::Konfiguration(e)) => {
            tracing::error!(fehler = %e, "Start fehlgeschlagen");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!(fehler = %e, "Laufzeitfehler");
            ExitCode::from(2)
        }
    }
}

/// Initialisiert tracing-subscriber; RUST_LOG ueberschreibt das Level
fn logging_initialisieren() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
