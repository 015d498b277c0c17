//! Earshot Server – Einstiegspunkt
//!
//! Laedt die Server-Eigenschaften, initialisiert das Logging, bindet den
//! UDP-Transport und laesst den Relay bis zum Shutdown-Signal laufen.

use std::sync::Arc;

use anyhow::Result;
use earshot_server::udp::UdpTransport;
use earshot_server::{RelayServer, ServerEigenschaften};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("EARSHOT_CONFIG").unwrap_or_else(|_| "earshot.toml".into());

    // Eigenschaften laden (Standardwerte falls Datei fehlt)
    let eigenschaften = ServerEigenschaften::laden(&config_pfad)?;

    logging_initialisieren(&eigenschaften.logging.level, &eigenschaften.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        udp = %eigenschaften.bind_adresse(),
        max_clients = eigenschaften.max_clients,
        "Earshot Server wird initialisiert"
    );

    // Transport binden und Relay starten
    let transport = Arc::new(UdpTransport::binden(&eigenschaften.bind_adresse()).await?);
    let relay = Arc::new(RelayServer::neu(eigenschaften, transport));
    let (tick_task, stopp) = relay.tick_task_starten();

    // SIGHUP-artiges Neuladen gibt es hier nicht; das reload-Kommando der
    // Verwaltungs-Schnittstelle ruft eigenschaften_neu_laden direkt auf.
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown-Signal empfangen");

    let _ = stopp.send(());
    tick_task.await?;
    tracing::info!("Earshot Server beendet");
    Ok(())
}

/// Initialisiert tracing-subscriber mit dem konfigurierten Level und Format
fn logging_initialisieren(level: &str, format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
