use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

use lib_livetiming::ingestors::LiveTimingClient;
use lib_livetiming::reference::{ReferenceData, ReferenceTable};

mod livetiming_logic;
use livetiming_logic::{config, logger, monitor, supervisor};

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config();
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let reference: Option<Arc<dyn ReferenceData>> = match &settings.reference_path {
        Some(path) => match ReferenceTable::load(path) {
            Ok(table) => Some(Arc::new(table)),
            Err(e) => {
                log::warn!("Reference data unavailable: {}", e);
                None
            }
        },
        None => None,
    };

    let (client, diagnostics) = LiveTimingClient::with_diagnostic_log(settings.feed.clone());
    let client = Arc::new(client);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let monitor_handle = tokio::spawn(monitor::run(
        settings.clone(),
        client.clone(),
        diagnostics,
        reference,
        shutdown_tx.subscribe(),
    ));

    let supervisor_handle = tokio::spawn(supervisor::run(
        settings.clone(),
        client.clone(),
        shutdown_tx.subscribe(),
    ));

    wait_for_signal().await;

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let _ = tokio::try_join!(supervisor_handle, monitor_handle);

    client.disconnect().await;

    log::info!("Shutdown complete.");
    Ok(())
}
