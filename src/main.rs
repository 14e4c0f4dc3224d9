use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use console_chat_sync::{ChatEngine, HttpGateway, SyncConfig};

/// Headless inbox: keeps the list in sync and prints every event as JSON.
/// An optional first argument is opened as a deep-link reference.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "console_chat_sync=debug,console_chat=info".into()),
        )
        .init();

    // ── Engine ────────────────────────────────────────────────────────────────
    let gateway = HttpGateway::new(&config).context("Failed to build the HTTP client")?;
    info!("Syncing against {}", config.api_base_url);
    let engine = ChatEngine::new(Arc::new(gateway), config);
    let mut events = engine.subscribe();

    match std::env::args().nth(1) {
        Some(reference) => {
            let resolution = engine.open_reference(&reference).await?;
            info!("Deep link {reference}: {resolution:?}");
        }
        None => {
            if let Err(e) = engine.activate().await {
                warn!("Initial list load failed, polling continues: {e}");
            }
        }
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown();
    Ok(())
}
