//! ==============================================================================
//! main.rs - sensor hub entry point
//! ==============================================================================
//!
//! purpose:
//!     receives json batches pushed by a phone sensor-streaming app,
//!     normalizes every reading into named, unit annotated values, keeps a
//!     rolling window in memory for the dashboard and persists each message.
//!
//! responsibilities:
//!     - load configuration (host.toml + environment overrides)
//!     - install the tracing subscriber (console + optional json log file)
//!     - open the persistence sink (or run without one)
//!     - serve ingest, json apis and the dashboard until ctrl-c / sigterm
//!
//! relationships:
//!     - uses: config.rs, logging.rs, web.rs
//!     - web.rs uses: normalizer.rs -> decoders.rs -> coerce.rs
//!                    store.rs, sink.rs, archive.rs, dashboard.rs
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     sensor hub (this binary)                │
//!     │                                                             │
//!     │   POST /data ──► normalizer ──► store (RwLock, capped) ─┐   │
//!     │                      │                                  │   │
//!     │                   decoders                 dashboard / api  │
//!     │                      │                                      │
//!     │                      └────────────► sink (blocking worker)  │
//!     │                                      sensor_messages.jsonl  │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod archive;
mod coerce;
mod config;
mod dashboard;
mod decoders;
mod domain;
mod logging;
mod normalizer;
mod sink;
mod store;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use sink::{FileSink, NullSink, PersistenceSink};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Sensor Hub");
    println!("  push url: http://<this-host>:<port>/data");
    println!("===========================================================");

    // step 1: load configuration
    let (mut config, mut notes) = config::HostConfig::load_or_default();
    notes.extend(config.apply_env(|key| std::env::var(key).ok()));
    config.validate()?;
    config.print_summary();

    // step 2: logging
    logging::init(&config.logging, config.log_file_path().as_deref())?;
    for note in &notes {
        info!(target: "config", "{}", note);
    }
    config.log_summary();

    // step 3: persistence sink; the hub keeps running without one
    let sink: Arc<dyn PersistenceSink> = if config.storage.enabled {
        match FileSink::open(&config.storage.data_dir) {
            Ok(sink) => {
                info!(path = %sink.path().display(), "storage ready");
                Arc::new(sink)
            }
            Err(e) => {
                error!(error = ?e, "storage unavailable, messages will only be kept in memory");
                Arc::new(NullSink)
            }
        }
    } else {
        warn!("storage disabled, messages will only be kept in memory");
        Arc::new(NullSink)
    };

    // step 4: serve until shutdown
    let state = web::AppState::new(config, sink);
    web::run_server(state, shutdown_signal()).await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
