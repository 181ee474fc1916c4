// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::time::Duration;

use edge_relay::collector::CollectorApi;
use edge_relay::config::RelayConfig;
use edge_relay::flusher::{FlushOutcome, Flusher};
use edge_relay::ingest::{IngestionListener, MessageSource};
use edge_relay::store::StoreService;
use edge_relay::updater::UpdateSupervisor;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const CLIENT_ID: &str = "edge-relay";
const STORE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration, shutting down: {e}");
            return;
        }
    };

    let (store_service, store) = match StoreService::open(&config.db_path) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Unable to open the message store, shutting down: {e}");
            return;
        }
    };
    let store_task = tokio::spawn(store_service.run());
    info!("Message store opened at {}", config.db_path.display());

    let ingest_cancel = CancellationToken::new();
    let source = MessageSource::broker(
        &config.mqtt_host,
        config.mqtt_port,
        CLIENT_ID,
        &config.topic_filter,
    );
    let listener = IngestionListener::new(
        source,
        store.clone(),
        config.max_payload_bytes,
        ingest_cancel.clone(),
    );
    tokio::spawn(listener.run());
    info!(
        "Listening for {} on {}:{}",
        config.topic_filter, config.mqtt_host, config.mqtt_port
    );

    let api = match CollectorApi::new(&config.collector()) {
        Ok(api) => api,
        Err(e) => {
            error!("Unable to build the collector client, shutting down: {e}");
            return;
        }
    };
    let flusher = Flusher::new(store.clone(), api, config.hub_info());

    let updater = match config.updater() {
        Some(updater_config) => match UpdateSupervisor::new(&updater_config) {
            Ok(updater) => Some(updater),
            Err(e) => {
                error!("Unable to build the update client, shutting down: {e}");
                return;
            }
        },
        None => {
            info!("No update repository configured, self-update disabled");
            None
        }
    };

    let mut flush_interval = interval(config.flush_interval);
    flush_interval.tick().await; // discard first tick, which is instantaneous
    let mut update_interval = interval(config.update_interval);
    update_interval.tick().await;

    let shutdown = termination_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = flush_interval.tick() => {
                match flusher.flush().await {
                    FlushOutcome::Flushed(count) => info!("Uploaded and cleared {count} messages"),
                    FlushOutcome::Retained(count) => info!("Retained {count} messages for the next cycle"),
                    FlushOutcome::Empty | FlushOutcome::Aborted => {}
                }
            }
            _ = update_interval.tick() => {
                let Some(updater) = updater.as_ref() else { continue };
                if updater.check_for_update().await {
                    match updater.update_and_restart().await {
                        Ok(()) => {
                            // The replacement is running; this instance steps
                            // aside and abandons any other in-flight work.
                            info!("Replacement launched, terminating this instance");
                            std::process::exit(0);
                        }
                        Err(e) => {
                            error!("Self-update failed, continuing on the current revision: {e}");
                        }
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Termination signal received, shutting down");
                break;
            }
        }
    }

    // In-flight appends drain ahead of the shutdown command in the store's
    // single-consumer queue.
    ingest_cancel.cancel();
    if store.shutdown().is_err() {
        error!("Message store already stopped");
    }
    if tokio::time::timeout(STORE_SHUTDOWN_TIMEOUT, store_task)
        .await
        .is_err()
    {
        error!("Timed out waiting for the message store to stop");
    }
    info!("Shutdown complete");
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        #[allow(clippy::expect_used)]
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
