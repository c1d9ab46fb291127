//! Service entry point: loads config, prepares the database, starts the
//! daily ingestion scheduler, and serves the query API.

mod scheduler;

use api::ApiState;
use block_source::S3BlockSource;
use core_types::AppConfig;
use ingestion_service::IngestionService;
use log::{error, info};
use std::sync::Arc;
use storage::Store;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.database_url).await {
        Ok(store) => store,
        Err(err) => {
            error!("cannot open database {}: {err}", config.database_url);
            std::process::exit(1);
        }
    };
    if let Err(err) = store.init().await {
        error!("cannot initialize schema: {err}");
        std::process::exit(1);
    }

    let source = Arc::new(S3BlockSource::new(&config.s3));
    let ingestion = Arc::new(IngestionService::new(
        source,
        store.clone(),
        config.ingest.clone(),
    ));
    let cancel = ingestion.cancellation_token();

    if config.scheduler.enabled {
        let task = scheduler::run_daily(
            config.scheduler.clone(),
            ingestion.clone(),
            config.ingest.max_blocks,
            cancel.clone(),
        );
        tokio::spawn(task);
    } else {
        info!("scheduler disabled; ingestion runs on manual trigger only");
    }

    let state = ApiState {
        store,
        ingestion,
        api_key: config.api.key.clone(),
    };
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!("listening on {addr}");

    let server = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal(cancel));
    if let Err(err) = server.await {
        error!("server error: {err}");
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    cancel.cancel();
}
