use std::sync::Arc;

use tokio::sync::watch;

use jobscout::config::load_config;
use jobscout::sources::Sources;
use jobscout::state::AppState;
use jobscout::worker::run_worker;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let sources = Sources::from_config(&config);
    let state = match AppState::new(config, sources) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            log::error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Database at {}", state.db_path().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(run_worker(Arc::clone(&state), shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutdown requested, finishing in-flight task"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
    }
    let _ = shutdown_tx.send(true);
    let _ = worker.await;
}
