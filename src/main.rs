use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod api;
mod config;
mod deploy;
mod dispatch;
mod function;
mod gateway;
mod handler;
mod http;
mod identity;
mod integration;
mod logger;
mod policy;
mod registry;
mod routing;
mod server;

use server::{create_reusable_listener, ServerKind};

const DEFAULT_CONFIG: &str = "gateway";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config file name without extension, e.g. `lambda_dispatch ./gateway`
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = config::Config::load_from(&config_path)?;
    logger::init(&cfg)?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg, config_path))
}

async fn async_main(
    cfg: config::Config,
    config_path: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let app_addr = cfg.get_socket_addr()?;
    let api_addr = cfg.get_api_socket_addr()?;

    let state_manager = config::create_state_manager(&config_path, cfg.gateway.persist_state);
    let definitions = state_manager.load().unwrap_or_else(|| cfg.definitions());

    let gateway = gateway::Gateway::new(cfg.gateway.settings(), function::HandlerCatalog::with_builtins());
    gateway.bootstrap(&definitions).await?;

    let app_listener = create_reusable_listener(app_addr)?;
    let api_listener = create_reusable_listener(api_addr)?;

    let state = Arc::new(config::AppState::new(
        &cfg,
        &config_path,
        Arc::new(gateway),
        state_manager,
    ));
    let app_connections = Arc::new(AtomicUsize::new(0));
    let api_connections = Arc::new(AtomicUsize::new(0));

    logger::log_server_start(&app_addr, &api_addr, &cfg);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    server::start_signal_handler(Arc::clone(&state), shutdown_tx);

    let api_server = tokio::spawn(server::start_server_loop(
        api_listener,
        Arc::clone(&state),
        Arc::clone(&api_connections),
        ServerKind::Api,
        shutdown_rx.clone(),
    ));

    server::start_server_loop(
        app_listener,
        Arc::clone(&state),
        Arc::clone(&app_connections),
        ServerKind::App,
        shutdown_rx,
    )
    .await;

    if let Err(e) = api_server.await {
        logger::log_api_error(&format!("API server task failed: {e}"));
    }

    let open = server::drain_connections(&app_connections, SHUTDOWN_GRACE).await;
    if open > 0 {
        logger::log_warning(&format!("{open} connection(s) still open at shutdown"));
    }
    state.persist().await;
    Ok(())
}
