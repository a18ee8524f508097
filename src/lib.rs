pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod signaling;
pub mod store;

use anyhow::Context;

pub fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ─── Configuration ───────────────────────────────────────────────
    let app_data = config::default_data_dir();
    std::fs::create_dir_all(&app_data)
        .with_context(|| format!("Failed to create {}", app_data.display()))?;
    let app_config = config::AppConfig::load(&app_data);

    if let Err(e) = app_config.twilio.credentials() {
        log::warn!("{}; voice tokens will be refused", e);
    }

    // ─── Storage ─────────────────────────────────────────────────────
    if let Some(parent) = app_config.database_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let db = store::Store::open(&app_config.database_path)
        .with_context(|| format!("Failed to open {}", app_config.database_path.display()))?;
    log::info!("Using database {}", app_config.database_path.display());

    // ─── Server ──────────────────────────────────────────────────────
    let addr = format!("{}:{}", app_config.host, app_config.port);
    let state = signaling::AppState::new(app_config, db);
    let app = signaling::router(state);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        log::info!("Listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
