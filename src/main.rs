use anyhow::Context;
use book_exchange::{config::AppConfig, logging, routes, service::TradeService, state::AppState};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOOKSWAP_ENV").ok())
        .unwrap_or_else(|| "dev".to_string());

    let config = AppConfig::load(&env)?;
    logging::init_logging(&config)?;

    let db = sled::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    let service = TradeService::new(Arc::new(db))?;
    let state = Arc::new(AppState::new(service));

    let app = routes::build_router(Arc::clone(&state)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(env = %env, "book-exchange listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    state.service.flush()?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
    }
}
