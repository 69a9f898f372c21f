use anyhow::Context;
use clap::Parser;
use rapport_server::config::{Args, Config};
use rapport_server::{app, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let state = AppState::new(&config)?;
    let db = state.db.clone();
    let app = app(state);

    tracing::info!(listen = %config.listen, db = ?config.db_path, "listening");
    axum::Server::try_bind(&config.listen)
        .with_context(|| format!("Error binding {}", config.listen))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    db.flush_async().await.context("Error flushing database")?;
    tracing::info!("shut down");
    Ok(())
}
