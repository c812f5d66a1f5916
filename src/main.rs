use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use qianfan_chat::core;
use qianfan_chat::server;
use qianfan_chat::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    core::logging::init(&state.paths);

    let settings = state.config.load_settings()?;
    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(settings.server.port);
    let bind_addr = format!("{}:{}", settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    let credentials = state.credentials.status(&settings.qianfan);
    if !credentials.configured {
        tracing::warn!("Qianfan AK/SK not configured yet; enter them in the sidebar");
    }
    tracing::info!("{} listening on http://{}", settings.app.title, addr);

    let app: Router = server::router::router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
