use std::time::Duration;

mod app;
mod auth;
mod config;
mod credentials;
mod delivery;
mod state;

use crate::state::AppState;

const RESET_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "credvault=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    // Storage hygiene only: expired tokens are already refused at read time.
    let credentials = app_state.credentials.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RESET_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = credentials.purge_expired_resets().await {
                tracing::warn!(error = %e, "expired reset sweep failed");
            }
        }
    });

    let config = app_state.config.clone();
    app::serve(&config, app::build_app(app_state)).await
}
