mod analytics;
mod app;
mod auth;
mod chat;
mod config;
mod content;
mod error;
mod site;
mod state;
mod storage;
mod users;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "webcenter=debug,axum=info,tower_http=info".to_string());
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

    let state = state::AppState::init().await?;

    sqlx::migrate!("./migrations").run(&state.db).await?;

    match state.config.admin_seed_password.as_deref() {
        Some(password) => auth::services::seed_admin(state.users.as_ref(), password).await?,
        None => tracing::warn!("ADMIN_SEED_PASSWORD not set; admin account not seeded"),
    }

    app::serve(app::build_app(state)).await
}
