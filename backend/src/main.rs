use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

mod config;
mod domain;
mod pages;
mod rest;
mod storage;

use config::Config;
use domain::StudentService;
use rest::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("connecting storage backend for {}", config.database_url);

    let store = storage::connect(&config).await?;
    let state = AppState::new(StudentService::new(store));

    // CORS for API consumers; the form pages are same-origin anyway
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(rest::health))
        .route("/", get(pages::home))
        .route("/register", get(pages::register_form).post(pages::register_submit))
        .route("/progress", get(pages::progress_form).post(pages::progress_submit))
        .route("/update", get(pages::update_form).post(pages::update_submit))
        .route("/admin", get(pages::admin))
        .route("/api/students", get(rest::list_students))
        .route("/api/register", post(rest::register))
        .layer(cors)
        .with_state(state);

    info!("starting server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
