use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use authgate::{AppState, ProviderClient, RedisStore, SessionBroker, Settings, TokenVault};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env().context("loading configuration")?;

    let store = RedisStore::connect(&settings.redis_url)
        .await
        .context("connecting to session store")?;
    let vault = TokenVault::from_base64(&settings.encryption_key)?;
    let provider = ProviderClient::new(settings.provider.clone())?;
    let broker = Arc::new(SessionBroker::new(
        Arc::new(store),
        provider,
        vault,
        &settings,
    ));

    let frontend_origin = settings
        .frontend_url
        .origin()
        .ascii_serialization()
        .parse::<HeaderValue>()
        .context("frontend URL is not a valid CORS origin")?;
    let cors = CorsLayer::new()
        .allow_origin(frontend_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = authgate::router(AppState::new(broker, &settings))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "session broker listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
}
