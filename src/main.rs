use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nova_backend::config::Config;
use nova_backend::middleware::rate_limit::{rate_limit, RateLimiter};
use nova_backend::router::build_router;
use nova_backend::store::{MemoryStore, PostgresStore, Store};
use nova_backend::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nova_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PostgresStore::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, falling back to the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let limiter = config
        .redis_url
        .as_deref()
        .map(|url| RateLimiter::new(url, config.rate_limit_window(), config.rate_limit_requests))
        .transpose()?
        .map(Arc::new);

    let addr = SocketAddr::new(config.server_host.parse()?, config.server_port);

    let mut app = build_router(AppState::new(store, config));
    if let Some(limiter) = limiter {
        app = app.layer(axum::middleware::from_fn_with_state(limiter, rate_limit));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
