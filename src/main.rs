use std::sync::Arc;

use dispatchd::api::{ApiState, routes};
use dispatchd::config::Settings;
use dispatchd::lock::LockManager;
use dispatchd::services::{ServiceRegistry, SimpleService};
use dispatchd::store::{KvStore, RedisStore};
use dispatchd::tasks::TaskRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env()?;

    eprintln!("dispatchd v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Redis: {}", settings.redis_url);
    eprintln!("   API:   http://{}", settings.bind_addr);

    let store: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(&settings.redis_url)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to connect to {}: {}", settings.redis_url, e);
                std::process::exit(1);
            })
            .with_prefix(settings.key_prefix.clone()),
    );

    let registry = Arc::new(TaskRegistry::new(Arc::clone(&store)));
    let lock = LockManager::new(
        Arc::clone(&store),
        settings.lock_ttl,
        settings.lock_acquire_timeout,
    );

    // Deployment-specific service plugins would be registered here; the
    // built-in gives a working default.
    let mut services = ServiceRegistry::new();
    services.register(
        "train",
        Arc::new(SimpleService::new("Training cluster", "default-pool")),
    );

    let app = routes(ApiState {
        services: Arc::new(services),
        registry,
        lock,
    });

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "Control plane listening");
    axum::serve(listener, app).await?;

    Ok(())
}
