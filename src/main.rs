use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenancy_service::{
    build_router,
    config::AppConfig,
    crypto::{derive_signing_key, CredentialCipher},
    error::AppError,
    services::{
        pool::PgConnectionOpener, registry, CredentialCache, CredentialSource, PoolManager,
        TenantDirectory, TenantRegistry, TenantResolver, TokenService,
    },
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = AppConfig::from_env()?;

    init_tracing(&config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting tenancy service"
    );

    // Registry database
    let pg = registry::create_pool(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    registry::run_migrations(&pg).await?;

    // Key material: both subkeys come from the one application secret.
    let cipher = Arc::new(CredentialCipher::from_secret(&config.security.app_secret)?);
    let signing_key = derive_signing_key(&config.security.app_secret)?;
    tracing::info!("Key material derived");

    let registry = TenantRegistry::new(pg, cipher);

    let resolver = Arc::new(TenantResolver::new(
        Arc::new(registry.clone()) as Arc<dyn TenantDirectory>,
        &config.tenancy.root_domain,
        &config.tenancy.default_tenant_subdomain,
    ));

    let tokens = TokenService::new(&signing_key, config.token.ttl_minutes);

    let credentials = Arc::new(CredentialCache::new(
        Arc::new(registry.clone()) as Arc<dyn CredentialSource>,
        config.credential_cache.ttl,
    ));
    let pools = Arc::new(PoolManager::new(
        Arc::new(PgConnectionOpener),
        credentials,
        config.pool.clone(),
    ));
    let sweeper = pools.spawn_sweeper();
    tracing::info!("Pool manager initialized, idle sweeper running");

    let state = AppState {
        config: config.clone(),
        registry,
        resolver,
        tokens,
        pools,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Service shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
