use std::net::SocketAddr;
use std::sync::Arc;

use sunat_ruc_api::browser::ChromiumLauncher;
use sunat_ruc_api::cache::MokaCacheStore;
use sunat_ruc_api::clock::{Clock, SystemClock};
use sunat_ruc_api::config::Config;
use sunat_ruc_api::extractor::{ExtractorSettings, SunatExtractor};
use sunat_ruc_api::handlers::AppState;
use sunat_ruc_api::rate_limiter::{ClientKeySource, FixedWindowLimiter, RateLimitGate};
use sunat_ruc_api::server::{build_router, shutdown_signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the result cache, the rate limiter and
/// the browser-backed extractor, then serves HTTP until a shutdown signal.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sunat_ruc_api=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let cache = Arc::new(MokaCacheStore::new(
        config.cache_ttl(),
        config.cache_max_entries,
        clock.clone(),
    ));
    tracing::info!(
        "Result cache initialized ({}s TTL, {} capacity)",
        config.cache_ttl_secs,
        config.cache_max_entries
    );

    let limiter = Arc::new(FixedWindowLimiter::new(
        config.rate_limit_max_requests,
        config.rate_limit_window(),
        clock,
    ));
    let key_source = ClientKeySource::from_trust_proxy_headers(config.trust_proxy_headers);
    tracing::info!(
        "Rate limiter initialized ({} requests / {}s per client, keyed on {:?})",
        config.rate_limit_max_requests,
        config.rate_limit_window_secs,
        key_source
    );

    let launcher = Arc::new(ChromiumLauncher::from_config(&config));
    let extractor = Arc::new(SunatExtractor::new(
        launcher,
        ExtractorSettings::from_config(&config),
    ));
    tracing::info!(
        "✓ SUNAT extractor initialized: {} ({} browser slots)",
        config.portal_url,
        config.max_concurrent_browsers
    );

    let app_state = Arc::new(AppState { cache, extractor });
    let app = build_router(app_state, RateLimitGate::new(limiter, key_source));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
