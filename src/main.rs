use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use hatch_backend::auth::jwt::JwtService;
use hatch_backend::config::AppConfig;
use hatch_backend::db;
use hatch_backend::notifier::WebhookNotifier;
use hatch_backend::routes::create_router;
use hatch_backend::s3::build_storage;
use hatch_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        app_base_url = %config.app_base_url,
        sign_token_ttl_days = config.sign_token_ttl_days,
        webhook_notifier = config.notifier_webhook_url.is_some(),
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;
    let storage = build_storage(&config).await?;
    let jwt = JwtService::from_config(&config)?;
    let webhook = config.notifier_webhook_url.clone();
    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;

    let mut state = AppState::new(pool, config, storage, jwt);
    if let Some(endpoint) = webhook {
        state = state.with_notifier(Arc::new(WebhookNotifier::new(Client::new(), endpoint)));
    }

    let router = create_router(state);
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = signal::ctrl_c().await;
        tracing::info!("api received shutdown signal");
    })
    .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
