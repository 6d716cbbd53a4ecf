use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metered_proxy::{
    metrics::register_metrics,
    oracle::{FixedBalanceOracle, NodeBalanceOracle},
    routes,
    state::build_http_client,
    AppState, EndpointRegistry, Oracle, ProxyConfig, Store,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ProxyConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let max_body_bytes = config.max_body_bytes;

    tracing::info!("Starting metered-proxy on port {}", port);
    tracing::info!("Consumer account: {}", config.meter.consumer_account);
    tracing::info!(
        "Debt accrual: {}",
        if config.meter.charge_throttled {
            "every request"
        } else {
            "forwarded requests only"
        }
    );

    let store = match Store::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store at {}: {e}", config.db_path);
            std::process::exit(1);
        }
    };
    let endpoints = match EndpointRegistry::open(store) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            tracing::error!("Failed to create store namespaces: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Store initialized at: {}", config.db_path);

    let seeded = config
        .seeds()
        .map_err(|e| e.to_string())
        .and_then(|seeds| endpoints.seed(&seeds).map_err(|e| e.to_string()));
    match seeded {
        Ok(n) => tracing::info!("Seeded {n} endpoints"),
        Err(e) => {
            tracing::error!("Failed to seed endpoints: {e}");
            std::process::exit(1);
        }
    }

    let http_client = build_http_client().map_err(std::io::Error::other)?;

    let oracle = match config.balance_node_url {
        Some(ref node_url) => {
            tracing::info!("Balance node: {}", node_url);
            Oracle::Node(NodeBalanceOracle::new(
                http_client.clone(),
                node_url.clone(),
                config.oracle_timeout,
            ))
        }
        None => Oracle::Fixed(Arc::new(FixedBalanceOracle::new(0))),
    };

    register_metrics();

    let state = AppState::new(config, endpoints, oracle, http_client);

    let shutdown = CancellationToken::new();
    let sweeper = state
        .dispatcher
        .sessions()
        .clone()
        .spawn_sweeper(shutdown.clone());

    let state_data = web::Data::new(state);

    let served = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("Session sweeper did not shut down cleanly: {e}");
    }

    served
}
