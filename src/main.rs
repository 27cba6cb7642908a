//! Delivery service entry point
//!
//! Wires the persistence gateway, service clients, domain services, and the
//! REST/SSE surface together and serves them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botendienst::api;
use botendienst::config::Config;
use botendienst::db;
use botendienst::events::ChangeFeed;
use botendienst::geo::{GeocodingClient, RoutingClient};
use botendienst::import::ImportRegistry;
use botendienst::sse::SseBroadcaster;
use botendienst::storage::{MediaStore, ObjectStoreClient};
use botendienst::tour::{RouteOptimizer, TourLocks, TourService};
use botendienst::tracking::{PositionAggregator, TrackingManager, UnavailableSource};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "botendienst")]
#[command(about = "Delivery tour orchestration service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5810", env = "BOTENDIENST_PORT")]
    port: u16,

    /// SQLite database file
    #[arg(short, long, default_value = "botendienst.db", env = "BOTENDIENST_DB")]
    database: PathBuf,

    /// Service configuration file (TOML)
    #[arg(short, long, env = "BOTENDIENST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botendienst=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting delivery service on port {}", args.port);

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let pool = db::init_database(&args.database)
        .await
        .context("Failed to initialize database")?;

    let feed = ChangeFeed::new(100);

    let geocoding = Some(Arc::new(
        GeocodingClient::new(&config.geocoding).context("Failed to build geocoding client")?,
    ));
    let routing = RoutingClient::from_config(&config.routing)
        .context("Failed to build routing client")?
        .map(Arc::new);
    if routing.is_none() {
        info!("No routing credential configured, heuristic ordering only");
    }

    let locks = Arc::new(TourLocks::new());
    let tours = Arc::new(TourService::new(
        pool.clone(),
        feed.clone(),
        geocoding,
        locks,
    ));
    let optimizer = Arc::new(RouteOptimizer::new(
        tours.clone(),
        routing,
        config.pharmacy.origin_address(),
        config.pharmacy.origin_coordinates(),
    ));

    let tracking = TrackingManager::spawn(
        pool.clone(),
        feed.clone(),
        // Couriers report over HTTP; no in-process device source here
        Box::new(|_| Arc::new(UnavailableSource)),
        config.tracking.report_interval(),
    );
    let aggregator = Arc::new(PositionAggregator::new(
        pool.clone(),
        &feed,
        config.tracking.poll_interval(),
    ));

    let media = ObjectStoreClient::from_config(&config.storage)
        .context("Failed to build object store client")?
        .map(|client| {
            Arc::new(MediaStore::new(
                Arc::new(client),
                pool.clone(),
                feed.clone(),
            ))
        });
    if media.is_none() {
        info!("No object store configured, evidence uploads disabled");
    }

    let app_state = api::AppState {
        tours,
        optimizer,
        imports: Arc::new(ImportRegistry::new()),
        tracking,
        aggregator,
        media,
        feed: feed.clone(),
        broadcaster: SseBroadcaster::new(feed),
        port: args.port,
    };

    let app = api::create_router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
