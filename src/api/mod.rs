//! REST API for the delivery service
//!
//! All external interaction runs through these endpoints plus the SSE feed;
//! there is no bespoke wire protocol.

pub mod handlers;

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::events::ChangeFeed;
use crate::import::ImportRegistry;
use crate::sse::SseBroadcaster;
use crate::storage::MediaStore;
use crate::tour::{RouteOptimizer, TourService};
use crate::tracking::{PositionAggregator, TrackingManager};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tours: Arc<TourService>,
    pub optimizer: Arc<RouteOptimizer>,
    pub imports: Arc<ImportRegistry>,
    pub tracking: Arc<TrackingManager>,
    pub aggregator: Arc<PositionAggregator>,
    /// Absent when no object store is configured; evidence uploads 503
    pub media: Option<Arc<MediaStore>>,
    pub feed: ChangeFeed,
    pub broadcaster: SseBroadcaster,
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Tours
                .route("/tours", get(handlers::list_tours).post(handlers::create_tour))
                .route(
                    "/tours/:tour_id",
                    get(handlers::get_tour)
                        .patch(handlers::update_tour)
                        .delete(handlers::delete_tour),
                )
                .route("/tours/:tour_id/start", post(handlers::start_tour))
                .route("/tours/:tour_id/complete", post(handlers::complete_tour))
                .route("/tours/:tour_id/cancel", post(handlers::cancel_tour))
                .route("/tours/:tour_id/stats", get(handlers::tour_stats))
                .route("/tours/:tour_id/navigation", get(handlers::tour_navigation))
                .route("/tours/:tour_id/track", get(handlers::tour_track))
                .route("/tours/:tour_id/pdf", post(handlers::upload_tour_pdf))
                // Stops
                .route(
                    "/tours/:tour_id/stops",
                    get(handlers::list_stops).post(handlers::add_stop),
                )
                .route("/tours/:tour_id/reorder", post(handlers::reorder_stops))
                .route("/tours/:tour_id/optimize", post(handlers::optimize_route))
                .route(
                    "/stops/:stop_id",
                    get(handlers::get_stop)
                        .patch(handlers::update_stop)
                        .delete(handlers::delete_stop),
                )
                .route("/stops/:stop_id/complete", post(handlers::complete_stop))
                .route("/stops/:stop_id/skip", post(handlers::skip_stop))
                .route("/stops/:stop_id/reschedule", post(handlers::reschedule_stop))
                .route("/stops/:stop_id/cash", post(handlers::mark_cash_collected))
                .route("/stops/:stop_id/items", get(handlers::stop_items))
                .route("/stops/:stop_id/navigation", get(handlers::stop_navigation))
                .route("/stops/:stop_id/evidence", get(handlers::stop_evidence))
                .route("/stops/:stop_id/photos", post(handlers::upload_stop_photo))
                .route(
                    "/stops/:stop_id/photos/:photo_id",
                    delete(handlers::delete_stop_photo),
                )
                .route("/stops/:stop_id/signature", post(handlers::upload_signature))
                // Import pipeline
                .route("/tours/:tour_id/import", post(handlers::start_import))
                .route("/imports/:batch_id", get(handlers::import_status))
                .route("/imports/:batch_id/resume", post(handlers::resume_import))
                .route("/imports/:batch_id/cancel", post(handlers::cancel_import))
                // Customers
                .route(
                    "/customers",
                    get(handlers::list_customers).post(handlers::create_customer),
                )
                .route(
                    "/customers/:customer_id",
                    get(handlers::get_customer)
                        .patch(handlers::update_customer)
                        .delete(handlers::delete_customer),
                )
                // Tracking
                .route("/positions/latest", get(handlers::latest_positions))
                .route("/drivers/:driver_id/positions", post(handlers::report_position))
                .route("/drivers/:driver_id/tour", get(handlers::active_tour))
                .route(
                    "/drivers/:driver_id/driving-mode/enter",
                    post(handlers::enter_driving_mode),
                )
                .route(
                    "/drivers/:driver_id/driving-mode/exit",
                    post(handlers::exit_driving_mode),
                )
                .route("/drivers/:driver_id/tracking", get(handlers::tracking_status))
                // SSE events
                .route("/events", get(handlers::sse_handler)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "botendienst",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "sse_clients": state.broadcaster.client_count(),
    }))
}
