//! Request handlers

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Json, Sse};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use uuid::Uuid;

use crate::db::models::{Coordinates, Priority, TourStatus};
use crate::db::stops::{NewStop, NewStopItem, StopUpdate};
use crate::db::tours::{NewTour, TourUpdate};
use crate::db::{customers, evidence};
use crate::error::{Error, Result};
use crate::geo::navigation;
use crate::import::candidate::CorrectedAddress;
use crate::import::{ImportBatch, ImportPipeline, Resolution};
use crate::tracking::PositionFix;

use super::AppState;

// ---------------------------------------------------------------------------
// Tours
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListToursQuery {
    pub pharmacy_id: Uuid,
    pub status: Option<String>,
}

pub async fn list_tours(
    State(state): State<AppState>,
    Query(query): Query<ListToursQuery>,
) -> Result<impl IntoResponse> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            TourStatus::from_str(raw)
                .ok_or_else(|| Error::Validation(format!("unknown status '{}'", raw)))?,
        ),
        None => None,
    };

    let tours = state.tours.list_tours(query.pharmacy_id, status).await?;
    Ok(Json(tours))
}

#[derive(Debug, Deserialize)]
pub struct CreateTourRequest {
    pub pharmacy_id: Uuid,
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub driver_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

pub async fn create_tour(
    State(state): State<AppState>,
    Json(request): Json<CreateTourRequest>,
) -> Result<impl IntoResponse> {
    let date = request.date.unwrap_or_else(|| Utc::now().date_naive());
    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Tour {}", date.format("%d.%m.%Y")));

    let tour = state
        .tours
        .create_tour(NewTour {
            pharmacy_id: request.pharmacy_id,
            name,
            date,
            driver_id: request.driver_id,
            created_by: request.created_by,
        })
        .await?;
    Ok(Json(tour))
}

pub async fn get_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.get_tour(tour_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTourRequest {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub driver_id: Option<Uuid>,
    /// Unassign the courier; wins over `driver_id`
    #[serde(default)]
    pub remove_driver: bool,
}

pub async fn update_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
    Json(request): Json<UpdateTourRequest>,
) -> Result<impl IntoResponse> {
    let driver_id = if request.remove_driver {
        Some(None)
    } else {
        request.driver_id.map(Some)
    };

    let tour = state
        .tours
        .update_tour(
            tour_id,
            TourUpdate {
                name: request.name,
                date: request.date,
                driver_id,
            },
        )
        .await?;
    Ok(Json(tour))
}

pub async fn start_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.start_tour(tour_id).await?))
}

pub async fn complete_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.complete_tour(tour_id).await?))
}

pub async fn cancel_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.cancel_tour(tour_id).await?))
}

pub async fn delete_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.tours.delete_tour(tour_id).await?;
    Ok(Json(json!({ "deleted": tour_id })))
}

pub async fn tour_stats(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.tour_stats(tour_id).await?))
}

pub async fn tour_navigation(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let stops = state.tours.stops_for_tour(tour_id).await?;
    let url = navigation::tour_url(&stops);
    Ok(Json(json!({ "url": url })))
}

pub async fn tour_track(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.aggregator.tour_track(tour_id).await?))
}

pub async fn upload_tour_pdf(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let media = state
        .media
        .as_ref()
        .ok_or_else(|| Error::Config("object store not configured".into()))?;
    let url = media.upload_tour_pdf(tour_id, body.to_vec()).await?;
    Ok(Json(json!({ "url": url })))
}

// ---------------------------------------------------------------------------
// Stops
// ---------------------------------------------------------------------------

pub async fn list_stops(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.stops_for_tour(tour_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddStopRequest {
    pub customer_id: Option<Uuid>,
    pub customer_name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default = "default_package_count")]
    pub package_count: i64,
    #[serde(default)]
    pub cash_amount: f64,
    pub priority: Option<Priority>,
    pub stop_notes: Option<String>,
    pub added_by: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<AddStopItem>,
    /// Suppress the automatic reoptimization on active tours
    #[serde(default)]
    pub skip_optimize: bool,
}

fn default_package_count() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct AddStopItem {
    #[serde(default = "default_package_count")]
    pub quantity: i64,
    pub article_name: String,
    pub package_size: Option<String>,
    pub manufacturer_code: Option<String>,
}

pub async fn add_stop(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
    Json(request): Json<AddStopRequest>,
) -> Result<impl IntoResponse> {
    let skip_optimize = request.skip_optimize;
    let stop = state
        .tours
        .add_stop(
            tour_id,
            NewStop {
                customer_id: request.customer_id,
                customer_name: request.customer_name,
                street: request.street,
                postal_code: request.postal_code,
                city: request.city,
                phone: request.phone,
                latitude: request.latitude,
                longitude: request.longitude,
                package_count: request.package_count,
                cash_amount: request.cash_amount,
                priority: request.priority,
                stop_notes: request.stop_notes,
                added_by: request.added_by,
                items: request
                    .items
                    .into_iter()
                    .map(|item| NewStopItem {
                        quantity: item.quantity,
                        article_name: item.article_name,
                        package_size: item.package_size,
                        manufacturer_code: item.manufacturer_code,
                    })
                    .collect(),
            },
        )
        .await?;

    // Active tours re-optimize after a mid-run insertion; bulk import
    // suppresses this and optimizes once at the end instead
    let tour = state.tours.get_tour(tour_id).await?;
    if tour.status == TourStatus::Active && !skip_optimize {
        if let Err(e) = state.optimizer.optimize_route(tour_id).await {
            tracing::debug!("Auto-optimization after add skipped: {}", e);
        }
    }

    Ok(Json(stop))
}

pub async fn get_stop(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.tours.get_stop(stop_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStopRequest {
    pub customer_name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub package_count: Option<i64>,
    pub cash_amount: Option<f64>,
    pub priority: Option<Priority>,
    pub stop_notes: Option<String>,
}

pub async fn update_stop(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    Json(request): Json<UpdateStopRequest>,
) -> Result<impl IntoResponse> {
    let stop = state
        .tours
        .update_stop(
            stop_id,
            StopUpdate {
                customer_name: request.customer_name,
                street: request.street.map(Some),
                postal_code: request.postal_code.map(Some),
                city: request.city.map(Some),
                phone: request.phone.map(Some),
                latitude: request.latitude.map(Some),
                longitude: request.longitude.map(Some),
                package_count: request.package_count,
                cash_amount: request.cash_amount,
                priority: request.priority,
                stop_notes: request.stop_notes.map(Some),
            },
        )
        .await?;
    Ok(Json(stop))
}

pub async fn delete_stop(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.tours.delete_stop(stop_id).await?;
    Ok(Json(json!({ "deleted": stop_id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteStopRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn complete_stop(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    request: Option<Json<CompleteStopRequest>>,
) -> Result<impl IntoResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let position = match (request.latitude, request.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
        _ => None,
    };

    Ok(Json(state.tours.complete_stop(stop_id, position).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SkipStopRequest {
    pub reason: Option<String>,
}

pub async fn skip_stop(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    request: Option<Json<SkipStopRequest>>,
) -> Result<impl IntoResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .tours
            .skip_stop(stop_id, request.reason.as_deref())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleStopRequest {
    pub date: NaiveDate,
    pub reason: Option<String>,
}

pub async fn reschedule_stop(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    Json(request): Json<RescheduleStopRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state
            .tours
            .reschedule_stop(stop_id, request.date, request.reason.as_deref())
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CashRequest {
    pub amount: Option<f64>,
    pub notes: Option<String>,
}

pub async fn mark_cash_collected(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    request: Option<Json<CashRequest>>,
) -> Result<impl IntoResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .tours
            .mark_cash_collected(stop_id, request.amount, request.notes.as_deref())
            .await?,
    ))
}

pub async fn stop_items(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        crate::db::stops::list_items(state.tours.pool(), stop_id).await?,
    ))
}

pub async fn stop_navigation(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let stop = state.tours.get_stop(stop_id).await?;
    Ok(Json(json!({ "url": navigation::navigation_url(&stop) })))
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub stop_ids: Vec<Uuid>,
}

pub async fn reorder_stops(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
    Json(request): Json<ReorderRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state.tours.reorder_stops(tour_id, &request.stop_ids).await?,
    ))
}

pub async fn optimize_route(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let outcome = state.optimizer.optimize_route(tour_id).await?;
    let stops = state.tours.stops_for_tour(tour_id).await?;
    Ok(Json(json!({ "outcome": outcome, "stops": stops })))
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

pub async fn stop_evidence(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let db = state.tours.pool();
    let photos = evidence::photos_for_stop(db, stop_id).await?;
    let signature = evidence::signature_for_stop(db, stop_id).await?;
    Ok(Json(json!({ "photos": photos, "signature": signature })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotoQuery {
    pub caption: Option<String>,
}

pub async fn upload_stop_photo(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    Query(query): Query<PhotoQuery>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let media = state
        .media
        .as_ref()
        .ok_or_else(|| Error::Config("object store not configured".into()))?;
    let photo = media
        .upload_stop_photo(stop_id, body.to_vec(), query.caption.as_deref())
        .await?;
    Ok(Json(photo))
}

pub async fn delete_stop_photo(
    State(state): State<AppState>,
    Path((stop_id, photo_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let media = state
        .media
        .as_ref()
        .ok_or_else(|| Error::Config("object store not configured".into()))?;
    media.delete_stop_photo(stop_id, photo_id).await?;
    Ok(Json(json!({ "deleted": photo_id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SignatureQuery {
    pub signer_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn upload_signature(
    State(state): State<AppState>,
    Path(stop_id): Path<Uuid>,
    Query(query): Query<SignatureQuery>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let media = state
        .media
        .as_ref()
        .ok_or_else(|| Error::Config("object store not configured".into()))?;

    let position = match (query.latitude, query.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
        _ => None,
    };
    let signature = media
        .upload_signature(stop_id, body.to_vec(), query.signer_name.as_deref(), position)
        .await?;
    Ok(Json(signature))
}

// ---------------------------------------------------------------------------
// Import pipeline
// ---------------------------------------------------------------------------

pub async fn start_import(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
    Json(batch): Json<ImportBatch>,
) -> Result<impl IntoResponse> {
    let tour = state.tours.get_tour(tour_id).await?;

    let mut pipeline = ImportPipeline::new(
        state.tours.clone(),
        state.optimizer.clone(),
        state.feed.clone(),
        tour_id,
        tour.pharmacy_id,
        batch.candidates.clone(),
    );
    let status = pipeline.start(&batch).await?;

    state.imports.insert(pipeline).await;
    Ok(Json(status))
}

pub async fn import_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let pipeline = state.imports.get(batch_id).await?;
    let status = pipeline.lock().await.status();
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResumeRequest {
    /// Import the paused candidate with the supplied corrections
    Corrected {
        #[serde(flatten)]
        corrected: CorrectedAddress,
    },
    /// Import the paused candidate as-is
    Skip,
}

pub async fn resume_import(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<ResumeRequest>,
) -> Result<impl IntoResponse> {
    let resolution = match request {
        ResumeRequest::Corrected { corrected } => Resolution::Corrected(corrected),
        ResumeRequest::Skip => Resolution::SkipAsIs,
    };

    let pipeline = state.imports.get(batch_id).await?;
    let status = pipeline.lock().await.resume(resolution).await?;
    Ok(Json(status))
}

pub async fn cancel_import(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let pipeline = state.imports.get(batch_id).await?;
    let status = pipeline.lock().await.cancel()?;
    Ok(Json(status))
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListCustomersQuery {
    pub pharmacy_id: Uuid,
    pub q: Option<String>,
}

pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<ListCustomersQuery>,
) -> Result<impl IntoResponse> {
    let db = state.tours.pool();
    let result = match query.q.as_deref().filter(|q| q.len() >= 2) {
        Some(q) => customers::search(db, query.pharmacy_id, q).await?,
        None => customers::list(db, query.pharmacy_id).await?,
    };
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub pharmacy_id: Option<Uuid>,
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub delivery_notes: Option<String>,
    pub access_info: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CustomerRequest {
    fn to_new_customer(&self) -> customers::NewCustomer {
        customers::NewCustomer {
            name: self.name.clone(),
            street: self.street.clone(),
            postal_code: self.postal_code.clone(),
            city: self.city.clone(),
            phone: self.phone.clone(),
            delivery_notes: self.delivery_notes.clone(),
            access_info: self.access_info.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

pub async fn create_customer(
    State(state): State<AppState>,
    Json(request): Json<CustomerRequest>,
) -> Result<impl IntoResponse> {
    let pharmacy_id = request
        .pharmacy_id
        .ok_or_else(|| Error::Validation("pharmacy_id is required".into()))?;
    let customer =
        customers::insert(state.tours.pool(), pharmacy_id, &request.to_new_customer()).await?;
    Ok(Json(customer))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(customers::get(state.tours.pool(), customer_id).await?))
}

pub async fn update_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<CustomerRequest>,
) -> Result<impl IntoResponse> {
    let customer =
        customers::update(state.tours.pool(), customer_id, &request.to_new_customer()).await?;
    Ok(Json(customer))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    customers::delete(state.tours.pool(), customer_id).await?;
    Ok(Json(json!({ "deleted": customer_id })))
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

pub async fn latest_positions(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.aggregator.latest_now().await?))
}

#[derive(Debug, Deserialize)]
pub struct ReportPositionRequest {
    pub tour_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

pub async fn report_position(
    State(state): State<AppState>,
    Path(driver_id): Path<Uuid>,
    Json(request): Json<ReportPositionRequest>,
) -> Result<impl IntoResponse> {
    state
        .tracking
        .report_position(
            driver_id,
            request.tour_id,
            PositionFix {
                latitude: request.latitude,
                longitude: request.longitude,
                accuracy: request.accuracy,
                heading: request.heading,
                speed: request.speed,
                recorded_at: request.recorded_at.unwrap_or_else(Utc::now),
            },
        )
        .await?;
    Ok(Json(json!({ "recorded": true })))
}

pub async fn active_tour(
    State(state): State<AppState>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    match state.tours.active_tour_for_driver(driver_id).await? {
        Some((tour, stops)) => Ok(Json(json!({ "tour": tour, "stops": stops }))),
        None => Ok(Json(json!({ "tour": null, "stops": [] }))),
    }
}

pub async fn enter_driving_mode(
    State(state): State<AppState>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let tour_id = state.tracking.enter_driving_mode(driver_id).await?;
    Ok(Json(json!({ "tracking": true, "tour_id": tour_id })))
}

pub async fn exit_driving_mode(
    State(state): State<AppState>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.tracking.exit_driving_mode(driver_id).await;
    Ok(Json(json!({ "tracking": false })))
}

pub async fn tracking_status(
    State(state): State<AppState>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let reporter = state.tracking.reporter(driver_id).await;
    let status = reporter.status().borrow().clone();
    Ok(Json(json!({
        "tracking": reporter.is_tracking().await,
        "tour_id": reporter.tracked_tour().await,
        "status": status,
    })))
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    state.broadcaster.handle_connection()
}
