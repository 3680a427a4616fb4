use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use shared::{JobType, NotificationJob, Product, ResourceKey, ReservationJob};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::gateway::{Gateway, RejectReason, ReservationResponse};
use crate::handlers::Workers;
use crate::notifications::create_push_notifications_jobs;

pub const STATUS_IN_PROCESS: &str = "Reservation in process";
pub const STATUS_FAILED: &str = "Reservation failed";
pub const STATUS_SEATS_BLOCKED: &str = "Reservation are blocked";
pub const STATUS_OUT_OF_STOCK: &str = "Not enough stock available";
pub const STATUS_PRODUCT_NOT_FOUND: &str = "Product not found";
pub const STATUS_STORE_UNAVAILABLE: &str = "Counter store unavailable";

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub workers: Arc<Workers>,
    pub catalog: Arc<Catalog>,
    pub initial_seats: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatsResponse {
    pub number_of_available_seats: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub current_quantity: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReservationResponse {
    pub status: String,
    pub item_id: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJobsResponse {
    pub status: String,
    pub job_ids: Vec<Uuid>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/available_seats", get(available_seats))
        .route("/reserve_seat", get(reserve_seat))
        .route("/process", get(process))
        .route("/list_products", get(list_products))
        .route("/list_products/:item_id", get(product_detail))
        .route("/reserve_product/:item_id", get(reserve_product))
        .route("/push_notifications", post(push_notifications))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn store_unavailable(e: impl std::fmt::Display) -> Response {
    tracing::error!("Counter store query failed: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(StatusResponse::new(STATUS_STORE_UNAVAILABLE)),
    )
        .into_response()
}

pub async fn available_seats(State(state): State<AppState>) -> Response {
    match state
        .gateway
        .query_availability(&ResourceKey::seats(), state.initial_seats)
        .await
    {
        Ok(seats) => Json(SeatsResponse {
            number_of_available_seats: seats,
        })
        .into_response(),
        Err(e) => store_unavailable(e),
    }
}

pub async fn reserve_seat(State(state): State<AppState>) -> Json<StatusResponse> {
    let job = ReservationJob::new(ResourceKey::seats());
    let status = match state.gateway.request_reservation(JobType::ReserveSeat, job).await {
        ReservationResponse::Accepted { .. } => STATUS_IN_PROCESS,
        ReservationResponse::Rejected(RejectReason::Blocked) => STATUS_SEATS_BLOCKED,
        ReservationResponse::Rejected(RejectReason::QueueUnavailable) => STATUS_FAILED,
    };
    Json(StatusResponse::new(status))
}

pub async fn process(State(state): State<AppState>) -> Response {
    match state.workers.start().await {
        Ok(started) => {
            if started {
                tracing::info!("Queue processing started");
            }
            Json(StatusResponse::new("Queue processing")).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to start workers: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusResponse::new("Queue processing failed")),
            )
                .into_response()
        }
    }
}

pub async fn list_products(State(state): State<AppState>) -> Json<Vec<Product>> {
    Json(state.catalog.products().to_vec())
}

/// Unparseable ids are answered the same way as unknown ones.
fn find_product(catalog: &Catalog, item_id: &str) -> Option<Product> {
    item_id
        .parse::<u32>()
        .ok()
        .and_then(|id| catalog.get(id))
        .cloned()
}

pub async fn product_detail(State(state): State<AppState>, Path(item_id): Path<String>) -> Response {
    let Some(product) = find_product(&state.catalog, &item_id) else {
        return Json(StatusResponse::new(STATUS_PRODUCT_NOT_FOUND)).into_response();
    };

    match state
        .gateway
        .query_availability(&product.resource_key(), product.initial_available_quantity)
        .await
    {
        Ok(current_quantity) => Json(ProductDetail {
            product,
            current_quantity,
        })
        .into_response(),
        Err(e) => store_unavailable(e),
    }
}

pub async fn reserve_product(State(state): State<AppState>, Path(item_id): Path<String>) -> Response {
    let Some(product) = find_product(&state.catalog, &item_id) else {
        return Json(StatusResponse::new(STATUS_PRODUCT_NOT_FOUND)).into_response();
    };

    let job = ReservationJob::new(product.resource_key());
    let status = match state.gateway.request_reservation(JobType::ReserveProduct, job).await {
        ReservationResponse::Accepted { .. } => STATUS_IN_PROCESS,
        ReservationResponse::Rejected(RejectReason::Blocked) => STATUS_OUT_OF_STOCK,
        ReservationResponse::Rejected(RejectReason::QueueUnavailable) => STATUS_FAILED,
    };

    Json(ProductReservationResponse {
        status: status.to_string(),
        item_id: product.item_id,
    })
    .into_response()
}

pub async fn push_notifications(
    State(state): State<AppState>,
    Json(jobs): Json<Vec<NotificationJob>>,
) -> Response {
    match create_push_notifications_jobs(state.gateway.queue().as_ref(), &jobs).await {
        Ok(job_ids) => Json(NotificationJobsResponse {
            status: "Notification jobs created".to_string(),
            job_ids,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to create notification jobs: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusResponse::new("Notification jobs failed")),
            )
                .into_response()
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
