use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use super::extract::RequestCancel;
use crate::engine::pricing::FareEstimate;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::delivery::Delivery;
use crate::models::request::{
    CreateDeliveryRequest, EstimateRequest, ListQuery, RateRequest, ReasonRequest,
};
use crate::models::view::{DeliveryDetail, DeliveryList, PublicTracking, SenderStats};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery).get(my_deliveries))
        .route("/deliveries/estimate", post(estimate))
        .route("/deliveries/stats", get(stats))
        .route("/deliveries/track/:code", get(track))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/cancel", post(cancel_delivery))
        .route("/deliveries/:id/rate", post(rate_delivery))
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<FareEstimate>, AppError> {
    actor.require_sender()?;
    Ok(Json(state.engine.estimate(&payload)?))
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    cancel: RequestCancel,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<(StatusCode, Json<DeliveryDetail>), AppError> {
    let detail = state
        .engine
        .create_delivery(&actor, payload, cancel.token())
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn my_deliveries(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    cancel: RequestCancel,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeliveryList>, AppError> {
    let list = state
        .engine
        .my_deliveries(&actor, query, cancel.token())
        .await?;
    Ok(Json(list))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    cancel: RequestCancel,
) -> Result<Json<SenderStats>, AppError> {
    Ok(Json(state.engine.sender_stats(&actor, cancel.token()).await?))
}

/// Public: no actor headers required.
async fn track(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    cancel: RequestCancel,
) -> Result<Json<PublicTracking>, AppError> {
    Ok(Json(state.engine.track_delivery(&code, cancel.token()).await?))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
) -> Result<Json<DeliveryDetail>, AppError> {
    Ok(Json(state.engine.get_delivery(&actor, id, cancel.token()).await?))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
    payload: Option<Json<ReasonRequest>>,
) -> Result<Json<Delivery>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let delivery = state
        .engine
        .cancel_delivery(&actor, id, request, cancel.token())
        .await?;
    Ok(Json(delivery))
}

async fn rate_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
    Json(payload): Json<RateRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .engine
        .rate_delivery(&actor, id, payload, cancel.token())
        .await?;
    Ok(Json(delivery))
}
