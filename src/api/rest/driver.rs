use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use super::extract::RequestCancel;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::delivery::Delivery;
use crate::models::request::{
    AvailableQuery, ConfirmDeliveryRequest, ConfirmPickupRequest, ListQuery, ReasonRequest,
    UpdateStatusRequest, UpdateStopRequest,
};
use crate::models::stop::DeliveryStop;
use crate::models::view::{DeliveryDetail, DeliveryList};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/driver/deliveries", get(assigned))
        .route("/driver/deliveries/available", get(available))
        .route("/driver/deliveries/active", get(active))
        .route("/driver/deliveries/:id/accept", post(accept))
        .route("/driver/deliveries/:id/pickup", post(pickup))
        .route("/driver/deliveries/:id/status", post(update_status))
        .route("/driver/deliveries/:id/deliver", post(deliver))
        .route("/driver/deliveries/:id/return", post(return_delivery))
        .route(
            "/driver/deliveries/:id/stops/:stop_id/status",
            post(update_stop),
        )
}

async fn assigned(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    cancel: RequestCancel,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeliveryList>, AppError> {
    let list = state
        .engine
        .driver_deliveries(&actor, query, cancel.token())
        .await?;
    Ok(Json(list))
}

async fn available(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    cancel: RequestCancel,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    let open = state
        .engine
        .available_deliveries(&actor, query, cancel.token())
        .await?;
    Ok(Json(open))
}

async fn active(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    cancel: RequestCancel,
) -> Result<Json<DeliveryDetail>, AppError> {
    Ok(Json(state.engine.active_delivery(&actor, cancel.token()).await?))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .engine
            .accept_delivery(&actor, id, cancel.token())
            .await?,
    ))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
    payload: Option<Json<ConfirmPickupRequest>>,
) -> Result<Json<Delivery>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .confirm_pickup(&actor, id, request, cancel.token())
            .await?,
    ))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .engine
            .update_status(&actor, id, payload, cancel.token())
            .await?,
    ))
}

async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
    Json(payload): Json<ConfirmDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .engine
            .confirm_delivery(&actor, id, payload, cancel.token())
            .await?,
    ))
}

async fn return_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    cancel: RequestCancel,
    payload: Option<Json<ReasonRequest>>,
) -> Result<Json<Delivery>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .return_delivery(&actor, id, request, cancel.token())
            .await?,
    ))
}

async fn update_stop(
    State(state): State<Arc<AppState>>,
    Path((id, stop_id)): Path<(Uuid, Uuid)>,
    actor: Actor,
    cancel: RequestCancel,
    Json(payload): Json<UpdateStopRequest>,
) -> Result<Json<DeliveryStop>, AppError> {
    Ok(Json(
        state
            .engine
            .update_stop_status(&actor, id, stop_id, payload, cancel.token())
            .await?,
    ))
}
