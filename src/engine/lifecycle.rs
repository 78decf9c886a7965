use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::identity::{verify_pin, IdentityMinter, OsRngMinter};
use crate::engine::pricing::{quote, FareEstimate, QuoteInput};
use crate::engine::transitions::can_transition;
use crate::error::AppError;
use crate::events::{
    AcceptedEvent, CancelledBy, CancelledEvent, CompletedEvent, DeliveryEvent, EventPublisher,
    PickedUpEvent, RequestedEvent, ReturnedEvent,
};
use crate::geo::GeoPoint;
use crate::models::actor::{Actor, Role};
use crate::models::delivery::{
    Delivery, DeliveryStatus, PackageSize, Priority, ProofPin, ProofType,
};
use crate::models::request::{
    AvailableQuery, ConfirmDeliveryRequest, ConfirmPickupRequest, CreateDeliveryRequest,
    EstimateRequest, ListQuery, RateRequest, ReasonRequest, StopInput, UpdateStatusRequest,
    UpdateStopRequest,
};
use crate::models::stop::{DeliveryStop, StopStatus};
use crate::models::tracking::TrackingEvent;
use crate::models::view::{
    DeliveryDetail, DeliveryList, Page, PublicTracking, SenderFilter, SenderStats,
};
use crate::observability::metrics::Metrics;
use crate::store::{AcceptOutcome, Completion, DeliveryStore, StoreError};

/// Tracking-code mint attempts before giving up on a create.
const MINT_ATTEMPTS: usize = 3;

/// Orchestrates every delivery state change.
///
/// The engine holds no mutable state of its own. Each state change is a
/// single conditional store update; tracking events and bus events follow
/// the commit and never undo it.
pub struct LifecycleEngine {
    store: Arc<dyn DeliveryStore>,
    events: EventPublisher,
    minter: Arc<dyn IdentityMinter>,
    config: EngineConfig,
    metrics: Metrics,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        events: EventPublisher,
        config: EngineConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            events,
            minter: Arc::new(OsRngMinter),
            config,
            metrics,
        }
    }

    pub fn with_minter(mut self, minter: Arc<dyn IdentityMinter>) -> Self {
        self.minter = minter;
        self
    }

    /// Quotes a route without touching the store.
    pub fn estimate(&self, request: &EstimateRequest) -> Result<FareEstimate, AppError> {
        let input = quote_input(request)?;
        Ok(quote(&self.config.pricing, &input))
    }

    pub async fn create_delivery(
        &self,
        actor: &Actor,
        request: CreateDeliveryRequest,
        cancel: &CancellationToken,
    ) -> Result<DeliveryDetail, AppError> {
        self.observe("create_delivery", self.create(actor, request, cancel))
            .await
    }

    pub async fn get_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<DeliveryDetail, AppError> {
        self.observe("get_delivery", self.get(actor, id, cancel)).await
    }

    pub async fn track_delivery(
        &self,
        tracking_code: &str,
        cancel: &CancellationToken,
    ) -> Result<PublicTracking, AppError> {
        self.observe("track_delivery", self.track(tracking_code, cancel))
            .await
    }

    pub async fn accept_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("accept_delivery", self.accept(actor, id, cancel))
            .await
    }

    pub async fn update_status(
        &self,
        actor: &Actor,
        id: Uuid,
        request: UpdateStatusRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("update_status", self.transition(actor, id, request, cancel))
            .await
    }

    pub async fn confirm_pickup(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ConfirmPickupRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("confirm_pickup", self.pickup(actor, id, request, cancel))
            .await
    }

    pub async fn confirm_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ConfirmDeliveryRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("confirm_delivery", self.complete(actor, id, request, cancel))
            .await
    }

    pub async fn cancel_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ReasonRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("cancel_delivery", self.withdraw(actor, id, request, cancel))
            .await
    }

    pub async fn return_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ReasonRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("return_delivery", self.send_back(actor, id, request, cancel))
            .await
    }

    pub async fn rate_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        request: RateRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        self.observe("rate_delivery", self.rate(actor, id, request, cancel))
            .await
    }

    pub async fn update_stop_status(
        &self,
        actor: &Actor,
        id: Uuid,
        stop_id: Uuid,
        request: UpdateStopRequest,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStop, AppError> {
        self.observe(
            "update_stop_status",
            self.stop_progress(actor, id, stop_id, request, cancel),
        )
        .await
    }

    pub async fn my_deliveries(
        &self,
        actor: &Actor,
        query: ListQuery,
        cancel: &CancellationToken,
    ) -> Result<DeliveryList, AppError> {
        self.observe("my_deliveries", async {
            actor.require_sender()?;
            let page = self.page(&query);
            let filter = SenderFilter {
                status: query.status,
            };
            let deliveries =
                guarded(cancel, self.store.list_for_sender(actor.id, &filter, page)).await?;
            Ok::<_, AppError>(DeliveryList {
                deliveries,
                limit: page.limit,
                offset: page.offset,
            })
        })
        .await
    }

    pub async fn driver_deliveries(
        &self,
        actor: &Actor,
        query: ListQuery,
        cancel: &CancellationToken,
    ) -> Result<DeliveryList, AppError> {
        self.observe("driver_deliveries", async {
            actor.require_driver()?;
            let page = self.page(&query);
            let deliveries = guarded(cancel, self.store.list_for_driver(actor.id, page)).await?;
            Ok::<_, AppError>(DeliveryList {
                deliveries,
                limit: page.limit,
                offset: page.offset,
            })
        })
        .await
    }

    pub async fn available_deliveries(
        &self,
        actor: &Actor,
        query: AvailableQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Delivery>, AppError> {
        self.observe("available_deliveries", async {
            actor.require_driver()?;
            let origin = GeoPoint::new(query.latitude, query.longitude);
            if !origin.is_valid() {
                return Err(AppError::bad_request("invalid coordinates"));
            }
            let radius_km = query.radius_km.unwrap_or(self.config.available_radius_km);
            if !radius_km.is_finite() || radius_km <= 0.0 {
                return Err(AppError::bad_request("radius_km must be positive"));
            }
            guarded(cancel, self.store.list_available(origin, radius_km)).await
        })
        .await
    }

    pub async fn active_delivery(
        &self,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<DeliveryDetail, AppError> {
        self.observe("active_delivery", async {
            actor.require_driver()?;
            let delivery = guarded(cancel, self.store.get_active_for_driver(actor.id))
                .await?
                .ok_or_else(|| AppError::not_found("no active delivery"))?;
            self.detail(delivery, cancel).await
        })
        .await
    }

    pub async fn sender_stats(
        &self,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<SenderStats, AppError> {
        self.observe("sender_stats", async {
            actor.require_sender()?;
            guarded(cancel, self.store.aggregate_sender_stats(actor.id)).await
        })
        .await
    }

    async fn create(
        &self,
        actor: &Actor,
        mut request: CreateDeliveryRequest,
        cancel: &CancellationToken,
    ) -> Result<DeliveryDetail, AppError> {
        actor.require_sender()?;

        let input = quote_input(&request.estimate_request())?;
        if request.pickup_address.trim().is_empty() {
            return Err(AppError::bad_request("pickup address is required"));
        }
        if request.dropoff_address.trim().is_empty() {
            return Err(AppError::bad_request("dropoff address is required"));
        }
        if request.stops.iter().any(|stop| stop.address.trim().is_empty()) {
            return Err(AppError::bad_request("every stop needs an address"));
        }
        if let Some(value) = request.declared_value {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::bad_request("declared value must be non-negative"));
            }
        }

        let now = Utc::now();
        if input.priority == Priority::Scheduled
            && request.scheduled_pickup_at.is_none_or(|at| at <= now)
        {
            return Err(AppError::bad_request(
                "scheduled deliveries need a future scheduled_pickup_at",
            ));
        }

        let estimate = quote(&self.config.pricing, &input);
        let stop_inputs = std::mem::take(&mut request.stops);
        let mut delivery = build_delivery(actor.id, request, &input, &estimate, now);
        let stops = delivery_stops(delivery.id, stop_inputs);

        let mut persisted = false;
        for attempt in 1..=MINT_ATTEMPTS {
            delivery.tracking_code = self.minter.tracking_code();
            delivery.proof_pin = self.minter.proof_pin();

            let result = cancellable(
                cancel,
                self.store.create_delivery(delivery.clone(), stops.clone()),
            )
            .await?;
            match result {
                Ok(()) => {
                    persisted = true;
                    break;
                }
                Err(StoreError::DuplicateTrackingCode(code)) => {
                    warn!(attempt, tracking_code = %code, "tracking code collision; minting again");
                }
                Err(err) => return Err(err.into()),
            }
        }
        if !persisted {
            return Err(AppError::Internal(format!(
                "could not mint a unique tracking code after {MINT_ATTEMPTS} attempts"
            )));
        }

        let requested = TrackingEvent::new(delivery.id, None, "Delivery requested");
        self.record_tracking(requested.clone()).await;
        self.count_transition(DeliveryStatus::Requested);

        info!(
            delivery_id = %delivery.id,
            sender_id = %delivery.sender_id,
            tracking_code = %delivery.tracking_code,
            fare = delivery.estimated_fare,
            "delivery requested"
        );

        self.events.emit(DeliveryEvent::Requested(RequestedEvent {
            delivery_id: delivery.id,
            sender_id: delivery.sender_id,
            pickup_latitude: delivery.pickup_latitude,
            pickup_longitude: delivery.pickup_longitude,
            dropoff_latitude: delivery.dropoff_latitude,
            dropoff_longitude: delivery.dropoff_longitude,
            package_size: delivery.package_size,
            priority: delivery.priority,
            estimated_fare: delivery.estimated_fare,
            requested_at: delivery.requested_at,
        }));

        Ok(DeliveryDetail {
            delivery,
            stops,
            tracking_events: vec![requested],
        })
    }

    async fn get(
        &self,
        actor: &Actor,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<DeliveryDetail, AppError> {
        let delivery = self.load(id, cancel).await?;
        if !delivery.is_sender(actor.id) && !delivery.is_driver(actor.id) {
            return Err(AppError::forbidden("not your delivery"));
        }
        self.detail(delivery, cancel).await
    }

    async fn track(
        &self,
        tracking_code: &str,
        cancel: &CancellationToken,
    ) -> Result<PublicTracking, AppError> {
        let code = tracking_code.trim().to_ascii_uppercase();
        let delivery = guarded(cancel, self.store.get_by_tracking_code(&code))
            .await?
            .ok_or_else(|| AppError::not_found("delivery not found"))?;
        let stops = guarded(cancel, self.store.list_stops(delivery.id)).await?;
        let events = guarded(cancel, self.store.list_tracking_events(delivery.id)).await?;
        Ok(PublicTracking::project(&delivery, &stops, &events))
    }

    async fn accept(
        &self,
        actor: &Actor,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        actor.require_driver()?;
        self.load(id, cancel).await?;

        if guarded(cancel, self.store.get_active_for_driver(actor.id))
            .await?
            .is_some()
        {
            self.count_accept("driver_busy");
            return Err(AppError::conflict("you already have an active delivery"));
        }

        match guarded(cancel, self.store.atomic_accept(id, actor.id)).await? {
            AcceptOutcome::Accepted => self.count_accept("won"),
            AcceptOutcome::AlreadyTaken => {
                self.count_accept("conflict");
                return Err(AppError::conflict(
                    "delivery already accepted by another driver",
                ));
            }
            AcceptOutcome::DriverBusy => {
                self.count_accept("driver_busy");
                return Err(AppError::conflict("you already have an active delivery"));
            }
        }

        self.count_transition(DeliveryStatus::Accepted);
        self.record_tracking(
            TrackingEvent::new(id, Some(actor.id), "Driver accepted delivery"),
        )
        .await;

        let delivery = self.reload(id).await?;
        info!(delivery_id = %id, driver_id = %actor.id, "delivery accepted");

        self.events.emit(DeliveryEvent::Accepted(AcceptedEvent {
            delivery_id: id,
            driver_id: actor.id,
            sender_id: delivery.sender_id,
            accepted_at: delivery.accepted_at.unwrap_or(delivery.updated_at),
        }));
        Ok(delivery)
    }

    async fn transition(
        &self,
        actor: &Actor,
        id: Uuid,
        request: UpdateStatusRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        actor.require_driver()?;
        let target: DeliveryStatus = request.status.parse()?;
        let position = optional_point(request.latitude, request.longitude)?;

        // An unassigned delivery reports the illegal move before ownership.
        let current = self.load(id, cancel).await?;
        if current.driver_id.is_some() && !current.is_driver(actor.id) {
            return Err(AppError::forbidden("not your delivery"));
        }
        if !can_transition(current.status, target) {
            return Err(AppError::bad_request(format!(
                "cannot transition from {} to {}",
                current.status, target
            )));
        }
        if target == DeliveryStatus::Delivered {
            return Err(AppError::bad_request(
                "delivery must be confirmed with proof",
            ));
        }
        if !current.is_driver(actor.id) {
            return Err(AppError::forbidden("not your delivery"));
        }

        self.commit_status(actor, &current, target, cancel).await?;
        self.record_tracking(
            TrackingEvent::new(id, Some(actor.id), format!("Status changed to {target}"))
                .at(position.map(|p| p.lat), position.map(|p| p.lng)),
        )
        .await;

        let delivery = self.reload(id).await?;
        info!(delivery_id = %id, from = %current.status, to = %target, "delivery status changed");

        match target {
            DeliveryStatus::PickedUp => self.emit_picked_up(&delivery, actor.id),
            DeliveryStatus::Cancelled => {
                self.emit_cancelled(&delivery, CancelledBy::Driver, None)
            }
            DeliveryStatus::Returned => self.emit_returned(&delivery, actor.id),
            _ => {}
        }
        Ok(delivery)
    }

    async fn pickup(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ConfirmPickupRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        actor.require_driver()?;
        let current = self.load_owned(actor, id, cancel).await?;
        if !matches!(
            current.status,
            DeliveryStatus::PickingUp | DeliveryStatus::Accepted
        ) {
            return Err(AppError::bad_request(format!(
                "cannot confirm pickup while delivery is {}",
                current.status
            )));
        }

        self.commit_status(actor, &current, DeliveryStatus::PickedUp, cancel)
            .await?;

        let notes = clean(request.notes);
        self.record_tracking(
            TrackingEvent::new(id, Some(actor.id), "Package picked up from sender")
                .with_detail(" - ", notes.as_deref()),
        )
        .await;

        let delivery = self.reload(id).await?;
        info!(delivery_id = %id, driver_id = %actor.id, "package picked up");
        self.emit_picked_up(&delivery, actor.id);
        Ok(delivery)
    }

    async fn complete(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ConfirmDeliveryRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        actor.require_driver()?;
        let proof_type: ProofType = request.proof_type.parse()?;
        let current = self.load_owned(actor, id, cancel).await?;

        let completion = verify_proof(&current, proof_type, request)?;
        if !guarded(
            cancel,
            self.store.atomic_complete(id, actor.id, completion),
        )
        .await?
        {
            return Err(AppError::conflict(
                "delivery already completed or not in transit",
            ));
        }

        self.count_transition(DeliveryStatus::Delivered);
        self.record_tracking(
            TrackingEvent::new(
                id,
                Some(actor.id),
                format!("Delivered - proof: {}", proof_type.as_str()),
            ),
        )
        .await;

        let delivery = self.reload(id).await?;
        info!(
            delivery_id = %id,
            driver_id = %actor.id,
            proof = proof_type.as_str(),
            "delivery completed"
        );

        self.events.emit(DeliveryEvent::Completed(CompletedEvent {
            delivery_id: id,
            driver_id: actor.id,
            sender_id: delivery.sender_id,
            fare_amount: delivery.final_fare.unwrap_or(delivery.estimated_fare),
            distance_km: delivery.estimated_distance_km,
            completed_at: delivery.delivered_at.unwrap_or(delivery.updated_at),
        }));
        Ok(delivery)
    }

    async fn withdraw(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ReasonRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        let current = self.load(id, cancel).await?;
        let cancelled_by = match actor.role {
            Role::Sender if current.is_sender(actor.id) => CancelledBy::Sender,
            Role::Driver if current.is_driver(actor.id) => CancelledBy::Driver,
            _ => {
                return Err(AppError::forbidden(
                    "not authorized to cancel this delivery",
                ));
            }
        };

        if current.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "delivery is already {}",
                current.status
            )));
        }
        if current.status.is_past_pickup() {
            return Err(AppError::bad_request(match cancelled_by {
                CancelledBy::Driver => "cannot cancel after package pickup - use return instead",
                CancelledBy::Sender => "cannot cancel after package pickup",
            }));
        }

        let reason = clean(request.reason);
        if !guarded(cancel, self.store.cancel(id, reason.clone())).await? {
            return Err(AppError::conflict("delivery can no longer be cancelled"));
        }

        self.count_transition(DeliveryStatus::Cancelled);
        let who = match cancelled_by {
            CancelledBy::Sender => "sender",
            CancelledBy::Driver => "driver",
        };
        self.record_tracking(
            TrackingEvent::new(id, current.driver_id, format!("Delivery cancelled by {who}"))
                .with_detail(": ", reason.as_deref()),
        )
        .await;

        let delivery = self.reload(id).await?;
        info!(delivery_id = %id, cancelled_by = who, "delivery cancelled");
        self.emit_cancelled(&delivery, cancelled_by, reason);
        Ok(delivery)
    }

    async fn send_back(
        &self,
        actor: &Actor,
        id: Uuid,
        request: ReasonRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        actor.require_driver()?;
        let current = self.load_owned(actor, id, cancel).await?;
        if !matches!(
            current.status,
            DeliveryStatus::InTransit | DeliveryStatus::Arrived
        ) {
            return Err(AppError::bad_request(format!(
                "cannot return a delivery that is {}",
                current.status
            )));
        }

        let reason = clean(request.reason);
        if !guarded(
            cancel,
            self.store.mark_returned(id, actor.id, reason.clone()),
        )
        .await?
        {
            return Err(AppError::conflict("delivery can no longer be returned"));
        }

        self.count_transition(DeliveryStatus::Returned);
        self.record_tracking(
            TrackingEvent::new(id, Some(actor.id), "Package being returned to sender")
                .with_detail(": ", Some(reason.as_deref().unwrap_or("no reason given"))),
        )
        .await;

        let delivery = self.reload(id).await?;
        info!(delivery_id = %id, driver_id = %actor.id, "delivery returned");
        self.emit_returned(&delivery, actor.id);
        Ok(delivery)
    }

    async fn rate(
        &self,
        actor: &Actor,
        id: Uuid,
        request: RateRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        let current = self.load(id, cancel).await?;
        let side = match actor.role {
            Role::Sender if current.is_sender(actor.id) => Role::Sender,
            Role::Driver if current.is_driver(actor.id) => Role::Driver,
            _ => {
                return Err(AppError::forbidden("not authorized to rate this delivery"));
            }
        };

        if current.status != DeliveryStatus::Delivered {
            return Err(AppError::bad_request("can only rate completed deliveries"));
        }
        let rating = request
            .rating
            .as_i64()
            .and_then(|r| u8::try_from(r).ok())
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| AppError::bad_request("rating must be between 1 and 5"))?;
        let feedback = clean(request.feedback);

        let rated = match side {
            Role::Sender => guarded(cancel, self.store.rate_by_sender(id, rating, feedback)).await?,
            Role::Driver => guarded(cancel, self.store.rate_by_driver(id, rating, feedback)).await?,
        };
        if !rated {
            return Err(AppError::bad_request("delivery already rated"));
        }

        info!(delivery_id = %id, rating, "delivery rated");
        self.reload(id).await
    }

    async fn stop_progress(
        &self,
        actor: &Actor,
        id: Uuid,
        stop_id: Uuid,
        request: UpdateStopRequest,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStop, AppError> {
        actor.require_driver()?;
        let status: StopStatus = request.status.parse()?;
        let current = self.load_owned(actor, id, cancel).await?;
        if !current.status.is_claimed() {
            return Err(AppError::bad_request(
                "stops can only be updated on an active delivery",
            ));
        }

        let stop = guarded(
            cancel,
            self.store
                .update_stop_status(id, stop_id, status, clean(request.photo_url)),
        )
        .await?
        .ok_or_else(|| AppError::not_found("stop not found"))?;

        self.record_tracking(
            TrackingEvent::new(
                id,
                Some(actor.id),
                format!("Stop {} {}", stop.stop_order, status.as_str()),
            )
            .at(Some(stop.latitude), Some(stop.longitude)),
        )
        .await;

        debug!(delivery_id = %id, stop_id = %stop_id, status = status.as_str(), "stop updated");
        Ok(stop)
    }

    async fn load(&self, id: Uuid, cancel: &CancellationToken) -> Result<Delivery, AppError> {
        guarded(cancel, self.store.get_by_id(id))
            .await?
            .ok_or_else(|| AppError::not_found("delivery not found"))
    }

    /// Re-reads a row after its state change committed. Cancelling the
    /// request at this point must not hide a change that already happened.
    async fn reload(&self, id: Uuid) -> Result<Delivery, AppError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("delivery not found"))
    }

    async fn load_owned(
        &self,
        actor: &Actor,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Delivery, AppError> {
        let delivery = self.load(id, cancel).await?;
        if !delivery.is_driver(actor.id) {
            return Err(AppError::forbidden("not your delivery"));
        }
        Ok(delivery)
    }

    async fn detail(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) -> Result<DeliveryDetail, AppError> {
        let stops = guarded(cancel, self.store.list_stops(delivery.id)).await?;
        let tracking_events =
            guarded(cancel, self.store.list_tracking_events(delivery.id)).await?;
        Ok(DeliveryDetail {
            delivery,
            stops,
            tracking_events,
        })
    }

    async fn commit_status(
        &self,
        actor: &Actor,
        current: &Delivery,
        target: DeliveryStatus,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let updated = guarded(
            cancel,
            self.store
                .update_status(current.id, actor.id, current.status, target),
        )
        .await?;
        if !updated {
            return Err(AppError::conflict("delivery status changed concurrently"));
        }
        self.count_transition(target);
        Ok(())
    }

    /// Tracking events are written after the state change and outside its
    /// atomic update; a failed append is logged and the operation proceeds.
    /// Runs after a commit, so it does not observe request cancellation.
    async fn record_tracking(&self, event: TrackingEvent) {
        let delivery_id = event.delivery_id;
        if let Err(err) = self.store.append_tracking_event(event).await {
            warn!(delivery_id = %delivery_id, error = %err, "failed to append tracking event");
        }
    }

    fn emit_picked_up(&self, delivery: &Delivery, driver_id: Uuid) {
        self.events.emit(DeliveryEvent::PickedUp(PickedUpEvent {
            delivery_id: delivery.id,
            driver_id,
            sender_id: delivery.sender_id,
            picked_up_at: delivery.picked_up_at.unwrap_or(delivery.updated_at),
        }));
    }

    fn emit_cancelled(&self, delivery: &Delivery, by: CancelledBy, reason: Option<String>) {
        self.events.emit(DeliveryEvent::Cancelled(CancelledEvent {
            delivery_id: delivery.id,
            sender_id: delivery.sender_id,
            driver_id: delivery.driver_id,
            cancelled_by: by,
            reason,
            cancelled_at: delivery.cancelled_at.unwrap_or(delivery.updated_at),
        }));
    }

    fn emit_returned(&self, delivery: &Delivery, driver_id: Uuid) {
        self.events.emit(DeliveryEvent::Returned(ReturnedEvent {
            delivery_id: delivery.id,
            driver_id,
            sender_id: delivery.sender_id,
            reason: delivery.return_reason.clone(),
            returned_at: delivery.updated_at,
        }));
    }

    fn page(&self, query: &ListQuery) -> Page {
        Page {
            limit: query
                .limit
                .unwrap_or(self.config.default_page_size)
                .clamp(1, self.config.max_page_size),
            offset: query.offset.unwrap_or(0),
        }
    }

    fn count_transition(&self, to: DeliveryStatus) {
        self.metrics
            .delivery_transitions_total
            .with_label_values(&[to.as_str()])
            .inc();
    }

    fn count_accept(&self, outcome: &str) {
        self.metrics
            .accept_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        self.metrics
            .engine_operation_seconds
            .with_label_values(&[operation, outcome])
            .observe(start.elapsed().as_secs_f64());

        match &result {
            Err(AppError::Internal(msg)) => error!(operation, error = %msg, "engine operation failed"),
            Err(err) => debug!(operation, error = %err, "engine operation rejected"),
            Ok(_) => {}
        }
        result
    }
}

/// Races `fut` against request cancellation. Work already committed by the
/// store is not rolled back.
async fn cancellable<F>(cancel: &CancellationToken, fut: F) -> Result<F::Output, AppError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        output = fut => Ok(output),
    }
}

async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    cancellable(cancel, fut).await?.map_err(AppError::from)
}

fn quote_input(request: &EstimateRequest) -> Result<QuoteInput, AppError> {
    let package_size: PackageSize = request.package_size.parse()?;
    let priority = match request.priority.as_deref() {
        Some(raw) => raw.parse()?,
        None => Priority::Standard,
    };

    let pickup = GeoPoint::new(request.pickup_latitude, request.pickup_longitude);
    let dropoff = GeoPoint::new(request.dropoff_latitude, request.dropoff_longitude);
    if !pickup.is_valid() {
        return Err(AppError::bad_request("invalid pickup coordinates"));
    }
    if !dropoff.is_valid() {
        return Err(AppError::bad_request("invalid dropoff coordinates"));
    }

    let mut stops = Vec::with_capacity(request.stops.len());
    for (index, stop) in request.stops.iter().enumerate() {
        let point = GeoPoint::new(stop.latitude, stop.longitude);
        if !point.is_valid() {
            return Err(AppError::bad_request(format!(
                "invalid coordinates for stop {}",
                index + 1
            )));
        }
        stops.push(point);
    }

    Ok(QuoteInput {
        pickup,
        dropoff,
        stops,
        package_size,
        priority,
    })
}

fn optional_point(lat: Option<f64>, lng: Option<f64>) -> Result<Option<GeoPoint>, AppError> {
    match (lat, lng) {
        (None, None) => Ok(None),
        (Some(lat), Some(lng)) => {
            let point = GeoPoint::new(lat, lng);
            if point.is_valid() {
                Ok(Some(point))
            } else {
                Err(AppError::bad_request("invalid coordinates"))
            }
        }
        _ => Err(AppError::bad_request(
            "latitude and longitude must be provided together",
        )),
    }
}

fn verify_proof(
    delivery: &Delivery,
    proof_type: ProofType,
    request: ConfirmDeliveryRequest,
) -> Result<Completion, AppError> {
    if delivery.requires_signature && proof_type != ProofType::Signature {
        return Err(AppError::bad_request("this delivery requires a signature"));
    }

    let photo_url = clean(request.photo_url);
    let signature_url = clean(request.signature_url);

    match proof_type {
        ProofType::Pin => {
            let pin = request
                .pin
                .as_deref()
                .map(str::trim)
                .filter(|pin| !pin.is_empty())
                .ok_or_else(|| AppError::bad_request("delivery PIN is required"))?;
            if !verify_pin(&delivery.proof_pin, pin) {
                return Err(AppError::bad_request("incorrect delivery PIN"));
            }
        }
        ProofType::Photo | ProofType::Contactless => {
            if photo_url.is_none() {
                return Err(AppError::bad_request(format!(
                    "photo_url is required for {} proof",
                    proof_type.as_str()
                )));
            }
        }
        ProofType::Signature => {
            if signature_url.is_none() {
                return Err(AppError::bad_request(
                    "signature_url is required for signature proof",
                ));
            }
        }
    }

    Ok(Completion {
        proof_type,
        photo_url,
        signature_url,
        // Realized distance and surge are not tracked; the quote stands.
        final_fare: delivery.estimated_fare,
    })
}

fn delivery_stops(delivery_id: Uuid, inputs: Vec<StopInput>) -> Vec<DeliveryStop> {
    inputs
        .into_iter()
        .zip(1u32..)
        .map(|(input, stop_order)| DeliveryStop {
            id: Uuid::new_v4(),
            delivery_id,
            stop_order,
            latitude: input.latitude,
            longitude: input.longitude,
            address: input.address.trim().to_string(),
            contact_name: clean(input.contact_name),
            contact_phone: clean(input.contact_phone),
            notes: clean(input.notes),
            status: StopStatus::Pending,
            arrived_at: None,
            completed_at: None,
            proof_photo_url: None,
        })
        .collect()
}

/// Trims optional text and drops it when blank.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn build_delivery(
    sender_id: Uuid,
    request: CreateDeliveryRequest,
    input: &QuoteInput,
    estimate: &FareEstimate,
    now: DateTime<Utc>,
) -> Delivery {
    Delivery {
        id: Uuid::new_v4(),
        tracking_code: String::new(),
        sender_id,
        driver_id: None,
        package_size: input.package_size,
        package_description: clean(request.package_description),
        declared_value: request.declared_value,
        is_fragile: request.is_fragile,
        requires_signature: request.requires_signature,
        priority: input.priority,
        scheduled_pickup_at: request.scheduled_pickup_at,
        pickup_latitude: input.pickup.lat,
        pickup_longitude: input.pickup.lng,
        pickup_address: request.pickup_address.trim().to_string(),
        pickup_contact: clean(request.pickup_contact),
        pickup_phone: clean(request.pickup_phone),
        pickup_notes: clean(request.pickup_notes),
        dropoff_latitude: input.dropoff.lat,
        dropoff_longitude: input.dropoff.lng,
        dropoff_address: request.dropoff_address.trim().to_string(),
        recipient_name: clean(request.recipient_name),
        recipient_phone: clean(request.recipient_phone),
        dropoff_notes: clean(request.dropoff_notes),
        estimated_distance_km: estimate.distance_km,
        estimated_duration_min: estimate.duration_min,
        estimated_fare: estimate.total,
        surge_multiplier: estimate.surge_multiplier,
        final_fare: None,
        proof_pin: ProofPin::new(String::new()),
        proof_type: None,
        proof_photo_url: None,
        signature_url: None,
        status: DeliveryStatus::Requested,
        cancellation_reason: None,
        return_reason: None,
        sender_rating: None,
        sender_feedback: None,
        driver_rating: None,
        driver_feedback: None,
        requested_at: now,
        accepted_at: None,
        picked_up_at: None,
        delivered_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    }
}
