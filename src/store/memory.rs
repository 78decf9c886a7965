use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::engine::transitions::can_transition;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::stop::{DeliveryStop, StopStatus};
use crate::models::tracking::TrackingEvent;
use crate::models::view::{Page, SenderFilter, SenderStats};
use crate::store::{AcceptOutcome, Completion, DeliveryStore, StoreError, AVAILABLE_LIMIT};

/// DashMap-backed store. A `get_mut` guard holds the row's shard lock, so
/// each check-and-write below is one indivisible conditional update.
///
/// Lock order: `driver_claims` may be held while taking a `deliveries` guard,
/// never the reverse.
#[derive(Default)]
pub struct MemoryStore {
    deliveries: DashMap<Uuid, Delivery>,
    tracking_codes: DashMap<String, Uuid>,
    stops: DashMap<Uuid, Vec<DeliveryStop>>,
    events: DashMap<Uuid, Vec<TrackingEvent>>,
    /// driver id -> claimed delivery id
    driver_claims: DashMap<Uuid, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    fn release_claim(&self, driver_id: Uuid, delivery_id: Uuid) {
        self.driver_claims
            .remove_if(&driver_id, |_, claimed| *claimed == delivery_id);
    }

    fn collect_sorted<F>(&self, mut keep: F) -> Vec<Delivery>
    where
        F: FnMut(&Delivery) -> bool,
    {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }
}

fn paginate(rows: Vec<Delivery>, page: Page) -> Vec<Delivery> {
    rows.into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

fn check_stop_sequence(delivery_id: Uuid, stops: &[DeliveryStop]) -> Result<(), StoreError> {
    for (index, stop) in stops.iter().enumerate() {
        if stop.delivery_id != delivery_id {
            return Err(StoreError::Constraint(format!(
                "stop {} belongs to another delivery",
                stop.id
            )));
        }
        if stop.stop_order as usize != index + 1 {
            return Err(StoreError::Constraint(format!(
                "stop_order must be contiguous from 1, got {} at position {}",
                stop.stop_order,
                index + 1
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn create_delivery(
        &self,
        delivery: Delivery,
        stops: Vec<DeliveryStop>,
    ) -> Result<(), StoreError> {
        check_stop_sequence(delivery.id, &stops)?;
        if self.deliveries.contains_key(&delivery.id) {
            return Err(StoreError::Constraint(format!(
                "delivery {} already exists",
                delivery.id
            )));
        }

        match self.tracking_codes.entry(delivery.tracking_code.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::DuplicateTrackingCode(delivery.tracking_code));
            }
            Entry::Vacant(slot) => {
                slot.insert(delivery.id);
            }
        }

        let id = delivery.id;
        self.stops.insert(id, stops);
        self.events.insert(id, Vec::new());
        self.deliveries.insert(id, delivery);
        debug!(delivery_id = %id, "delivery persisted");
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_by_tracking_code(&self, code: &str) -> Result<Option<Delivery>, StoreError> {
        let Some(id) = self.tracking_codes.get(code).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_active_for_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<Delivery>, StoreError> {
        Ok(self
            .deliveries
            .iter()
            .find(|entry| {
                let delivery = entry.value();
                delivery.driver_id == Some(driver_id) && delivery.status.is_claimed()
            })
            .map(|entry| entry.value().clone()))
    }

    async fn list_available(
        &self,
        origin: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Delivery>, StoreError> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| {
                let delivery = entry.value();
                delivery.status == DeliveryStatus::Requested
                    && haversine_km(&origin, &delivery.pickup_point()) <= radius_km
            })
            .map(|entry| entry.value().clone())
            .collect();

        rows.sort_by(|a, b| {
            a.priority
                .dispatch_rank()
                .cmp(&b.priority.dispatch_rank())
                .then(a.requested_at.cmp(&b.requested_at))
        });
        rows.truncate(AVAILABLE_LIMIT);
        Ok(rows)
    }

    async fn list_for_sender(
        &self,
        sender_id: Uuid,
        filter: &SenderFilter,
        page: Page,
    ) -> Result<Vec<Delivery>, StoreError> {
        let rows = self.collect_sorted(|delivery| {
            delivery.sender_id == sender_id
                && filter.status.is_none_or(|status| delivery.status == status)
        });
        Ok(paginate(rows, page))
    }

    async fn list_for_driver(
        &self,
        driver_id: Uuid,
        page: Page,
    ) -> Result<Vec<Delivery>, StoreError> {
        let rows = self.collect_sorted(|delivery| delivery.driver_id == Some(driver_id));
        Ok(paginate(rows, page))
    }

    async fn atomic_accept(
        &self,
        id: Uuid,
        driver_id: Uuid,
    ) -> Result<AcceptOutcome, StoreError> {
        let claim = match self.driver_claims.entry(driver_id) {
            Entry::Occupied(_) => return Ok(AcceptOutcome::DriverBusy),
            Entry::Vacant(slot) => slot,
        };

        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(AcceptOutcome::AlreadyTaken);
        };
        if delivery.status != DeliveryStatus::Requested || delivery.driver_id.is_some() {
            return Ok(AcceptOutcome::AlreadyTaken);
        }

        let now = Utc::now();
        delivery.driver_id = Some(driver_id);
        delivery.status = DeliveryStatus::Accepted;
        delivery.accepted_at = Some(now);
        delivery.updated_at = now;
        claim.insert(id);
        Ok(AcceptOutcome::Accepted)
    }

    async fn update_status(
        &self,
        id: Uuid,
        driver_id: Uuid,
        expected: DeliveryStatus,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError> {
        {
            let Some(mut delivery) = self.deliveries.get_mut(&id) else {
                return Ok(false);
            };
            if delivery.driver_id != Some(driver_id) || delivery.status != expected {
                return Ok(false);
            }

            let now = Utc::now();
            delivery.status = status;
            delivery.updated_at = now;
            match status {
                DeliveryStatus::PickedUp => delivery.picked_up_at = Some(now),
                DeliveryStatus::Cancelled => delivery.cancelled_at = Some(now),
                _ => {}
            }
        }

        if status.is_terminal() {
            self.release_claim(driver_id, id);
        }
        Ok(true)
    }

    async fn atomic_complete(
        &self,
        id: Uuid,
        driver_id: Uuid,
        completion: Completion,
    ) -> Result<bool, StoreError> {
        {
            let Some(mut delivery) = self.deliveries.get_mut(&id) else {
                return Ok(false);
            };
            let completable = matches!(
                delivery.status,
                DeliveryStatus::InTransit | DeliveryStatus::Arrived
            );
            if !completable || delivery.driver_id != Some(driver_id) {
                return Ok(false);
            }

            let now = Utc::now();
            delivery.status = DeliveryStatus::Delivered;
            delivery.proof_type = Some(completion.proof_type);
            delivery.proof_photo_url = completion.photo_url;
            delivery.signature_url = completion.signature_url;
            delivery.final_fare = Some(completion.final_fare);
            delivery.delivered_at = Some(now);
            delivery.updated_at = now;
        }

        self.release_claim(driver_id, id);
        Ok(true)
    }

    async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<bool, StoreError> {
        let released_driver = {
            let Some(mut delivery) = self.deliveries.get_mut(&id) else {
                return Ok(false);
            };
            if !can_transition(delivery.status, DeliveryStatus::Cancelled) {
                return Ok(false);
            }

            let now = Utc::now();
            delivery.status = DeliveryStatus::Cancelled;
            delivery.cancellation_reason = reason;
            delivery.cancelled_at = Some(now);
            delivery.updated_at = now;
            delivery.driver_id
        };

        if let Some(driver_id) = released_driver {
            self.release_claim(driver_id, id);
        }
        Ok(true)
    }

    async fn mark_returned(
        &self,
        id: Uuid,
        driver_id: Uuid,
        reason: Option<String>,
    ) -> Result<bool, StoreError> {
        {
            let Some(mut delivery) = self.deliveries.get_mut(&id) else {
                return Ok(false);
            };
            if delivery.driver_id != Some(driver_id)
                || !can_transition(delivery.status, DeliveryStatus::Returned)
            {
                return Ok(false);
            }

            delivery.status = DeliveryStatus::Returned;
            delivery.return_reason = reason;
            delivery.updated_at = Utc::now();
        }

        self.release_claim(driver_id, id);
        Ok(true)
    }

    async fn rate_by_sender(
        &self,
        id: Uuid,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<bool, StoreError> {
        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(false);
        };
        if delivery.status != DeliveryStatus::Delivered || delivery.sender_rating.is_some() {
            return Ok(false);
        }
        delivery.sender_rating = Some(rating);
        delivery.sender_feedback = feedback;
        delivery.updated_at = Utc::now();
        Ok(true)
    }

    async fn rate_by_driver(
        &self,
        id: Uuid,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<bool, StoreError> {
        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(false);
        };
        if delivery.status != DeliveryStatus::Delivered || delivery.driver_rating.is_some() {
            return Ok(false);
        }
        delivery.driver_rating = Some(rating);
        delivery.driver_feedback = feedback;
        delivery.updated_at = Utc::now();
        Ok(true)
    }

    async fn append_tracking_event(&self, event: TrackingEvent) -> Result<(), StoreError> {
        if !self.deliveries.contains_key(&event.delivery_id) {
            return Err(StoreError::Constraint(format!(
                "tracking event for unknown delivery {}",
                event.delivery_id
            )));
        }
        self.events.entry(event.delivery_id).or_default().push(event);
        Ok(())
    }

    async fn list_tracking_events(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<TrackingEvent>, StoreError> {
        Ok(self
            .events
            .get(&delivery_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn list_stops(&self, delivery_id: Uuid) -> Result<Vec<DeliveryStop>, StoreError> {
        Ok(self
            .stops
            .get(&delivery_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn update_stop_status(
        &self,
        delivery_id: Uuid,
        stop_id: Uuid,
        status: StopStatus,
        photo_url: Option<String>,
    ) -> Result<Option<DeliveryStop>, StoreError> {
        let Some(mut stops) = self.stops.get_mut(&delivery_id) else {
            return Ok(None);
        };
        let Some(stop) = stops.iter_mut().find(|stop| stop.id == stop_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        stop.status = status;
        match status {
            StopStatus::Arrived => stop.arrived_at = Some(now),
            StopStatus::Completed => {
                stop.completed_at = Some(now);
                if photo_url.is_some() {
                    stop.proof_photo_url = photo_url;
                }
            }
            StopStatus::Pending => {}
        }
        Ok(Some(stop.clone()))
    }

    async fn aggregate_sender_stats(&self, sender_id: Uuid) -> Result<SenderStats, StoreError> {
        let mut stats = SenderStats::default();
        let mut rating_sum = 0u64;
        let mut rating_count = 0u64;

        for entry in self.deliveries.iter() {
            let delivery = entry.value();
            if delivery.sender_id != sender_id {
                continue;
            }

            stats.total_deliveries += 1;
            match delivery.status {
                DeliveryStatus::Delivered => stats.delivered += 1,
                DeliveryStatus::Cancelled => stats.cancelled += 1,
                DeliveryStatus::Returned => stats.returned += 1,
                status if !status.is_terminal() => stats.active_deliveries += 1,
                _ => {}
            }
            if let Some(fare) = delivery.final_fare {
                stats.total_spent += fare;
            }
            if let Some(rating) = delivery.sender_rating {
                rating_sum += u64::from(rating);
                rating_count += 1;
            }
        }

        stats.total_spent = crate::engine::pricing::round_money(stats.total_spent);
        if rating_count > 0 {
            stats.average_rating_given = Some(rating_sum as f64 / rating_count as f64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::geo::GeoPoint;
    use crate::models::delivery::{
        Delivery, DeliveryStatus, PackageSize, Priority, ProofPin, ProofType,
    };
    use crate::models::stop::{DeliveryStop, StopStatus};
    use crate::models::view::{Page, SenderFilter};
    use crate::store::{AcceptOutcome, Completion, DeliveryStore, StoreError};

    fn delivery(sender_id: Uuid, code: &str, priority: Priority, lat: f64, lng: f64) -> Delivery {
        let now = Utc::now();
        Delivery {
            id: Uuid::new_v4(),
            tracking_code: code.to_string(),
            sender_id,
            driver_id: None,
            package_size: PackageSize::Small,
            package_description: None,
            declared_value: None,
            is_fragile: false,
            requires_signature: false,
            priority,
            scheduled_pickup_at: None,
            pickup_latitude: lat,
            pickup_longitude: lng,
            pickup_address: "1 Pickup St".to_string(),
            pickup_contact: None,
            pickup_phone: None,
            pickup_notes: None,
            dropoff_latitude: lat + 0.01,
            dropoff_longitude: lng + 0.01,
            dropoff_address: "2 Dropoff Ave".to_string(),
            recipient_name: None,
            recipient_phone: None,
            dropoff_notes: None,
            estimated_distance_km: 1.4,
            estimated_duration_min: 13,
            estimated_fare: 6.0,
            surge_multiplier: 1.0,
            final_fare: None,
            proof_pin: ProofPin::new("1234".to_string()),
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

    fn stop(delivery_id: Uuid, order: u32) -> DeliveryStop {
        DeliveryStop {
            id: Uuid::new_v4(),
            delivery_id,
            stop_order: order,
            latitude: 40.73,
            longitude: -73.99,
            address: format!("stop {order}"),
            contact_name: None,
            contact_phone: None,
            notes: None,
            status: StopStatus::Pending,
            arrived_at: None,
            completed_at: None,
            proof_photo_url: None,
        }
    }

    async fn seeded(store: &MemoryStore, code: &str) -> Delivery {
        let d = delivery(Uuid::new_v4(), code, Priority::Standard, 40.71, -74.0);
        store.create_delivery(d.clone(), vec![]).await.unwrap();
        d
    }

    async fn advance(store: &MemoryStore, id: Uuid, driver: Uuid, path: &[DeliveryStatus]) {
        let mut current = DeliveryStatus::Accepted;
        for next in path {
            assert!(store.update_status(id, driver, current, *next).await.unwrap());
            current = *next;
        }
    }

    fn completion() -> Completion {
        Completion {
            proof_type: ProofType::Photo,
            photo_url: Some("https://img/1.jpg".to_string()),
            signature_url: None,
            final_fare: 6.0,
        }
    }

    #[tokio::test]
    async fn duplicate_tracking_code_is_rejected_and_nothing_is_written() {
        let store = MemoryStore::new();
        seeded(&store, "DLV-AAAAA-AAAAA").await;

        let dup = delivery(Uuid::new_v4(), "DLV-AAAAA-AAAAA", Priority::Standard, 40.0, -74.0);
        let dup_id = dup.id;
        let err = store.create_delivery(dup, vec![]).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateTrackingCode(_)));
        assert!(store.get_by_id(dup_id).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn non_contiguous_stops_are_rejected() {
        let store = MemoryStore::new();
        let d = delivery(Uuid::new_v4(), "DLV-BBBBB-BBBBB", Priority::Standard, 40.0, -74.0);
        let stops = vec![stop(d.id, 1), stop(d.id, 3)];

        let err = store.create_delivery(d.clone(), stops).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(store.get_by_tracking_code("DLV-BBBBB-BBBBB").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_have_exactly_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let d = seeded(&store, "DLV-CCCCC-CCCCC").await;
        let delivery_id = d.id;

        let drivers: Vec<Uuid> = (0..16).map(|_| Uuid::new_v4()).collect();
        let handles: Vec<_> = drivers
            .iter()
            .map(|driver| {
                let store = store.clone();
                let driver = *driver;
                tokio::spawn(async move { (driver, store.atomic_accept(delivery_id, driver).await) })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            let (driver, outcome) = handle.await.unwrap();
            match outcome.unwrap() {
                AcceptOutcome::Accepted => winners.push(driver),
                AcceptOutcome::AlreadyTaken => {}
                AcceptOutcome::DriverBusy => panic!("fresh drivers cannot be busy"),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = store.get_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(winners[0]));
        assert_eq!(stored.status, DeliveryStatus::Accepted);
        assert!(stored.accepted_at.is_some());
    }

    #[tokio::test]
    async fn driver_with_claim_cannot_accept_another() {
        let store = MemoryStore::new();
        let first = seeded(&store, "DLV-DDDDD-DDDDD").await;
        let second = seeded(&store, "DLV-EEEEE-EEEEE").await;
        let driver = Uuid::new_v4();

        assert_eq!(
            store.atomic_accept(first.id, driver).await.unwrap(),
            AcceptOutcome::Accepted
        );
        assert_eq!(
            store.atomic_accept(second.id, driver).await.unwrap(),
            AcceptOutcome::DriverBusy
        );

        assert!(store.cancel(first.id, None).await.unwrap());
        assert_eq!(
            store.atomic_accept(second.id, driver).await.unwrap(),
            AcceptOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn update_status_is_compare_and_set_on_owner_and_status() {
        let store = MemoryStore::new();
        let d = seeded(&store, "DLV-FFFFF-FFFFF").await;
        let driver = Uuid::new_v4();
        store.atomic_accept(d.id, driver).await.unwrap();

        assert!(!store
            .update_status(d.id, Uuid::new_v4(), DeliveryStatus::Accepted, DeliveryStatus::PickingUp)
            .await
            .unwrap());
        assert!(!store
            .update_status(d.id, driver, DeliveryStatus::PickingUp, DeliveryStatus::PickedUp)
            .await
            .unwrap());
        assert!(store
            .update_status(d.id, driver, DeliveryStatus::Accepted, DeliveryStatus::PickedUp)
            .await
            .unwrap());

        let stored = store.get_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::PickedUp);
        assert!(stored.picked_up_at.is_some());
        assert!(stored.accepted_at <= stored.picked_up_at);
    }

    #[tokio::test]
    async fn complete_requires_transit_and_sets_final_fare() {
        let store = MemoryStore::new();
        let d = seeded(&store, "DLV-GGGGG-GGGGG").await;
        let driver = Uuid::new_v4();
        store.atomic_accept(d.id, driver).await.unwrap();

        assert!(!store.atomic_complete(d.id, driver, completion()).await.unwrap());
        assert!(store.get_by_id(d.id).await.unwrap().unwrap().final_fare.is_none());

        advance(&store, d.id, driver, &[DeliveryStatus::PickedUp, DeliveryStatus::InTransit]).await;
        assert!(!store.atomic_complete(d.id, Uuid::new_v4(), completion()).await.unwrap());
        assert!(store.atomic_complete(d.id, driver, completion()).await.unwrap());
        assert!(!store.atomic_complete(d.id, driver, completion()).await.unwrap());

        let stored = store.get_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.final_fare, Some(6.0));
        assert!(stored.delivered_at.is_some());
        assert!(store.get_active_for_driver(driver).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_only_before_pickup() {
        let store = MemoryStore::new();
        let d = seeded(&store, "DLV-HHHHH-HHHHH").await;
        let driver = Uuid::new_v4();
        store.atomic_accept(d.id, driver).await.unwrap();
        advance(&store, d.id, driver, &[DeliveryStatus::PickedUp]).await;

        assert!(!store.cancel(d.id, Some("changed mind".to_string())).await.unwrap());

        let open = seeded(&store, "DLV-IIIII-IIIII").await;
        assert!(store.cancel(open.id, Some("changed mind".to_string())).await.unwrap());
        assert!(!store.cancel(open.id, None).await.unwrap());

        let stored = store.get_by_id(open.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Cancelled);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("changed mind"));
        assert!(stored.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn ratings_are_set_once_on_delivered_rows() {
        let store = MemoryStore::new();
        let d = seeded(&store, "DLV-JJJJJ-JJJJJ").await;
        let driver = Uuid::new_v4();

        assert!(!store.rate_by_sender(d.id, 5, None).await.unwrap());

        store.atomic_accept(d.id, driver).await.unwrap();
        advance(&store, d.id, driver, &[DeliveryStatus::PickedUp, DeliveryStatus::InTransit]).await;
        store.atomic_complete(d.id, driver, completion()).await.unwrap();

        assert!(store.rate_by_sender(d.id, 5, Some("great".to_string())).await.unwrap());
        assert!(!store.rate_by_sender(d.id, 1, None).await.unwrap());
        assert!(store.rate_by_driver(d.id, 4, None).await.unwrap());

        let stored = store.get_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.sender_rating, Some(5));
        assert_eq!(stored.driver_rating, Some(4));
    }

    #[tokio::test]
    async fn available_listing_orders_by_priority_then_age_within_radius() {
        let store = MemoryStore::new();
        let sender = Uuid::new_v4();

        let mut older = delivery(sender, "DLV-K0000-00001", Priority::Standard, 40.71, -74.0);
        older.requested_at = Utc::now() - Duration::minutes(10);
        let newer = delivery(sender, "DLV-K0000-00002", Priority::Standard, 40.72, -74.0);
        let express = delivery(sender, "DLV-K0000-00003", Priority::Express, 40.72, -74.01);
        let scheduled = delivery(sender, "DLV-K0000-00004", Priority::Scheduled, 40.70, -74.0);
        let far = delivery(sender, "DLV-K0000-00005", Priority::Express, 42.0, -71.0);

        for d in [&older, &newer, &express, &scheduled, &far] {
            store.create_delivery(d.clone(), vec![]).await.unwrap();
        }

        let listed = store
            .list_available(GeoPoint::new(40.71, -74.0), 15.0)
            .await
            .unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![express.id, older.id, newer.id, scheduled.id]);
    }

    #[tokio::test]
    async fn sender_listing_filters_and_paginates() {
        let store = MemoryStore::new();
        let sender = Uuid::new_v4();
        for n in 0..5 {
            let d = delivery(sender, &format!("DLV-L0000-0000{n}"), Priority::Standard, 40.0, -74.0);
            store.create_delivery(d, vec![]).await.unwrap();
        }
        let other = delivery(Uuid::new_v4(), "DLV-L0000-00009", Priority::Standard, 40.0, -74.0);
        store.create_delivery(other.clone(), vec![]).await.unwrap();
        store.cancel(other.id, None).await.unwrap();

        let page = Page { limit: 2, offset: 0 };
        let first = store
            .list_for_sender(sender, &SenderFilter::default(), page)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let rest = store
            .list_for_sender(sender, &SenderFilter::default(), Page { limit: 10, offset: 2 })
            .await
            .unwrap();
        assert_eq!(rest.len(), 3);

        let cancelled = store
            .list_for_sender(
                sender,
                &SenderFilter {
                    status: Some(DeliveryStatus::Cancelled),
                },
                page,
            )
            .await
            .unwrap();
        assert!(cancelled.is_empty());
    }

    #[tokio::test]
    async fn stop_status_updates_set_timestamps() {
        let store = MemoryStore::new();
        let d = delivery(Uuid::new_v4(), "DLV-MMMMM-MMMMM", Priority::Standard, 40.0, -74.0);
        let first = stop(d.id, 1);
        store
            .create_delivery(d.clone(), vec![first.clone(), stop(d.id, 2)])
            .await
            .unwrap();

        let arrived = store
            .update_stop_status(d.id, first.id, StopStatus::Arrived, None)
            .await
            .unwrap()
            .unwrap();
        assert!(arrived.arrived_at.is_some());

        let done = store
            .update_stop_status(
                d.id,
                first.id,
                StopStatus::Completed,
                Some("https://img/stop.jpg".to_string()),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.proof_photo_url.as_deref(), Some("https://img/stop.jpg"));

        assert!(store
            .update_stop_status(d.id, Uuid::new_v4(), StopStatus::Arrived, None)
            .await
            .unwrap()
            .is_none());
    }
}
