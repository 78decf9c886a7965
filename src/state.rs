use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, EngineConfig};
use crate::engine::lifecycle::LifecycleEngine;
use crate::events::{BroadcastBus, EventPublisher};
use crate::observability::metrics::Metrics;
use crate::store::{DeliveryStore, MemoryStore};

pub struct AppState {
    pub engine: LifecycleEngine,
    pub store: Arc<dyn DeliveryStore>,
    pub bus: BroadcastBus,
    pub metrics: Metrics,
    /// Cancelled on shutdown; every request token is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_store(
            Arc::new(MemoryStore::new()),
            config.event_buffer_size,
            config.engine.clone(),
        )
    }

    pub fn with_store(
        store: Arc<dyn DeliveryStore>,
        event_buffer_size: usize,
        engine_config: EngineConfig,
    ) -> Self {
        let metrics = Metrics::new();
        let bus = BroadcastBus::new(event_buffer_size);
        let events = EventPublisher::new(
            Arc::new(bus.clone()),
            engine_config.event_publish_timeout,
            engine_config.event_max_in_flight,
            metrics.clone(),
        );
        let engine = LifecycleEngine::new(store.clone(), events, engine_config, metrics.clone());

        Self {
            engine,
            store,
            bus,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }
}
