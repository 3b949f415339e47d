use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::cache::{LocationCache, MemoryLocationCache};
use crate::config::TrackingSettings;
use crate::models::tracking::{CustomerMessage, TrackingEvent};
use crate::notify::{ChannelNotifier, Notifier};
use crate::observability::metrics::Metrics;
use crate::store::{DispatchStore, MemoryStore, OrderDirectory};

pub struct AppState {
    pub store: Arc<dyn DispatchStore>,
    pub orders: Arc<dyn OrderDirectory>,
    pub cache: Arc<dyn LocationCache>,
    pub notifier: Arc<dyn Notifier>,
    /// Present when the process runs on the bundled in-memory backends.
    pub memory: Option<Arc<MemoryStore>>,
    pub tracking_tx: mpsc::Sender<TrackingEvent>,
    pub customer_events_tx: broadcast::Sender<CustomerMessage>,
    pub settings: TrackingSettings,
    pub metrics: Metrics,
}

pub struct Backends {
    pub store: Arc<dyn DispatchStore>,
    pub orders: Arc<dyn OrderDirectory>,
    pub cache: Arc<dyn LocationCache>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl AppState {
    /// Wires the engine on top of caller-provided backends. Without an explicit
    /// notifier, customer messages go to the WebSocket channel.
    pub fn new(
        backends: Backends,
        settings: TrackingSettings,
        tracking_queue_size: usize,
        customer_channel_size: usize,
    ) -> (Self, mpsc::Receiver<TrackingEvent>) {
        let (tracking_tx, tracking_rx) = mpsc::channel(tracking_queue_size);
        let (customer_events_tx, _unused_rx) = broadcast::channel(customer_channel_size);

        let notifier = backends
            .notifier
            .unwrap_or_else(|| Arc::new(ChannelNotifier::new(customer_events_tx.clone())));

        (
            Self {
                store: backends.store,
                orders: backends.orders,
                cache: backends.cache,
                notifier,
                memory: None,
                tracking_tx,
                customer_events_tx,
                settings,
                metrics: Metrics::new(),
            },
            tracking_rx,
        )
    }

    pub fn in_memory(
        settings: TrackingSettings,
        tracking_queue_size: usize,
        customer_channel_size: usize,
    ) -> (Self, mpsc::Receiver<TrackingEvent>) {
        Self::in_memory_with_notifier(settings, tracking_queue_size, customer_channel_size, None)
    }

    pub fn in_memory_with_notifier(
        settings: TrackingSettings,
        tracking_queue_size: usize,
        customer_channel_size: usize,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> (Self, mpsc::Receiver<TrackingEvent>) {
        let memory = Arc::new(MemoryStore::new());
        let backends = Backends {
            store: memory.clone(),
            orders: memory.clone(),
            cache: Arc::new(MemoryLocationCache::new()),
            notifier,
        };

        let (mut state, rx) = Self::new(
            backends,
            settings,
            tracking_queue_size,
            customer_channel_size,
        );
        state.memory = Some(memory);
        (state, rx)
    }
}
