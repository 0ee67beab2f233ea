use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::auth::{IdentityProvider, TrustedIdentityProvider};
use crate::chat::ChatService;
use crate::lifecycle::{LifecycleMachine, OrderEvent};
use crate::notify::{Dispatcher, PushGateway};
use crate::observability::metrics::Metrics;
use crate::store::{RetryPolicy, StoreBackend, StoreService};

#[derive(Clone)]
pub struct StateOptions {
    pub retry: RetryPolicy,
    pub assign_queue_size: usize,
    pub event_buffer_size: usize,
    pub gateway_retry_attempts: u32,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            assign_queue_size: 1024,
            event_buffer_size: 1024,
            gateway_retry_attempts: 2,
            identity: Arc::new(TrustedIdentityProvider),
        }
    }
}

/// Explicitly constructed service graph; everything behind the store
/// and gateway traits is swappable, which is how the tests run against
/// an in-memory store and a recording gateway.
pub struct AppState {
    pub store: StoreService,
    pub lifecycle: LifecycleMachine,
    pub dispatcher: Dispatcher,
    pub chat: ChatService,
    pub identity: Arc<dyn IdentityProvider>,
    pub order_events_tx: broadcast::Sender<OrderEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        gateway: Arc<dyn PushGateway>,
        options: StateOptions,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (assign_tx, assign_rx) = mpsc::channel(options.assign_queue_size);
        let (order_events_tx, _unused_rx) = broadcast::channel(options.event_buffer_size);
        let metrics = Metrics::new();

        let store = StoreService::new(backend, options.retry);
        let dispatcher = Dispatcher::new(
            store.clone(),
            gateway,
            metrics.clone(),
            options.gateway_retry_attempts,
        );
        let lifecycle = LifecycleMachine::new(
            store.clone(),
            dispatcher.clone(),
            order_events_tx.clone(),
            assign_tx,
            metrics.clone(),
        );
        let chat = ChatService::new(store.clone());

        (
            Self {
                store,
                lifecycle,
                dispatcher,
                chat,
                identity: options.identity,
                order_events_tx,
                metrics,
            },
            assign_rx,
        )
    }
}
