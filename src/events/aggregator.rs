//! Typed publish/subscribe hub with handler isolation.

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

type AnyMessage = Arc<dyn Any + Send + Sync>;
type Handler = Arc<dyn Fn(AnyMessage) + Send + Sync>;
type Registry = DashMap<TypeId, DashMap<u64, Handler>>;

/// Execution context certain consumers need their callbacks marshaled to
/// (e.g. a UI-owned dispatcher). Injected explicitly; the aggregator never
/// captures an ambient context.
pub type Dispatcher = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// Handle to one subscription.
///
/// The token holds a removal delegate closed over at subscribe time, so
/// unsubscription needs no runtime type lookup and is safe to perform while
/// other handlers for the same message type are executing concurrently.
pub struct SubscriptionToken {
    id: u64,
    remove: Box<dyn Fn() + Send + Sync>,
}

impl SubscriptionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the subscription. Consuming the token makes a second
    /// unsubscription unrepresentable.
    pub fn unsubscribe(self) {
        (self.remove)();
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.id)
            .finish()
    }
}

/// Thread-safe event aggregator decoupling producers from consumers.
///
/// Delivery to multiple subscribers of one message type is unordered. A
/// handler that panics is caught and logged; it never prevents delivery to
/// the remaining handlers and never propagates to the publisher.
pub struct EventAggregator {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    dispatcher: Option<Dispatcher>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            dispatcher: None,
        }
    }

    /// Build an aggregator whose marshaled publishes run on the given
    /// dispatcher.
    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            ..Self::new()
        }
    }

    /// Register a handler for messages of type `T`.
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionToken
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<T>();

        let wrapped: Handler = Arc::new(move |message: AnyMessage| {
            if let Ok(message) = message.downcast::<T>() {
                handler(&message);
            }
        });

        self.registry
            .entry(type_id)
            .or_default()
            .insert(id, wrapped);
        debug!(subscription_id = id, "subscriber registered");

        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        SubscriptionToken {
            id,
            remove: Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    if let Some(handlers) = registry.get(&type_id) {
                        handlers.remove(&id);
                    }
                }
            }),
        }
    }

    /// Remove a subscription via its token.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        token.unsubscribe();
    }

    /// Deliver `message` to every current subscriber of `T` on the
    /// publisher's own context.
    pub fn publish<T: Any + Send + Sync>(&self, message: T) {
        let message: Arc<T> = Arc::new(message);
        for handler in self.handlers_for::<T>() {
            Self::invoke(&handler, message.clone());
        }
    }

    /// Deliver `message` on the injected affinity dispatcher. Falls back to
    /// inline delivery (with a warning) when no dispatcher was injected.
    pub fn publish_on_dispatcher<T: Any + Send + Sync>(&self, message: T) {
        let Some(dispatcher) = &self.dispatcher else {
            warn!("no dispatcher injected; delivering on the publisher's context");
            self.publish(message);
            return;
        };

        let message: Arc<T> = Arc::new(message);
        for handler in self.handlers_for::<T>() {
            let message = message.clone();
            dispatcher(Box::new(move || Self::invoke(&handler, message)));
        }
    }

    /// Deliver `message` with each handler on its own spawned task, awaiting
    /// all of them so a slow handler never serializes the rest.
    pub async fn publish_async<T: Any + Send + Sync + 'static>(&self, message: T) {
        let message: Arc<T> = Arc::new(message);
        let deliveries: Vec<_> = self
            .handlers_for::<T>()
            .into_iter()
            .map(|handler| {
                let message = message.clone();
                tokio::spawn(async move { Self::invoke(&handler, message) })
            })
            .collect();

        for delivery in deliveries {
            if let Err(join_error) = delivery.await {
                error!(%join_error, "async event delivery task failed");
            }
        }
    }

    /// Number of current subscribers for `T`.
    pub fn subscriber_count<T: Any + Send + Sync>(&self) -> usize {
        self.registry
            .get(&TypeId::of::<T>())
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.registry.clear();
    }

    /// Snapshot the handlers for `T` so delivery holds no registry locks
    /// and concurrent unsubscription stays safe.
    fn handlers_for<T: Any + Send + Sync>(&self) -> Vec<Handler> {
        self.registry
            .get(&TypeId::of::<T>())
            .map(|handlers| handlers.iter().map(|h| h.value().clone()).collect())
            .unwrap_or_default()
    }

    fn invoke<T: Any + Send + Sync>(handler: &Handler, message: Arc<T>) {
        let message: AnyMessage = message;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(message))) {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".to_string());
            error!(panic = %detail, "event handler panicked; remaining handlers unaffected");
        }
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct JobFinished {
        name: String,
    }

    #[derive(Debug, Clone)]
    struct Heartbeat;

    #[test]
    fn every_subscriber_receives_a_published_message() {
        let aggregator = EventAggregator::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_in = first.clone();
        let _t1 = aggregator.subscribe::<JobFinished, _>(move |_| {
            first_in.fetch_add(1, Ordering::SeqCst);
        });
        let second_in = second.clone();
        let _t2 = aggregator.subscribe::<JobFinished, _>(move |_| {
            second_in.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.publish(JobFinished {
            name: "import".to_string(),
        });

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_handler_does_not_block_the_others() {
        let aggregator = EventAggregator::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let _t1 = aggregator.subscribe::<JobFinished, _>(|_| {
            panic!("subscriber bug");
        });
        let delivered_in = delivered.clone();
        let _t2 = aggregator.subscribe::<JobFinished, _>(move |_| {
            delivered_in.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.publish(JobFinished {
            name: "import".to_string(),
        });

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_handlers_stop_receiving() {
        let aggregator = EventAggregator::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_in = count.clone();
        let token = aggregator.subscribe::<Heartbeat, _>(move |_| {
            count_in.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.publish(Heartbeat);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(aggregator.subscriber_count::<Heartbeat>(), 1);

        token.unsubscribe();
        aggregator.publish(Heartbeat);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(aggregator.subscriber_count::<Heartbeat>(), 0);
    }

    #[test]
    fn message_types_are_isolated() {
        let aggregator = EventAggregator::new();
        let jobs = Arc::new(AtomicUsize::new(0));

        let jobs_in = jobs.clone();
        let _t = aggregator.subscribe::<JobFinished, _>(move |_| {
            jobs_in.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.publish(Heartbeat);
        assert_eq!(jobs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn marshaled_publish_runs_on_the_injected_dispatcher() {
        let queue: Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>> = Arc::new(Mutex::new(Vec::new()));

        let queue_in = queue.clone();
        let dispatcher: Dispatcher = Arc::new(move |work| {
            queue_in.lock().unwrap().push(work);
        });
        let aggregator = EventAggregator::with_dispatcher(dispatcher);

        let received = Arc::new(AtomicUsize::new(0));
        let received_in = received.clone();
        let _t = aggregator.subscribe::<JobFinished, _>(move |_| {
            received_in.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.publish_on_dispatcher(JobFinished {
            name: "render".to_string(),
        });

        // Nothing delivered until the affinity context drains its queue.
        assert_eq!(received.load(Ordering::SeqCst), 0);
        for work in queue.lock().unwrap().drain(..) {
            work();
        }
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_publish_reaches_every_subscriber() {
        let aggregator = EventAggregator::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let delivered_in = delivered.clone();
            let _token = aggregator.subscribe::<JobFinished, _>(move |_| {
                delivered_in.fetch_add(1, Ordering::SeqCst);
            });
        }

        aggregator
            .publish_async(JobFinished {
                name: "sync".to_string(),
            })
            .await;

        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_removes_every_subscription() {
        let aggregator = EventAggregator::new();
        let _t1 = aggregator.subscribe::<JobFinished, _>(|_| {});
        let _t2 = aggregator.subscribe::<Heartbeat, _>(|_| {});

        aggregator.clear();
        assert_eq!(aggregator.subscriber_count::<JobFinished>(), 0);
        assert_eq!(aggregator.subscriber_count::<Heartbeat>(), 0);
    }
}
