use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::DispatchQueue;

/// Opaque token returned by every subscribe call in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Subscriber<T> {
    queue: DispatchQueue,
    handler: Handler<T>,
}

struct ObservableState<T> {
    value: T,
    subscribers: HashMap<SubscriptionId, Subscriber<T>>,
}

/// A value with replay-on-subscribe change notifications.
///
/// New subscribers receive the current value right away (on their queue),
/// then every later `set`. Deliveries to one subscriber keep `set` order.
pub struct Observable<T: Clone + Send + 'static> {
    state: Mutex<ObservableState<T>>,
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(ObservableState { value, subscribers: HashMap::new() }),
        }
    }

    pub fn get(&self) -> T {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).value.clone()
    }

    pub fn subscribe<F>(&self, queue: DispatchQueue, handler: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let handler: Handler<T> = Arc::new(handler);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let replay = state.value.clone();
        let replay_handler = handler.clone();
        queue.dispatch(move || replay_handler(replay));

        state.subscribers.insert(id, Subscriber { queue, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .remove(&id)
            .is_some()
    }

    pub fn set(&self, value: T) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.value = value;

        for subscriber in state.subscribers.values() {
            let value = state.value.clone();
            let handler = subscriber.handler.clone();
            subscriber.queue.dispatch(move || handler(value));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).subscribers.len()
    }
}
