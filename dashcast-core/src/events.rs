//! Subscriber lists with synchronous, ordered delivery
//!
//! Emission calls every current subscriber in registration order before
//! returning. Subscribers registered during an emission only see later events.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`Subscribers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Subscribers<E> {
    callbacks: RwLock<Vec<(SubscriptionId, Callback<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<E> Subscribers<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let snapshot: Vec<Callback<E>> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_subscribers_in_order() {
        let subscribers = Subscribers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        subscribers.subscribe(move |event| first.lock().push(("first", *event)));
        let second = seen.clone();
        subscribers.subscribe(move |event| second.lock().push(("second", *event)));

        subscribers.emit(&1);
        subscribers.emit(&2);

        assert_eq!(
            *seen.lock(),
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subscribers = Subscribers::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = subscribers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscribers.emit(&0);
        assert!(subscribers.unsubscribe(id));
        assert!(!subscribers.unsubscribe(id));
        subscribers.emit(&0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscribers.is_empty());
    }
}
