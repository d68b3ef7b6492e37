//! Observer registration for simulator notifications.

use std::fmt;

pub type SubscriptionId = u32;

type Handler<E> = Box<dyn FnMut(&E) + Send>;

/// Callback list. Handlers run synchronously, in subscription order, on the
/// thread that mutates the simulator.
pub struct EventBus<E> {
    handlers: Vec<(SubscriptionId, Handler<E>)>,
    next_id: SubscriptionId,
    emitted: u64,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 1,
            emitted: 0,
        }
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.handlers.push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sid, _)| *sid != id);
        self.handlers.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        self.emitted += 1;
        for (_, handler) in &mut self.handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    /// Total events emitted, whether or not anyone was listening.
    pub fn emitted_count(&self) -> u64 {
        self.emitted
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}

/// Handler that appends a clone of every event into a shared buffer.
///
/// Handy for tests and for the CLI, which replays what happened after an
/// operation finishes.
pub fn collector<E: Clone + Send + 'static>(
    sink: std::sync::Arc<std::sync::Mutex<Vec<E>>>,
) -> impl FnMut(&E) + Send + 'static {
    move |event: &E| {
        if let Ok(mut events) = sink.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let mut bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(collector(Arc::clone(&seen)));
        bus.subscribe(collector(Arc::clone(&seen)));

        bus.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![7, 7]);
        assert_eq!(bus.emitted_count(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut bus: EventBus<&'static str> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = bus.subscribe(collector(Arc::clone(&seen)));

        bus.emit(&"first");
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&"second");

        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
