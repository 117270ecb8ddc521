//! Typed event bus.
//!
//! The host engine's scene/collision glue reports into the session through
//! typed events rather than a string-keyed messenger: each event kind is its
//! own type with its own payload. Events queue until the session's next
//! step drains them.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        let q = q.downcast_mut::<Vec<E>>().expect("queue type mismatch");
        q.push(e);
    }

    /// Drains all queued events of a type, in push order.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    #[test]
    fn drain_preserves_push_order() {
        let mut bus = EventBus::default();
        bus.push(Ping(1));
        bus.push(Ping(2));
        assert_eq!(bus.drain::<Ping>(), vec![Ping(1), Ping(2)]);
        assert!(bus.drain::<Ping>().is_empty());
    }
}
